//! Release-date parsing for scrape runs and date query parameters.
//!
//! Scrape runs carry a free-text `date_str` written by the scraper
//! (`Sunday, Nov 02, 2025`, `02-11-2025`, ISO dates, timestamps). The
//! calendar date is taken exactly as written: a timestamp's offset never
//! shifts it to another day.

use chrono::{DateTime, NaiveDate, Utc};

const NUMERIC_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d"];

const TEXTUAL_FORMATS: &[&str] = &["%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d %B %Y", "%b %d %Y"];

/// Parse a release date from any of the textual forms the scraper and the
/// frontend produce. Returns `None` for empty strings, `N/A` and garbage.
pub fn parse_release_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("n/a") {
        return None;
    }

    if let Some(date) = parse_timestamp_prefix(text) {
        return Some(date);
    }

    for format in NUMERIC_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    let without_weekday = strip_weekday(text);
    TEXTUAL_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(without_weekday, format).ok())
}

/// The parsed `date_str`, or the UTC date of `run_at` when it cannot be parsed.
pub fn release_date_or_fallback(date_str: Option<&str>, run_at: DateTime<Utc>) -> NaiveDate {
    date_str
        .and_then(parse_release_date)
        .unwrap_or_else(|| run_at.date_naive())
}

// `2025-11-02T23:30:00+05:30`, `2025-11-02 23:30:00`, `2025-11-02T18:00:00Z`
fn parse_timestamp_prefix(text: &str) -> Option<NaiveDate> {
    let separator = text.as_bytes().get(10)?;
    if *separator != b'T' && *separator != b' ' {
        return None;
    }
    let (date_part, time_part) = text.split_at(10);
    if !time_part[1..].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn strip_weekday(text: &str) -> &str {
    match text.split_once(',') {
        Some((head, rest)) if head.chars().all(|c| c.is_ascii_alphabetic()) && head.len() >= 3 => {
            rest.trim_start()
        }
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_numeric_forms() {
        assert_eq!(parse_release_date("2025-11-02"), Some(ymd(2025, 11, 2)));
        assert_eq!(parse_release_date("02-11-2025"), Some(ymd(2025, 11, 2)));
        assert_eq!(parse_release_date("02/11/2025"), Some(ymd(2025, 11, 2)));
        assert_eq!(parse_release_date(" 2025-11-02 "), Some(ymd(2025, 11, 2)));
    }

    #[test]
    fn parses_scraper_header_dates() {
        assert_eq!(
            parse_release_date("Sunday, Nov 02, 2025"),
            Some(ymd(2025, 11, 2))
        );
        assert_eq!(
            parse_release_date("Monday, November 3, 2025"),
            Some(ymd(2025, 11, 3))
        );
        assert_eq!(parse_release_date("Nov 02, 2025"), Some(ymd(2025, 11, 2)));
        assert_eq!(parse_release_date("02 Nov 2025"), Some(ymd(2025, 11, 2)));
    }

    #[test]
    fn timestamp_keeps_written_calendar_date() {
        let expected = Some(ymd(2025, 11, 2));
        assert_eq!(parse_release_date("2025-11-02T23:30:00+05:30"), expected);
        assert_eq!(parse_release_date("2025-11-02T23:30:00-08:00"), expected);
        assert_eq!(parse_release_date("2025-11-02T00:15:00Z"), expected);
        assert_eq!(parse_release_date("2025-11-02 23:30:00"), expected);
        assert_eq!(parse_release_date("2025-11-02T23:30:00.123456"), expected);
    }

    #[test]
    fn rejects_missing_and_invalid() {
        assert_eq!(parse_release_date(""), None);
        assert_eq!(parse_release_date("N/A"), None);
        assert_eq!(parse_release_date("n/a"), None);
        assert_eq!(parse_release_date("not a date"), None);
        assert_eq!(parse_release_date("2025-02-30"), None);
        assert_eq!(parse_release_date("2025-11-02Tgarbage"), None);
    }

    #[test]
    fn falls_back_to_run_timestamp() {
        let run_at = Utc.with_ymd_and_hms(2025, 10, 30, 4, 0, 0).unwrap();
        assert_eq!(
            release_date_or_fallback(Some("Sunday, Nov 02, 2025"), run_at),
            ymd(2025, 11, 2)
        );
        assert_eq!(release_date_or_fallback(Some("N/A"), run_at), ymd(2025, 10, 30));
        assert_eq!(release_date_or_fallback(None, run_at), ymd(2025, 10, 30));
    }
}
