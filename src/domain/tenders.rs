//! Scraped tender DTOs and the tender filter.
//!
//! Query parameters are validated into a [`TenderFilter`] before any database
//! work; value bounds and deduplication are applied in [`refine_tenders`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use super::release_date::parse_release_date;
use crate::api::PaginationParams;

/// Relative date windows offered by the date selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Last2Days,
    Last5Days,
    Last7Days,
    Last30Days,
    LastYear,
}

impl DateRange {
    pub fn days(self) -> i64 {
        match self {
            Self::Last2Days => 2,
            Self::Last5Days => 5,
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::LastYear => 365,
        }
    }

    /// Inclusive `(from, to)` window ending today.
    pub fn window(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (today - Duration::days(self.days()), today)
    }
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_2_days" => Ok(Self::Last2Days),
            "last_5_days" => Ok(Self::Last5Days),
            "last_7_days" => Ok(Self::Last7Days),
            "last_30_days" => Ok(Self::Last30Days),
            "last_year" => Ok(Self::LastYear),
            other => Err(format!(
                "Invalid date_range '{}'. Expected one of: last_2_days, last_5_days, last_7_days, last_30_days, last_year",
                other
            )),
        }
    }
}

/// Which scrape runs a tender query draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelection {
    Latest,
    OnDate(NaiveDate),
    Between { from: NaiveDate, to: NaiveDate },
}

/// Raw query string of `GET /tenders`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenderFilterQuery {
    pub date: Option<String>,
    pub date_range: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub min_value: Option<Decimal>,
    pub max_value: Option<Decimal>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Validated tender filter
#[derive(Debug, Clone, PartialEq)]
pub struct TenderFilter {
    pub runs: RunSelection,
    pub category: Option<String>,
    pub location: Option<String>,
    pub min_value: Option<Decimal>,
    pub max_value: Option<Decimal>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl TenderFilterQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }

    /// Validate against `today`; the error is the message for a 400 response.
    pub fn validate(&self, today: NaiveDate) -> Result<TenderFilter, String> {
        let date = non_blank(&self.date);
        let date_range = non_blank(&self.date_range);

        let runs = match (date, date_range) {
            (Some(_), Some(_)) => {
                return Err("Specify either 'date' or 'date_range', not both".to_string())
            }
            (Some(date), None) => RunSelection::OnDate(
                parse_release_date(&date)
                    .ok_or_else(|| format!("Invalid date '{}'. Use YYYY-MM-DD", date))?,
            ),
            (None, Some(range)) => {
                let (from, to) = range.parse::<DateRange>()?.window(today);
                RunSelection::Between { from, to }
            }
            (None, None) => RunSelection::Latest,
        };

        for bound in [self.min_value, self.max_value].into_iter().flatten() {
            if bound.is_sign_negative() {
                return Err("Value bounds must not be negative".to_string());
            }
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err("min_value cannot be greater than max_value".to_string());
            }
        }

        Ok(TenderFilter {
            runs,
            category: non_blank(&self.category),
            location: non_blank(&self.location),
            min_value: self.min_value,
            max_value: self.max_value,
        })
    }
}

impl TenderFilter {
    /// Cache key fragment identifying this filter (pagination excluded).
    pub fn cache_fragment(&self) -> String {
        let runs = match &self.runs {
            RunSelection::Latest => "latest".to_string(),
            RunSelection::OnDate(d) => d.to_string(),
            RunSelection::Between { from, to } => format!("{}..{}", from, to),
        };
        let opt = |v: &Option<String>| v.as_deref().unwrap_or("").to_lowercase();
        let num = |v: &Option<Decimal>| v.map(|d| d.normalize().to_string()).unwrap_or_default();
        format!(
            "{}:{}:{}:{}:{}",
            runs,
            opt(&self.category),
            opt(&self.location),
            num(&self.min_value),
            num(&self.max_value)
        )
    }

    fn has_value_bounds(&self) -> bool {
        self.min_value.is_some() || self.max_value.is_some()
    }

    fn value_in_bounds(&self, amount: Option<Decimal>) -> bool {
        if !self.has_value_bounds() {
            return true;
        }
        let Some(amount) = amount else {
            return false;
        };
        self.min_value.map_or(true, |min| amount >= min)
            && self.max_value.map_or(true, |max| amount <= max)
    }
}

/// Parse a scraped tender value (`₹ 2.50 Cr`, `45 Lakh`, `1,20,000`) into rupees.
pub fn parse_tender_value(text: &str) -> Option<Decimal> {
    let lowered = text.trim().to_lowercase().replace(',', "");
    let mut rest = lowered.as_str();
    for prefix in ["₹", "inr", "rs.", "rs"] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let rest = rest.trim_start();

    let number_end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    if number_end == 0 {
        return None;
    }
    let amount = Decimal::from_str(&rest[..number_end]).ok()?;

    let multiplier = match rest[number_end..].trim().trim_end_matches('.') {
        "" | "/-" => Decimal::ONE,
        "cr" | "crore" | "crores" => Decimal::from(10_000_000),
        "l" | "lakh" | "lakhs" | "lac" | "lacs" => Decimal::from(100_000),
        "k" | "thousand" => Decimal::from(1_000),
        _ => return None,
    };

    Some(amount * multiplier)
}

/// Date selector entry for `GET /dates`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedDate {
    pub id: Uuid,
    pub date: NaiveDate,
    pub date_str: String,
    pub run_at: DateTime<Utc>,
    pub tender_count: i64,
    pub is_latest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedDatesResponse {
    pub dates: Vec<ScrapedDate>,
}

/// Tender as listed by `GET /tenders`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderListItem {
    pub id: Uuid,
    pub tender_id_str: String,
    pub tender_name: Option<String>,
    pub tender_url: Option<String>,
    pub category: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub summary: Option<String>,
    pub value: Option<String>,
    pub due_date: Option<String>,
    pub tender_no: Option<String>,
    pub tendering_authority: Option<String>,
    pub publish_date: Option<String>,
    pub release_date: NaiveDate,
    pub scrape_run_id: Uuid,
}

impl TenderListItem {
    fn dedup_key(&self) -> &str {
        self.tender_no
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.tender_id_str)
    }

    fn is_displayable(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.tender_name) && present(&self.due_date)
    }

    /// Listing value in rupees, if it parses.
    pub fn value_amount(&self) -> Option<Decimal> {
        self.value.as_deref().and_then(parse_tender_value)
    }
}

/// Drop undisplayable tenders and duplicates, then apply value bounds.
///
/// Input order is preserved; the first occurrence of a tender number wins,
/// so callers pass rows newest-first.
pub fn refine_tenders(rows: Vec<TenderListItem>, filter: &TenderFilter) -> Vec<TenderListItem> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(TenderListItem::is_displayable)
        .filter(|t| seen.insert(t.dedup_key().to_string()))
        .filter(|t| filter.value_in_bounds(t.value_amount()))
        .collect()
}

/// File attached to a tender
#[derive(Debug, Clone, Serialize)]
pub struct TenderFileResponse {
    pub id: Uuid,
    pub file_name: String,
    pub file_url: String,
    pub file_description: Option<String>,
    pub file_size: Option<String>,
    pub dms_document_id: Option<Uuid>,
}

/// Full tender detail
#[derive(Debug, Clone, Serialize)]
pub struct TenderDetails {
    #[serde(flatten)]
    pub tender: TenderListItem,
    pub tdr: Option<String>,
    pub tender_value: Option<String>,
    pub tender_type: Option<String>,
    pub last_date_of_bid_submission: Option<String>,
    pub tender_opening_date: Option<String>,
    pub company_name: Option<String>,
    pub dms_folder_id: Option<Uuid>,
    pub files: Vec<TenderFileResponse>,
}
