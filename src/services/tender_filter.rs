//! Tender listing and filtering over scraped data.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::Paginated;
use crate::domain::release_date::{parse_release_date, release_date_or_fallback};
use crate::domain::{
    refine_tenders, RunSelection, ScrapedDate, ScrapedDatesResponse, TenderDetails,
    TenderFileResponse, TenderFilterQuery, TenderListItem,
};
use crate::error::{ApiError, ApiResult};
use crate::services::cache::keys;
use crate::services::RedisCache;

/// Database row for a listed tender
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TenderRow {
    id: Uuid,
    tender_id_str: String,
    tender_name: Option<String>,
    tender_url: Option<String>,
    category: String,
    city: Option<String>,
    state: Option<String>,
    summary: Option<String>,
    value: Option<String>,
    due_date: Option<String>,
    tender_no: Option<String>,
    tendering_authority: Option<String>,
    publish_date: Option<String>,
    release_date: NaiveDate,
    scrape_run_id: Uuid,
}

impl From<TenderRow> for TenderListItem {
    fn from(row: TenderRow) -> Self {
        Self {
            id: row.id,
            tender_id_str: row.tender_id_str,
            tender_name: row.tender_name,
            tender_url: row.tender_url,
            category: row.category,
            city: row.city,
            state: row.state,
            summary: row.summary,
            value: row.value,
            due_date: row.due_date,
            tender_no: row.tender_no,
            tendering_authority: row.tendering_authority,
            publish_date: row.publish_date,
            release_date: row.release_date,
            scrape_run_id: row.scrape_run_id,
        }
    }
}

/// Database row for a tender with its detail columns
#[derive(Debug, sqlx::FromRow)]
struct TenderDetailRow {
    #[sqlx(flatten)]
    tender: TenderRow,
    tdr: Option<String>,
    tender_value: Option<String>,
    tender_type: Option<String>,
    last_date_of_bid_submission: Option<String>,
    tender_opening_date: Option<String>,
    company_name: Option<String>,
    dms_folder_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct TenderFileRow {
    id: Uuid,
    file_name: String,
    file_url: String,
    file_description: Option<String>,
    file_size: Option<String>,
    dms_document_id: Option<Uuid>,
}

impl From<TenderFileRow> for TenderFileResponse {
    fn from(row: TenderFileRow) -> Self {
        Self {
            id: row.id,
            file_name: row.file_name,
            file_url: row.file_url,
            file_description: row.file_description,
            file_size: row.file_size,
            dms_document_id: row.dms_document_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScrapeRunRow {
    id: Uuid,
    release_date: NaiveDate,
    date_str: Option<String>,
    run_at: DateTime<Utc>,
    no_of_new_tenders: Option<String>,
}

pub(crate) const TENDER_COLUMNS: &str = r#"
    t.id, t.tender_id_str, t.tender_name, t.tender_url, q.query_name AS category,
    t.city, t.state, t.summary, t.value, t.due_date, t.tender_no,
    t.tendering_authority, t.publish_date,
    r.tender_release_date AS release_date, r.id AS scrape_run_id
"#;

pub(crate) const TENDER_JOINS: &str = r#"
    FROM scraped_tenders t
    JOIN scraped_tender_queries q ON t.query_id = q.id
    JOIN scrape_runs r ON q.scrape_run_id = r.id
"#;

/// Scrape runs that carry a release date of their own
const DATED_RUN: &str = "date_str IS NOT NULL AND upper(btrim(date_str)) NOT IN ('', 'N/A')";

#[derive(Clone)]
pub struct TenderFilterService {
    db: PgPool,
    cache: RedisCache,
}

impl TenderFilterService {
    pub fn new(db: PgPool, cache: RedisCache) -> Self {
        Self { db, cache }
    }

    /// Scrape runs for the date selector, newest release first.
    #[instrument(skip(self))]
    pub async fn scraped_dates(&self) -> ApiResult<ScrapedDatesResponse> {
        let key = keys::scraped_dates();
        if let Some(cached) = self.cache.get::<ScrapedDatesResponse>(&key).await {
            return Ok(cached);
        }

        let runs = sqlx::query_as::<_, ScrapeRunRow>(&format!(
            r#"
            SELECT id, tender_release_date AS release_date, date_str, run_at, no_of_new_tenders
            FROM scrape_runs
            WHERE {}
            ORDER BY tender_release_date DESC, run_at DESC
            "#,
            DATED_RUN
        ))
        .fetch_all(&self.db)
        .await?;

        let response = ScrapedDatesResponse {
            dates: scraped_dates_from_runs(runs),
        };
        if let Err(e) = self.cache.set(&key, &response).await {
            warn!(error = %e, "Failed to cache scraped dates");
        }
        Ok(response)
    }

    /// Filtered, deduplicated and paginated tenders.
    #[instrument(skip(self, query))]
    pub async fn filtered_tenders(
        &self,
        query: &TenderFilterQuery,
        today: NaiveDate,
    ) -> ApiResult<Paginated<TenderListItem>> {
        let filter = query.validate(today).map_err(ApiError::BadRequest)?;
        let pagination = query.pagination();

        let key = keys::tender_page(&filter, &pagination);
        if let Some(cached) = self.cache.get::<Paginated<TenderListItem>>(&key).await {
            return Ok(cached);
        }

        let (latest_only, from, to) = match filter.runs {
            RunSelection::Latest => (true, None, None),
            RunSelection::OnDate(date) => (false, Some(date), Some(date)),
            RunSelection::Between { from, to } => (false, Some(from), Some(to)),
        };

        let rows = sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            SELECT {}
            {}
            WHERE (NOT $1 OR r.id = (
                    SELECT id FROM scrape_runs
                    WHERE {}
                    ORDER BY tender_release_date DESC, run_at DESC
                    LIMIT 1))
              AND ($2::date IS NULL OR r.tender_release_date >= $2)
              AND ($3::date IS NULL OR r.tender_release_date <= $3)
              AND ($4::text IS NULL OR q.query_name ILIKE $4)
              AND ($5::text IS NULL OR t.city ILIKE $5 OR t.state ILIKE $5)
            ORDER BY r.tender_release_date DESC, r.run_at DESC, t.tender_name
            "#,
            TENDER_COLUMNS, TENDER_JOINS, DATED_RUN
        ))
        .bind(latest_only)
        .bind(from)
        .bind(to)
        .bind(filter.category.as_deref().map(contains_pattern))
        .bind(filter.location.as_deref().map(contains_pattern))
        .fetch_all(&self.db)
        .await?;

        let fetched = rows.len();
        let tenders = refine_tenders(rows.into_iter().map(Into::into).collect(), &filter);
        debug!(fetched, kept = tenders.len(), "Tender filter applied");

        let page = Paginated::from_vec(tenders, &pagination);
        if let Err(e) = self.cache.set(&key, &page).await {
            warn!(error = %e, "Failed to cache tender page");
        }
        Ok(page)
    }

    /// A tender with its files.
    pub async fn tender_details(&self, id: Uuid) -> ApiResult<TenderDetails> {
        let row = sqlx::query_as::<_, TenderDetailRow>(&format!(
            r#"
            SELECT {},
                   t.tdr, t.tender_value, t.tender_type, t.last_date_of_bid_submission,
                   t.tender_opening_date, t.company_name, t.dms_folder_id
            {}
            WHERE t.id = $1
            "#,
            TENDER_COLUMNS, TENDER_JOINS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Tender not found"))?;

        let files = sqlx::query_as::<_, TenderFileRow>(
            r#"
            SELECT f.id, f.file_name, f.file_url, f.file_description, f.file_size,
                   d.id AS dms_document_id
            FROM scraped_tender_files f
            LEFT JOIN dms_documents d ON d.scraped_tender_file_id = f.id
            WHERE f.tender_id = $1
            ORDER BY f.file_name
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(TenderDetails {
            tender: row.tender.into(),
            tdr: row.tdr,
            tender_value: row.tender_value,
            tender_type: row.tender_type,
            last_date_of_bid_submission: row.last_date_of_bid_submission,
            tender_opening_date: row.tender_opening_date,
            company_name: row.company_name,
            dms_folder_id: row.dms_folder_id,
            files: files.into_iter().map(Into::into).collect(),
        })
    }

    /// Bring every stored release date in line with its `date_str`.
    ///
    /// Runs inserted without a release date, and textual forms the migration
    /// could not parse, are corrected here. Returns the number of runs updated.
    pub async fn reconcile_release_dates(&self) -> anyhow::Result<u64> {
        let runs = sqlx::query_as::<_, ScrapeRunRow>(
            r#"
            SELECT id, tender_release_date AS release_date, date_str, run_at, no_of_new_tenders
            FROM scrape_runs
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut updated = 0;
        for (id, resolved) in release_date_corrections(&runs) {
            sqlx::query("UPDATE scrape_runs SET tender_release_date = $2 WHERE id = $1")
                .bind(id)
                .bind(resolved)
                .execute(&self.db)
                .await?;
            updated += 1;
        }

        if updated > 0 {
            info!(updated, "Reconciled scrape run release dates");
            if let Err(e) = self.cache.delete_pattern(&keys::tenderiq_pattern()).await {
                warn!(error = %e, "Failed to invalidate tender caches");
            }
        }
        Ok(updated)
    }
}

/// Date selector entries for runs whose `date_str` parses; the first is latest.
fn scraped_dates_from_runs(runs: Vec<ScrapeRunRow>) -> Vec<ScrapedDate> {
    runs.into_iter()
        .filter_map(|run| {
            let date_str = run.date_str?;
            parse_release_date(date_str.trim())?;
            Some(ScrapedDate {
                id: run.id,
                date: run.release_date,
                date_str,
                run_at: run.run_at,
                tender_count: parse_tender_count(run.no_of_new_tenders.as_deref()),
                is_latest: false,
            })
        })
        .enumerate()
        .map(|(i, date)| ScrapedDate {
            is_latest: i == 0,
            ..date
        })
        .collect()
}

/// Runs whose stored release date differs from the one `date_str` implies.
fn release_date_corrections(runs: &[ScrapeRunRow]) -> Vec<(Uuid, NaiveDate)> {
    runs.iter()
        .filter_map(|run| {
            let resolved =
                release_date_or_fallback(run.date_str.as_deref().map(str::trim), run.run_at);
            (resolved != run.release_date).then_some((run.id, resolved))
        })
        .collect()
}

/// Tender count from the scraper's free-text `no_of_new_tenders`.
fn parse_tender_count(text: Option<&str>) -> i64 {
    text.map(|s| s.trim().replace(',', ""))
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|n| *n >= 0)
        .unwrap_or(0)
}

/// `ILIKE` pattern matching `needle` anywhere, with wildcards escaped.
fn contains_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tender_count_falls_back_to_zero() {
        assert_eq!(parse_tender_count(Some("42")), 42);
        assert_eq!(parse_tender_count(Some(" 1,204 ")), 1204);
        assert_eq!(parse_tender_count(Some("N/A")), 0);
        assert_eq!(parse_tender_count(Some("-3")), 0);
        assert_eq!(parse_tender_count(None), 0);
    }

    fn run(date_str: Option<&str>, release_date: NaiveDate, run_at: DateTime<Utc>) -> ScrapeRunRow {
        ScrapeRunRow {
            id: Uuid::new_v4(),
            release_date,
            date_str: date_str.map(String::from),
            run_at,
            no_of_new_tenders: Some("12".into()),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn undated_runs_are_not_offered_as_dates() {
        let today = Utc.with_ymd_and_hms(2025, 11, 4, 6, 0, 0).unwrap();
        let runs = vec![
            run(Some("N/A"), ymd(2025, 11, 4), today),
            run(None, ymd(2025, 11, 4), today),
            run(Some("Monday, Nov 03, 2025"), ymd(2025, 11, 3), today),
            run(Some("2025-11-02"), ymd(2025, 11, 2), today),
        ];

        let dates = scraped_dates_from_runs(runs);
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0].date, ymd(2025, 11, 3));
        assert!(dates[0].is_latest);
        assert!(!dates[1].is_latest);
        assert_eq!(dates[1].date_str, "2025-11-02");
    }

    #[test]
    fn reconcile_corrects_iso_dates_stored_wrong() {
        let run_at = Utc.with_ymd_and_hms(2025, 11, 4, 6, 0, 0).unwrap();
        let wrong = run(Some("2025-11-02"), ymd(2025, 11, 4), run_at);
        let right = run(Some("02-11-2025"), ymd(2025, 11, 2), run_at);
        let undated = run(Some("N/A"), ymd(2025, 11, 4), run_at);

        let corrections = release_date_corrections(&[wrong, right, undated]);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].1, ymd(2025, 11, 2));
    }

    #[test]
    fn contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("civil"), "%civil%");
        assert_eq!(contains_pattern("100%_done"), "%100\\%\\_done%");
    }
}
