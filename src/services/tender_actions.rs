//! Per-user tender actions, flagged listings and corrigendum tracking.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::{Paginated, PaginationParams};
use crate::domain::{
    diff_versions, ApplyCorrigendumResponse, FieldChange, InitiateAnalysisRequest, LoggedAction,
    TenderActionLogEntry, TenderActionRequest, TenderActionResponse, TenderChangesResponse,
    TenderFlags, TenderHistoryEntry, TenderHistoryResponse, TenderListItem, TenderSnapshot,
    TenderStatus,
};
use crate::error::{ApiError, ApiResult};
use crate::services::tender_filter::{TenderRow, TENDER_COLUMNS, TENDER_JOINS};
use crate::services::AnalysisService;

/// Flag a listing filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlaggedList {
    Wishlist,
    Favourites,
    Archived,
}

impl FlaggedList {
    fn column(self) -> &'static str {
        match self {
            Self::Wishlist => "is_wishlisted",
            Self::Favourites => "is_favorite",
            Self::Archived => "is_archived",
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlagsRow {
    is_wishlisted: bool,
    is_favorite: bool,
    is_archived: bool,
    status: Option<String>,
}

impl From<FlagsRow> for TenderFlags {
    fn from(row: FlagsRow) -> Self {
        Self {
            is_wishlisted: row.is_wishlisted,
            is_favorite: row.is_favorite,
            is_archived: row.is_archived,
            status: row.status.as_deref().and_then(TenderStatus::parse),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActionLogRow {
    id: Uuid,
    tender_id: Uuid,
    action: String,
    notes: Option<String>,
    changes: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl From<ActionLogRow> for TenderActionLogEntry {
    fn from(row: ActionLogRow) -> Self {
        Self {
            id: row.id,
            tender_id: row.tender_id,
            action: row.action,
            notes: row.notes,
            changes: row.changes,
            created_at: row.created_at,
        }
    }
}

/// One scraped version of a tender
#[derive(Debug, sqlx::FromRow)]
struct VersionRow {
    id: Uuid,
    tender_id_str: String,
    scrape_run_id: Uuid,
    release_date: NaiveDate,
    tender_name: Option<String>,
    summary: Option<String>,
    value: Option<String>,
    tender_value: Option<String>,
    tender_type: Option<String>,
    due_date: Option<String>,
    last_date_of_bid_submission: Option<String>,
    tender_opening_date: Option<String>,
    tendering_authority: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

impl From<&VersionRow> for TenderSnapshot {
    fn from(row: &VersionRow) -> Self {
        Self {
            tender_name: row.tender_name.clone(),
            summary: row.summary.clone(),
            value: row.value.clone(),
            tender_value: row.tender_value.clone(),
            tender_type: row.tender_type.clone(),
            due_date: row.due_date.clone(),
            last_date_of_bid_submission: row.last_date_of_bid_submission.clone(),
            tender_opening_date: row.tender_opening_date.clone(),
            tendering_authority: row.tendering_authority.clone(),
            city: row.city.clone(),
            state: row.state.clone(),
        }
    }
}

/// Changes of the newest version against the one before it.
fn latest_changes(versions: &[VersionRow]) -> (Option<Uuid>, Vec<FieldChange>) {
    match versions {
        [.., previous, latest] => (
            Some(previous.id),
            diff_versions(&previous.into(), &latest.into()),
        ),
        _ => (None, Vec::new()),
    }
}

/// Versions that changed something, newest first. `versions` is oldest first.
fn version_history(versions: &[VersionRow]) -> Vec<TenderHistoryEntry> {
    versions
        .windows(2)
        .rev()
        .filter_map(|pair| {
            let changes = diff_versions(&(&pair[0]).into(), &(&pair[1]).into());
            (!changes.is_empty()).then(|| TenderHistoryEntry {
                version_id: pair[1].id,
                scrape_run_id: pair[1].scrape_run_id,
                release_date: pair[1].release_date,
                changes,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct TenderActionService {
    db: PgPool,
    analysis: AnalysisService,
}

impl TenderActionService {
    pub fn new(db: PgPool, analysis: AnalysisService) -> Self {
        Self { db, analysis }
    }

    /// Toggle a flag or set the status of a tender for one user.
    #[instrument(skip(self, request, request_id))]
    pub async fn perform(
        &self,
        user_id: Uuid,
        tender_id: Uuid,
        request: &TenderActionRequest,
        request_id: Option<String>,
    ) -> ApiResult<TenderActionResponse> {
        self.ensure_tender_exists(tender_id).await?;

        let mut tx = self.db.begin().await?;

        let current: TenderFlags = sqlx::query_as::<_, FlagsRow>(
            r#"
            SELECT is_wishlisted, is_favorite, is_archived, status
            FROM user_tender_actions
            WHERE user_id = $1 AND tender_id = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(tender_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Into::into)
        .unwrap_or_default();

        let (next, logged) = current.apply(request).map_err(ApiError::BadRequest)?;

        sqlx::query(
            r#"
            INSERT INTO user_tender_actions (
                user_id, tender_id, is_wishlisted, is_favorite, is_archived, status
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, tender_id) DO UPDATE
            SET is_wishlisted = EXCLUDED.is_wishlisted,
                is_favorite = EXCLUDED.is_favorite,
                is_archived = EXCLUDED.is_archived,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(tender_id)
        .bind(next.is_wishlisted)
        .bind(next.is_favorite)
        .bind(next.is_archived)
        .bind(next.status.map(TenderStatus::as_str))
        .execute(&mut *tx)
        .await?;

        self.log_action(&mut tx, user_id, tender_id, logged, request.notes(), None)
            .await?;
        tx.commit().await?;

        info!(%tender_id, action = %logged, "Tender action recorded");

        let (message, analysis_id) = if current.newly_wishlisted(next) {
            self.start_wishlist_analysis(user_id, tender_id, request_id)
                .await
        } else {
            (logged.message().to_string(), None)
        };

        Ok(TenderActionResponse {
            message,
            tender_id,
            is_wishlisted: next.is_wishlisted,
            is_favorite: next.is_favorite,
            is_archived: next.is_archived,
            status: next.status,
            analysis_id,
        })
    }

    /// Newly wishlisted tenders are analysed unless an analysis already exists.
    async fn start_wishlist_analysis(
        &self,
        user_id: Uuid,
        tender_id: Uuid,
        request_id: Option<String>,
    ) -> (String, Option<Uuid>) {
        match self.analysis.has_completed(user_id, tender_id).await {
            Ok(true) => {
                return ("Added to wishlist. Analysis already completed.".to_string(), None)
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to check previous analyses"),
        }

        let request = InitiateAnalysisRequest::default();
        match self
            .analysis
            .initiate(user_id, tender_id, &request, request_id)
            .await
        {
            Ok(started) => (
                "Added to wishlist. Analysis started.".to_string(),
                Some(started.analysis_id),
            ),
            Err(ApiError::Conflict(_)) => (
                "Added to wishlist. Analysis already in progress.".to_string(),
                None,
            ),
            Err(e) => {
                warn!(error = %e, "Failed to start wishlist analysis");
                ("Added to wishlist".to_string(), None)
            }
        }
    }

    async fn log_action(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        tender_id: Uuid,
        action: LoggedAction,
        notes: Option<&str>,
        changes: Option<&[FieldChange]>,
    ) -> ApiResult<Uuid> {
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO tender_action_history (tender_id, user_id, action, notes, changes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(tender_id)
        .bind(user_id)
        .bind(action.as_str())
        .bind(notes)
        .bind(changes.map(Json))
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    /// The user's tenders carrying `list`'s flag, most recently changed first.
    pub async fn flagged(
        &self,
        user_id: Uuid,
        list: FlaggedList,
        pagination: &PaginationParams,
    ) -> ApiResult<Paginated<TenderListItem>> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM user_tender_actions WHERE user_id = $1 AND {}",
            list.column()
        ))
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, TenderRow>(&format!(
            r#"
            SELECT {}
            {}
            JOIN user_tender_actions a ON a.tender_id = t.id
            WHERE a.user_id = $1 AND a.{}
            ORDER BY a.updated_at DESC, t.id
            LIMIT $2 OFFSET $3
            "#,
            TENDER_COLUMNS,
            TENDER_JOINS,
            list.column()
        ))
        .bind(user_id)
        .bind(i64::from(pagination.limit()))
        .bind(i64::try_from(pagination.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated::new(
            rows.into_iter().map(Into::into).collect(),
            pagination,
            total as u64,
        ))
    }

    /// The user's action log for a tender, newest first.
    pub async fn action_log(
        &self,
        user_id: Uuid,
        tender_id: Uuid,
    ) -> ApiResult<Vec<TenderActionLogEntry>> {
        self.ensure_tender_exists(tender_id).await?;

        let rows = sqlx::query_as::<_, ActionLogRow>(
            r#"
            SELECT id, tender_id, action, notes, changes, created_at
            FROM tender_action_history
            WHERE tender_id = $1 AND user_id = $2
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(tender_id)
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every scraped version sharing the tender's `tender_id_str`, oldest first.
    async fn versions(&self, tender_id: Uuid) -> ApiResult<Vec<VersionRow>> {
        let versions = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT t.id, t.tender_id_str, r.id AS scrape_run_id,
                   r.tender_release_date AS release_date,
                   t.tender_name, t.summary, t.value, t.tender_value, t.tender_type,
                   t.due_date, t.last_date_of_bid_submission, t.tender_opening_date,
                   t.tendering_authority, t.city, t.state
            FROM scraped_tenders t
            JOIN scraped_tender_queries q ON t.query_id = q.id
            JOIN scrape_runs r ON q.scrape_run_id = r.id
            WHERE t.tender_id_str = (SELECT tender_id_str FROM scraped_tenders WHERE id = $1)
            ORDER BY r.tender_release_date, r.run_at, t.id
            "#,
        )
        .bind(tender_id)
        .fetch_all(&self.db)
        .await?;

        if versions.is_empty() {
            return Err(ApiError::not_found("Tender not found"));
        }
        Ok(versions)
    }

    /// Changes in the newest scraped version of a tender.
    pub async fn changes(&self, tender_id: Uuid) -> ApiResult<TenderChangesResponse> {
        let versions = self.versions(tender_id).await?;
        let (previous_version_id, changes) = latest_changes(&versions);
        let latest_version_id = versions.last().map(|v| v.id).unwrap_or(tender_id);

        Ok(TenderChangesResponse {
            tender_id,
            latest_version_id,
            previous_version_id,
            changes,
        })
    }

    /// Record the newest changes of a tender as an applied corrigendum.
    #[instrument(skip(self, note))]
    pub async fn apply_corrigendum(
        &self,
        user_id: Uuid,
        tender_id: Uuid,
        note: Option<&str>,
    ) -> ApiResult<ApplyCorrigendumResponse> {
        let versions = self.versions(tender_id).await?;
        let (_, changes) = latest_changes(&versions);

        if changes.is_empty() {
            return Ok(ApplyCorrigendumResponse {
                status: "no_changes",
                message: "No changes detected".to_string(),
                changes,
                action_log_id: None,
            });
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let mut tx = self.db.begin().await?;
        let log_id = self
            .log_action(
                &mut tx,
                user_id,
                tender_id,
                LoggedAction::CorrigendumApplied,
                note,
                Some(&changes),
            )
            .await?;
        tx.commit().await?;

        info!(%tender_id, changes = changes.len(), "Corrigendum applied");

        Ok(ApplyCorrigendumResponse {
            status: "applied",
            message: format!("Applied {} change(s)", changes.len()),
            changes,
            action_log_id: Some(log_id),
        })
    }

    /// Field changes across every scraped version of a tender.
    pub async fn history(&self, tender_id: Uuid) -> ApiResult<TenderHistoryResponse> {
        let versions = self.versions(tender_id).await?;
        let history = version_history(&versions);
        let tender_id_str = versions
            .into_iter()
            .next()
            .map(|v| v.tender_id_str)
            .unwrap_or_default();

        Ok(TenderHistoryResponse {
            tender_id_str,
            total_changes: history.iter().map(|h| h.changes.len()).sum(),
            history,
        })
    }

    async fn ensure_tender_exists(&self, tender_id: Uuid) -> ApiResult<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM scraped_tenders WHERE id = $1)")
                .bind(tender_id)
                .fetch_one(&self.db)
                .await?;
        if exists {
            Ok(())
        } else {
            Err(ApiError::not_found("Tender not found"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeType;

    fn version(day: u32, due_date: &str, city: Option<&str>) -> VersionRow {
        VersionRow {
            id: Uuid::new_v4(),
            tender_id_str: "GEM/2025/B/6612".into(),
            scrape_run_id: Uuid::new_v4(),
            release_date: NaiveDate::from_ymd_opt(2025, 11, day).unwrap(),
            tender_name: Some("Supply of road rollers".into()),
            summary: None,
            value: Some("45 Lakh".into()),
            tender_value: None,
            tender_type: None,
            due_date: Some(due_date.into()),
            last_date_of_bid_submission: None,
            tender_opening_date: None,
            tendering_authority: None,
            city: city.map(String::from),
            state: None,
        }
    }

    #[test]
    fn single_version_has_no_changes() {
        let versions = vec![version(1, "10-11-2025", None)];
        let (previous, changes) = latest_changes(&versions);
        assert_eq!(previous, None);
        assert!(changes.is_empty());
        assert!(version_history(&versions).is_empty());
    }

    #[test]
    fn latest_version_is_compared_with_the_one_before() {
        let versions = vec![
            version(1, "10-11-2025", None),
            version(3, "10-11-2025", Some("Nagpur")),
            version(5, "24-11-2025", Some("Nagpur")),
        ];
        let (previous, changes) = latest_changes(&versions);
        assert_eq!(previous, Some(versions[1].id));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "due_date");
        assert_eq!(changes[0].new_value.as_deref(), Some("24-11-2025"));
    }

    #[test]
    fn history_lists_changed_versions_newest_first() {
        let versions = vec![
            version(1, "10-11-2025", None),
            version(2, "10-11-2025", None),
            version(3, "10-11-2025", Some("Nagpur")),
            version(5, "24-11-2025", Some("Nagpur")),
        ];
        let history = version_history(&versions);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version_id, versions[3].id);
        assert_eq!(history[1].version_id, versions[2].id);
        assert_eq!(history[1].changes[0].change_type, ChangeType::Added);
    }

    #[test]
    fn flagged_lists_filter_on_their_own_column() {
        assert_eq!(FlaggedList::Wishlist.column(), "is_wishlisted");
        assert_eq!(FlaggedList::Favourites.column(), "is_favorite");
        assert_eq!(FlaggedList::Archived.column(), "is_archived");
    }
}
