//! Tender analysis: request handling and the background processor.
//!
//! Each accepted analysis runs in its own tokio task and persists status,
//! progress and current step as it moves through the plan. A user can have
//! at most one pending or processing analysis per tender.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::api::Paginated;
use crate::domain::ai::TenderInfo;
use crate::domain::{
    AnalysisInitiatedResponse, AnalysisListItem, AnalysisListQuery, AnalysisOptions,
    AnalysisResultsBody, AnalysisResultsResponse, AnalysisStatus, AnalysisStatusResponse,
    AnalysisStep, InitiateAnalysisRequest, RfpSectionResponse, RiskResponse,
};
use crate::error::{ApiError, ApiResult};
use crate::services::analysis_pipeline::{execute_plan, AnalysisOutput, ProgressSink};
use crate::services::dms::DmsService;
use crate::services::AiClient;

/// Reported to clients as the expected duration of an analysis
pub const ESTIMATED_COMPLETION_TIME_MS: i64 = 30_000;

/// In-process set of running `(user, tender)` analyses.
#[derive(Default)]
pub struct AnalysisRegistry {
    active: Mutex<HashSet<(Uuid, Uuid)>>,
}

/// Slot held for the lifetime of one analysis; released on drop.
pub struct ActiveAnalysis {
    registry: Arc<AnalysisRegistry>,
    key: (Uuid, Uuid),
}

impl AnalysisRegistry {
    /// Claim the slot for `user_id` analysing `tender_id`, if free.
    pub fn claim(self: &Arc<Self>, user_id: Uuid, tender_id: Uuid) -> Option<ActiveAnalysis> {
        let key = (user_id, tender_id);
        if !self.active.lock().insert(key) {
            return None;
        }
        Some(ActiveAnalysis {
            registry: Arc::clone(self),
            key,
        })
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

impl Drop for ActiveAnalysis {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.key);
    }
}

/// Database row for tender analysis
#[derive(Debug, sqlx::FromRow)]
struct AnalysisRow {
    id: Uuid,
    tender_id: Uuid,
    status: String,
    progress: i32,
    current_step: Option<String>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    processing_time_ms: Option<i64>,
}

impl AnalysisRow {
    fn status(&self) -> AnalysisStatus {
        AnalysisStatus::parse(&self.status).unwrap_or(AnalysisStatus::Pending)
    }
}

impl From<AnalysisRow> for AnalysisStatusResponse {
    fn from(row: AnalysisRow) -> Self {
        Self {
            analysis_id: row.id,
            tender_id: row.tender_id,
            status: row.status(),
            progress: row.progress,
            current_step: row.current_step,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AnalysisListRow {
    id: Uuid,
    tender_id: Uuid,
    tender_name: Option<String>,
    analysis_type: String,
    status: String,
    progress: i32,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    processing_time_ms: Option<i64>,
}

impl From<AnalysisListRow> for AnalysisListItem {
    fn from(row: AnalysisListRow) -> Self {
        Self {
            analysis_id: row.id,
            tender_id: row.tender_id,
            tender_name: row.tender_name,
            analysis_type: row.analysis_type,
            status: AnalysisStatus::parse(&row.status).unwrap_or(AnalysisStatus::Pending),
            progress: row.progress,
            created_at: row.created_at,
            completed_at: row.completed_at,
            processing_time_ms: row.processing_time_ms,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResultsRow {
    summary_json: Option<serde_json::Value>,
    risk_assessment_json: Option<serde_json::Value>,
    rfp_analysis_json: Option<serde_json::Value>,
    scope_of_work_json: Option<serde_json::Value>,
    one_pager_json: Option<serde_json::Value>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct RiskRow {
    id: Uuid,
    level: String,
    category: String,
    title: String,
    description: String,
    impact: Option<String>,
    likelihood: Option<String>,
    mitigation_strategy: Option<String>,
    recommended_action: Option<String>,
}

impl From<RiskRow> for RiskResponse {
    fn from(row: RiskRow) -> Self {
        Self {
            id: row.id,
            level: row.level,
            category: row.category,
            title: row.title,
            description: row.description,
            impact: row.impact,
            likelihood: row.likelihood,
            mitigation_strategy: row.mitigation_strategy,
            recommended_action: row.recommended_action,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RfpSectionRow {
    id: Uuid,
    section_number: String,
    title: String,
    description: Option<String>,
    key_requirements: serde_json::Value,
    estimated_complexity: String,
}

impl From<RfpSectionRow> for RfpSectionResponse {
    fn from(row: RfpSectionRow) -> Self {
        Self {
            id: row.id,
            section_number: row.section_number,
            title: row.title,
            description: row.description,
            key_requirements: row.key_requirements,
            estimated_complexity: row.estimated_complexity,
        }
    }
}

/// Document-level summary stored alongside the AI outputs
#[derive(Debug, Serialize)]
struct AnalysisSummary<'a> {
    tender_info: &'a TenderInfo,
    document_count: usize,
    page_count: i32,
    text_length: usize,
}

#[derive(Clone)]
pub struct AnalysisService {
    db: PgPool,
    ai: AiClient,
    dms: DmsService,
    registry: Arc<AnalysisRegistry>,
    results_ttl: chrono::Duration,
    stale_after: chrono::Duration,
}

/// Records progress of one analysis row.
struct StoredProgress<'a> {
    db: &'a PgPool,
    analysis_id: Uuid,
}

#[axum::async_trait]
impl ProgressSink for StoredProgress<'_> {
    async fn record(&self, step: AnalysisStep) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE tender_analysis
            SET status = 'processing',
                progress = GREATEST(progress, $2),
                current_step = $3,
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(self.analysis_id)
        .bind(step.progress())
        .bind(step.key())
        .execute(self.db)
        .await?;
        Ok(())
    }
}

/// Active analyses not updated within `stale_after` of `now`.
fn stale_analyses(
    active: &[(Uuid, DateTime<Utc>)],
    now: DateTime<Utc>,
    stale_after: chrono::Duration,
) -> Vec<Uuid> {
    active
        .iter()
        .filter(|(_, updated_at)| now - *updated_at > stale_after)
        .map(|(id, _)| *id)
        .collect()
}

impl AnalysisService {
    pub fn new(
        db: PgPool,
        ai: AiClient,
        dms: DmsService,
        results_ttl_days: i64,
        stale_after_minutes: i64,
    ) -> Self {
        Self {
            db,
            ai,
            dms,
            registry: Arc::new(AnalysisRegistry::default()),
            results_ttl: chrono::Duration::days(results_ttl_days),
            stale_after: chrono::Duration::minutes(stale_after_minutes),
        }
    }

    /// Fail analyses left pending or processing by a previous process.
    pub async fn recover_interrupted(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tender_analysis
            SET status = 'failed',
                error_message = 'Analysis was interrupted by a server restart',
                completed_at = NOW(),
                processing_time_ms = (EXTRACT(EPOCH FROM (NOW() - COALESCE(started_at, created_at))) * 1000)::BIGINT,
                updated_at = NOW()
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Accept an analysis request and start processing in the background.
    #[instrument(skip(self, request, request_id))]
    pub async fn initiate(
        &self,
        user_id: Uuid,
        tender_id: Uuid,
        request: &InitiateAnalysisRequest,
        request_id: Option<String>,
    ) -> ApiResult<AnalysisInitiatedResponse> {
        let tender_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM scraped_tenders WHERE id = $1)")
                .bind(tender_id)
                .fetch_one(&self.db)
                .await?;
        if !tender_exists {
            return Err(ApiError::not_found("Tender not found"));
        }

        let conflict = || ApiError::conflict("An analysis of this tender is already in progress");
        let slot = self.registry.claim(user_id, tender_id).ok_or_else(conflict)?;

        let active: Vec<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, updated_at FROM tender_analysis
            WHERE user_id = $1 AND tender_id = $2 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(user_id)
        .bind(tender_id)
        .fetch_all(&self.db)
        .await?;

        let stale = stale_analyses(&active, Utc::now(), self.stale_after);
        if stale.len() < active.len() {
            return Err(conflict());
        }
        if !stale.is_empty() {
            self.expire(&stale).await?;
        }

        let options = request.options();
        let (analysis_id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO tender_analysis (
                tender_id, user_id, analysis_type, include_risk_assessment,
                include_rfp_analysis, include_scope_of_work, status, progress
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0)
            RETURNING id, created_at
            "#,
        )
        .bind(tender_id)
        .bind(user_id)
        .bind(options.analysis_type.as_str())
        .bind(options.include_risk_assessment)
        .bind(options.include_rfp_analysis)
        .bind(options.include_scope_of_work)
        .fetch_one(&self.db)
        .await?;

        info!(%analysis_id, %tender_id, analysis_type = options.analysis_type.as_str(), "Analysis accepted");

        let processor = self.clone();
        let span = tracing::info_span!("analysis", %analysis_id, %tender_id);
        tokio::spawn(
            async move {
                let _slot = slot;
                processor
                    .run(analysis_id, tender_id, options, request_id.as_deref())
                    .await;
            }
            .instrument(span),
        );

        Ok(AnalysisInitiatedResponse {
            analysis_id,
            tender_id,
            status: AnalysisStatus::Pending,
            created_at,
            estimated_completion_time_ms: ESTIMATED_COMPLETION_TIME_MS,
        })
    }

    async fn expire(&self, analysis_ids: &[Uuid]) -> anyhow::Result<()> {
        let message = format!(
            "Analysis timed out after {} minutes",
            self.stale_after.num_minutes()
        );
        for analysis_id in analysis_ids {
            warn!(%analysis_id, "Expiring stuck analysis");
            self.mark_failed(*analysis_id, &message).await?;
        }
        Ok(())
    }

    async fn run(
        &self,
        analysis_id: Uuid,
        tender_id: Uuid,
        options: AnalysisOptions,
        request_id: Option<&str>,
    ) {
        let progress = StoredProgress {
            db: &self.db,
            analysis_id,
        };
        let outcome = match execute_plan(
            &self.ai,
            &self.dms,
            &progress,
            tender_id,
            &options,
            request_id,
        )
        .await
        {
            Ok(output) => self.store_results(analysis_id, &output).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => info!("Analysis completed"),
            Err(e) => {
                error!(error = ?e, "Analysis failed");
                if let Err(db_err) = self.mark_failed(analysis_id, &format!("{:#}", e)).await {
                    error!(error = %db_err, "Failed to record analysis failure");
                }
            }
        }
    }

    async fn store_results(&self, analysis_id: Uuid, output: &AnalysisOutput) -> anyhow::Result<()> {
        let summary = AnalysisSummary {
            tender_info: &output.tender_info,
            document_count: output.document_count,
            page_count: output.page_count,
            text_length: output.document_text.len(),
        };
        let expires_at = Utc::now() + self.results_ttl;

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO analysis_results (
                analysis_id, summary_json, risk_assessment_json, rfp_analysis_json,
                scope_of_work_json, one_pager_json, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(analysis_id)
        .bind(Json(&summary))
        .bind(output.risk_assessment.as_ref().map(Json))
        .bind(output.rfp_analysis.as_ref().map(Json))
        .bind(output.scope_of_work.as_ref().map(Json))
        .bind(output.one_pager.as_ref().map(Json))
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        for risk in output.risk_assessment.iter().flat_map(|r| &r.risks) {
            sqlx::query(
                r#"
                INSERT INTO analysis_risks (
                    analysis_id, level, category, title, description, impact,
                    likelihood, mitigation_strategy, recommended_action
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(analysis_id)
            .bind(&risk.level)
            .bind(&risk.category)
            .bind(&risk.title)
            .bind(&risk.description)
            .bind(&risk.impact)
            .bind(&risk.likelihood)
            .bind(&risk.mitigation_strategy)
            .bind(&risk.recommended_action)
            .execute(&mut *tx)
            .await?;
        }

        for section in output.rfp_analysis.iter().flat_map(|r| &r.sections) {
            sqlx::query(
                r#"
                INSERT INTO analysis_rfp_sections (
                    analysis_id, section_number, title, description,
                    key_requirements, estimated_complexity
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(analysis_id)
            .bind(&section.section_number)
            .bind(&section.title)
            .bind(&section.description)
            .bind(Json(&section.key_requirements))
            .bind(&section.estimated_complexity)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE tender_analysis
            SET status = 'completed',
                progress = 100,
                current_step = $2,
                completed_at = NOW(),
                processing_time_ms = (EXTRACT(EPOCH FROM (NOW() - COALESCE(started_at, created_at))) * 1000)::BIGINT,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(analysis_id)
        .bind(AnalysisStep::Completed.key())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, analysis_id: Uuid, message: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE tender_analysis
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW(),
                processing_time_ms = (EXTRACT(EPOCH FROM (NOW() - COALESCE(started_at, created_at))) * 1000)::BIGINT,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(analysis_id)
        .bind(message)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn owned_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> ApiResult<AnalysisRow> {
        sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, tender_id, status, progress, current_step, error_message,
                   started_at, completed_at, processing_time_ms
            FROM tender_analysis
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(analysis_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Analysis not found"))
    }

    /// Whether the user already has a completed analysis of the tender.
    pub async fn has_completed(&self, user_id: Uuid, tender_id: Uuid) -> ApiResult<bool> {
        let completed = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tender_analysis
                WHERE user_id = $1 AND tender_id = $2 AND status = 'completed'
            )
            "#,
        )
        .bind(user_id)
        .bind(tender_id)
        .fetch_one(&self.db)
        .await?;
        Ok(completed)
    }

    /// Current status and progress of an analysis.
    pub async fn status(&self, user_id: Uuid, analysis_id: Uuid) -> ApiResult<AnalysisStatusResponse> {
        Ok(self.owned_analysis(user_id, analysis_id).await?.into())
    }

    /// Results of a completed analysis.
    pub async fn results(&self, user_id: Uuid, analysis_id: Uuid) -> ApiResult<AnalysisResultsResponse> {
        let analysis = self.owned_analysis(user_id, analysis_id).await?;
        let status = analysis.status();
        if status.is_active() {
            return Err(ApiError::conflict(format!(
                "Analysis is not completed yet (status: {}, progress: {}%)",
                status, analysis.progress
            )));
        }
        if status == AnalysisStatus::Failed {
            return Err(ApiError::conflict(format!(
                "Analysis failed: {}",
                analysis.error_message.as_deref().unwrap_or("unknown error")
            )));
        }

        let results = sqlx::query_as::<_, ResultsRow>(
            r#"
            SELECT summary_json, risk_assessment_json, rfp_analysis_json,
                   scope_of_work_json, one_pager_json, expires_at
            FROM analysis_results
            WHERE analysis_id = $1
            "#,
        )
        .bind(analysis_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::gone("Analysis results are no longer available"))?;

        if results.expires_at <= Utc::now() {
            return Err(ApiError::gone("Analysis results have expired"));
        }

        let risks = sqlx::query_as::<_, RiskRow>(
            r#"
            SELECT id, level, category, title, description, impact, likelihood,
                   mitigation_strategy, recommended_action
            FROM analysis_risks
            WHERE analysis_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(analysis_id)
        .fetch_all(&self.db)
        .await?;

        let rfp_sections = sqlx::query_as::<_, RfpSectionRow>(
            r#"
            SELECT id, section_number, title, description, key_requirements, estimated_complexity
            FROM analysis_rfp_sections
            WHERE analysis_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(analysis_id)
        .fetch_all(&self.db)
        .await?;

        let value = |v: Option<serde_json::Value>| v.unwrap_or(serde_json::Value::Null);

        Ok(AnalysisResultsResponse {
            analysis_id,
            tender_id: analysis.tender_id,
            status: AnalysisStatus::Completed,
            results: AnalysisResultsBody {
                summary: value(results.summary_json),
                risk_assessment: value(results.risk_assessment_json),
                rfp_analysis: value(results.rfp_analysis_json),
                scope_of_work: value(results.scope_of_work_json),
                one_pager: value(results.one_pager_json),
                risks: risks.into_iter().map(Into::into).collect(),
                rfp_sections: rfp_sections.into_iter().map(Into::into).collect(),
            },
            completed_at: analysis.completed_at,
            processing_time_ms: analysis.processing_time_ms,
            expires_at: results.expires_at,
        })
    }

    /// The caller's analyses, newest first.
    pub async fn list(
        &self,
        user_id: Uuid,
        query: &AnalysisListQuery,
    ) -> ApiResult<Paginated<AnalysisListItem>> {
        let status = query.status_filter().map_err(ApiError::BadRequest)?;
        let status = status.map(AnalysisStatus::as_str);
        let pagination = query.pagination();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tender_analysis
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR tender_id = $3)
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(query.tender_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, AnalysisListRow>(
            r#"
            SELECT a.id, a.tender_id, t.tender_name, a.analysis_type, a.status, a.progress,
                   a.created_at, a.completed_at, a.processing_time_ms
            FROM tender_analysis a
            LEFT JOIN scraped_tenders t ON a.tender_id = t.id
            WHERE a.user_id = $1
              AND ($2::text IS NULL OR a.status = $2)
              AND ($3::uuid IS NULL OR a.tender_id = $3)
            ORDER BY a.created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(query.tender_id)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(Paginated::new(
            rows.into_iter().map(Into::into).collect(),
            &pagination,
            total as u64,
        ))
    }

    /// Delete an analysis and its results.
    pub async fn delete(&self, user_id: Uuid, analysis_id: Uuid) -> ApiResult<()> {
        let deleted = sqlx::query("DELETE FROM tender_analysis WHERE id = $1 AND user_id = $2")
            .bind(analysis_id)
            .bind(user_id)
            .execute(&self.db)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(ApiError::not_found("Analysis not found"));
        }
        info!(%analysis_id, "Analysis deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_allows_one_analysis_per_user_and_tender() {
        let registry = Arc::new(AnalysisRegistry::default());
        let user = Uuid::new_v4();
        let tender = Uuid::new_v4();

        let first = registry.claim(user, tender);
        assert!(first.is_some());
        assert!(registry.claim(user, tender).is_none());

        // Other users and other tenders are independent
        assert!(registry.claim(Uuid::new_v4(), tender).is_some());
        assert!(registry.claim(user, Uuid::new_v4()).is_some());

        drop(first);
        assert!(registry.claim(user, tender).is_some());
    }

    #[test]
    fn dropping_slots_empties_registry() {
        let registry = Arc::new(AnalysisRegistry::default());
        let slots: Vec<_> = (0..3)
            .filter_map(|_| registry.claim(Uuid::new_v4(), Uuid::new_v4()))
            .collect();
        assert_eq!(registry.active_count(), 3);
        drop(slots);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn only_old_active_analyses_are_stale() {
        let now = Utc::now();
        let stuck = Uuid::new_v4();
        let recent = Uuid::new_v4();
        let active = vec![
            (stuck, now - chrono::Duration::minutes(45)),
            (recent, now - chrono::Duration::minutes(2)),
        ];

        let stale = stale_analyses(&active, now, chrono::Duration::minutes(30));
        assert_eq!(stale, vec![stuck]);
        assert!(stale_analyses(&active[1..], now, chrono::Duration::minutes(30)).is_empty());
        assert!(stale_analyses(&[], now, chrono::Duration::minutes(30)).is_empty());
    }

    #[test]
    fn summary_serializes_document_stats() {
        let info = TenderInfo {
            title: Some("Road works".into()),
            ..Default::default()
        };
        let summary = AnalysisSummary {
            tender_info: &info,
            document_count: 2,
            page_count: 40,
            text_length: 1200,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["document_count"], 2);
        assert_eq!(json["tender_info"]["title"], "Road works");
    }
}
