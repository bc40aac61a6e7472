//! Tender analysis domain types
//!
//! An analysis walks a fixed sequence of steps; each step owns a progress
//! percentage so clients polling the status endpoint see monotonic progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::PaginationParams;

/// Analysis lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis depth requested by the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisType {
    #[default]
    Full,
    Summary,
    RiskOnly,
}

impl AnalysisType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Summary => "summary",
            Self::RiskOnly => "risk-only",
        }
    }
}

/// Request body of `POST /analyze/tender/:tender_id`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitiateAnalysisRequest {
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub include_risk_assessment: Option<bool>,
    #[serde(default)]
    pub include_rfp_analysis: Option<bool>,
    #[serde(default)]
    pub include_scope_of_work: Option<bool>,
}

/// Which optional steps an analysis runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub analysis_type: AnalysisType,
    pub include_risk_assessment: bool,
    pub include_rfp_analysis: bool,
    pub include_scope_of_work: bool,
}

impl InitiateAnalysisRequest {
    /// Defaults follow the analysis type; explicit flags override them.
    pub fn options(&self) -> AnalysisOptions {
        let (risk, rfp, scope) = match self.analysis_type {
            AnalysisType::Full => (true, true, true),
            AnalysisType::Summary => (false, false, false),
            AnalysisType::RiskOnly => (true, false, false),
        };
        AnalysisOptions {
            analysis_type: self.analysis_type,
            include_risk_assessment: self.include_risk_assessment.unwrap_or(risk),
            include_rfp_analysis: self.include_rfp_analysis.unwrap_or(rfp),
            include_scope_of_work: self.include_scope_of_work.unwrap_or(scope),
        }
    }
}

/// Processing steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStep {
    Initializing,
    ParsingDocument,
    ExtractingTenderInfo,
    AnalyzingRisk,
    ExtractingRfp,
    ExtractingScope,
    GeneratingSummary,
    Completed,
}

impl AnalysisStep {
    pub fn key(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ParsingDocument => "parsing-document",
            Self::ExtractingTenderInfo => "extracting-tender-info",
            Self::AnalyzingRisk => "analyzing-risk",
            Self::ExtractingRfp => "extracting-rfp",
            Self::ExtractingScope => "extracting-scope",
            Self::GeneratingSummary => "generating-summary",
            Self::Completed => "completed",
        }
    }

    /// Progress reported once this step starts
    pub fn progress(self) -> i32 {
        match self {
            Self::Initializing => 5,
            Self::ParsingDocument => 10,
            Self::ExtractingTenderInfo => 25,
            Self::AnalyzingRisk => 70,
            Self::ExtractingRfp => 75,
            Self::ExtractingScope => 80,
            Self::GeneratingSummary => 85,
            Self::Completed => 100,
        }
    }

    /// Failure of this step fails the whole analysis.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Initializing | Self::ParsingDocument)
    }
}

/// Ordered steps for the given options.
pub fn analysis_plan(options: &AnalysisOptions) -> Vec<AnalysisStep> {
    let mut steps = vec![
        AnalysisStep::Initializing,
        AnalysisStep::ParsingDocument,
        AnalysisStep::ExtractingTenderInfo,
    ];
    if options.include_risk_assessment {
        steps.push(AnalysisStep::AnalyzingRisk);
    }
    if options.include_rfp_analysis {
        steps.push(AnalysisStep::ExtractingRfp);
    }
    if options.include_scope_of_work {
        steps.push(AnalysisStep::ExtractingScope);
    }
    steps.push(AnalysisStep::GeneratingSummary);
    steps.push(AnalysisStep::Completed);
    steps
}

/// 202 response of `POST /analyze/tender/:tender_id`
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisInitiatedResponse {
    pub analysis_id: Uuid,
    pub tender_id: Uuid,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub estimated_completion_time_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisStatusResponse {
    pub analysis_id: Uuid,
    pub tender_id: Uuid,
    pub status: AnalysisStatus,
    pub progress: i32,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskResponse {
    pub id: Uuid,
    pub level: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub impact: Option<String>,
    pub likelihood: Option<String>,
    pub mitigation_strategy: Option<String>,
    pub recommended_action: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RfpSectionResponse {
    pub id: Uuid,
    pub section_number: String,
    pub title: String,
    pub description: Option<String>,
    pub key_requirements: serde_json::Value,
    pub estimated_complexity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResultsBody {
    pub summary: serde_json::Value,
    pub risk_assessment: serde_json::Value,
    pub rfp_analysis: serde_json::Value,
    pub scope_of_work: serde_json::Value,
    pub one_pager: serde_json::Value,
    pub risks: Vec<RiskResponse>,
    pub rfp_sections: Vec<RfpSectionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResultsResponse {
    pub analysis_id: Uuid,
    pub tender_id: Uuid,
    pub status: AnalysisStatus,
    pub results: AnalysisResultsBody,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisListItem {
    pub analysis_id: Uuid,
    pub tender_id: Uuid,
    pub tender_name: Option<String>,
    pub analysis_type: String,
    pub status: AnalysisStatus,
    pub progress: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
}

/// Query string of `GET /analyze/analyses`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisListQuery {
    pub status: Option<String>,
    pub tender_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl AnalysisListQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub fn status_filter(&self) -> Result<Option<AnalysisStatus>, String> {
        match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) => AnalysisStatus::parse(s)
                .map(Some)
                .ok_or_else(|| format!("Invalid status '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(analysis_type: AnalysisType) -> InitiateAnalysisRequest {
        InitiateAnalysisRequest {
            analysis_type,
            ..Default::default()
        }
    }

    #[test]
    fn analysis_type_uses_kebab_case() {
        let req: InitiateAnalysisRequest =
            serde_json::from_str(r#"{"analysis_type": "risk-only"}"#).unwrap();
        assert_eq!(req.analysis_type, AnalysisType::RiskOnly);

        let req: InitiateAnalysisRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.analysis_type, AnalysisType::Full);
    }

    #[test]
    fn options_follow_type_and_respect_overrides() {
        let full = request(AnalysisType::Full).options();
        assert!(full.include_risk_assessment && full.include_rfp_analysis && full.include_scope_of_work);

        let risk_only = request(AnalysisType::RiskOnly).options();
        assert!(risk_only.include_risk_assessment);
        assert!(!risk_only.include_rfp_analysis && !risk_only.include_scope_of_work);

        let custom = InitiateAnalysisRequest {
            include_rfp_analysis: Some(false),
            ..request(AnalysisType::Full)
        }
        .options();
        assert!(!custom.include_rfp_analysis);
        assert!(custom.include_scope_of_work);
    }

    #[test]
    fn full_plan_progress_is_strictly_increasing_and_ends_at_100() {
        let plan = analysis_plan(&request(AnalysisType::Full).options());
        assert_eq!(plan.len(), 8);
        assert!(plan.windows(2).all(|w| w[0].progress() < w[1].progress()));
        assert_eq!(plan.last().map(|s| s.progress()), Some(100));
        assert_eq!(plan.first(), Some(&AnalysisStep::Initializing));
    }

    #[test]
    fn summary_plan_skips_optional_steps() {
        let plan = analysis_plan(&request(AnalysisType::Summary).options());
        let keys: Vec<_> = plan.iter().map(|s| s.key()).collect();
        assert_eq!(
            keys,
            vec![
                "initializing",
                "parsing-document",
                "extracting-tender-info",
                "generating-summary",
                "completed"
            ]
        );
    }

    #[test]
    fn only_setup_steps_are_fatal() {
        assert!(AnalysisStep::ParsingDocument.is_fatal());
        assert!(!AnalysisStep::AnalyzingRisk.is_fatal());
        assert!(!AnalysisStep::GeneratingSummary.is_fatal());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            AnalysisStatus::Pending,
            AnalysisStatus::Processing,
            AnalysisStatus::Completed,
            AnalysisStatus::Failed,
        ] {
            assert_eq!(AnalysisStatus::parse(status.as_str()), Some(status));
        }
        assert!(AnalysisStatus::Processing.is_active());
        assert!(!AnalysisStatus::Failed.is_active());
    }

    #[test]
    fn list_query_rejects_unknown_status() {
        let query = AnalysisListQuery {
            status: Some("done".into()),
            ..Default::default()
        };
        assert!(query.status_filter().is_err());

        let query = AnalysisListQuery {
            status: Some("completed".into()),
            ..Default::default()
        };
        assert_eq!(query.status_filter(), Ok(Some(AnalysisStatus::Completed)));
    }
}
