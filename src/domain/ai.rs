//! Schemas exchanged with the AI service during tender analysis.

use serde::{Deserialize, Serialize};

/// Text extracted from an uploaded tender document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    #[serde(default)]
    pub page_count: Option<i32>,
}

/// Structured header information of a tender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenderInfo {
    pub reference_number: Option<String>,
    pub title: Option<String>,
    pub issuing_authority: Option<String>,
    pub estimated_value: Option<String>,
    pub emd: Option<String>,
    pub submission_deadline: Option<String>,
    pub location: Option<String>,
    pub eligibility: Vec<String>,
}

/// One identified risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskItem {
    pub level: String,
    pub category: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub likelihood: Option<String>,
    #[serde(default)]
    pub mitigation_strategy: Option<String>,
    #[serde(default)]
    pub recommended_action: Option<String>,
}

/// Output of the risk assessment step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub risks: Vec<RiskItem>,
}

/// One RFP section with its requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfpSectionItem {
    pub section_number: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub key_requirements: Vec<String>,
    #[serde(default = "default_complexity")]
    pub estimated_complexity: String,
}

fn default_complexity() -> String {
    "medium".to_string()
}

/// Output of the RFP extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfpAnalysis {
    #[serde(default)]
    pub sections: Vec<RfpSectionItem>,
    #[serde(default)]
    pub total_requirements: i32,
}

/// One work package of the scope of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimated_effort_days: Option<f64>,
}

/// Output of the scope extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeOfWork {
    #[serde(default)]
    pub items: Vec<ScopeItem>,
    #[serde(default)]
    pub estimated_total_effort_days: Option<f64>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

/// Condensed one-page summary of the tender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnePager {
    pub executive_summary: String,
    #[serde(default)]
    pub key_highlights: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
}

/// Request body for `POST /v1/tender/one-pager`.
#[derive(Debug, Clone, Serialize)]
pub struct OnePagerInput<'a> {
    pub document_text: &'a str,
    pub tender_info: &'a TenderInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<&'a RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_of_work: Option<&'a ScopeOfWork>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_ai_payloads_fill_defaults() {
        let info: TenderInfo = serde_json::from_str(r#"{"title": "Road works"}"#).unwrap();
        assert_eq!(info.title.as_deref(), Some("Road works"));
        assert!(info.eligibility.is_empty());

        let rfp: RfpAnalysis =
            serde_json::from_str(r#"{"sections": [{"section_number": "1", "title": "Intro"}]}"#)
                .unwrap();
        assert_eq!(rfp.sections[0].estimated_complexity, "medium");
        assert_eq!(rfp.total_requirements, 0);
    }
}
