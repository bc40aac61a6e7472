//! Step loop of a tender analysis, independent of where progress is stored
//! and where documents come from.

use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use crate::domain::ai::{OnePager, OnePagerInput, RfpAnalysis, RiskAssessment, ScopeOfWork, TenderInfo};
use crate::domain::{analysis_plan, AnalysisOptions, AnalysisStep};
use crate::services::AiClient;

/// A tender file available on local disk
#[derive(Debug, Clone)]
pub struct LocalTenderFile {
    pub file_name: String,
    pub mime_type: String,
    pub path: PathBuf,
}

/// Supplies the files of a tender for analysis.
#[axum::async_trait]
pub trait DocumentSource: Send + Sync {
    /// Files that could be brought onto local disk; may be empty.
    async fn tender_files(&self, tender_id: Uuid) -> anyhow::Result<Vec<LocalTenderFile>>;
}

/// Receives each step as it starts.
#[axum::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn record(&self, step: AnalysisStep) -> anyhow::Result<()>;
}

/// Everything the processor produced for one analysis
#[derive(Debug, Default)]
pub struct AnalysisOutput {
    pub document_text: String,
    pub document_count: usize,
    pub page_count: i32,
    pub tender_info: TenderInfo,
    pub risk_assessment: Option<RiskAssessment>,
    pub rfp_analysis: Option<RfpAnalysis>,
    pub scope_of_work: Option<ScopeOfWork>,
    pub one_pager: Option<OnePager>,
}

/// Run every step of the plan up to, not including, `Completed`.
///
/// Failures of fatal steps abort the run; other failures are logged and the
/// step's output stays empty.
pub async fn execute_plan(
    ai: &AiClient,
    documents: &dyn DocumentSource,
    progress: &dyn ProgressSink,
    tender_id: Uuid,
    options: &AnalysisOptions,
    request_id: Option<&str>,
) -> anyhow::Result<AnalysisOutput> {
    let mut output = AnalysisOutput::default();

    for step in analysis_plan(options) {
        if step == AnalysisStep::Completed {
            break;
        }
        progress.record(step).await?;

        let outcome: anyhow::Result<()> = match step {
            AnalysisStep::Initializing | AnalysisStep::Completed => Ok(()),
            AnalysisStep::ParsingDocument => {
                parse_documents(ai, documents, tender_id, &mut output, request_id).await
            }
            AnalysisStep::ExtractingTenderInfo => ai
                .extract_tender_info(&output.document_text, request_id)
                .await
                .map(|info| output.tender_info = info)
                .map_err(Into::into),
            AnalysisStep::AnalyzingRisk => ai
                .assess_risks(&output.document_text, &output.tender_info, request_id)
                .await
                .map(|risks| output.risk_assessment = Some(risks))
                .map_err(Into::into),
            AnalysisStep::ExtractingRfp => ai
                .extract_rfp_sections(&output.document_text, request_id)
                .await
                .map(|rfp| output.rfp_analysis = Some(rfp))
                .map_err(Into::into),
            AnalysisStep::ExtractingScope => ai
                .extract_scope(&output.document_text, request_id)
                .await
                .map(|scope| output.scope_of_work = Some(scope))
                .map_err(Into::into),
            AnalysisStep::GeneratingSummary => {
                let input = OnePagerInput {
                    document_text: &output.document_text,
                    tender_info: &output.tender_info,
                    risk_assessment: output.risk_assessment.as_ref(),
                    scope_of_work: output.scope_of_work.as_ref(),
                };
                ai.generate_one_pager(&input, request_id)
                    .await
                    .map(|one_pager| output.one_pager = Some(one_pager))
                    .map_err(Into::into)
            }
        };

        match outcome {
            Ok(()) => {}
            Err(e) if step.is_fatal() => return Err(e),
            Err(e) => warn!(step = step.key(), error = %e, "Analysis step failed, skipping"),
        }
    }

    Ok(output)
}

async fn parse_documents(
    ai: &AiClient,
    documents: &dyn DocumentSource,
    tender_id: Uuid,
    output: &mut AnalysisOutput,
    request_id: Option<&str>,
) -> anyhow::Result<()> {
    let files = documents.tender_files(tender_id).await?;
    if files.is_empty() {
        anyhow::bail!("No tender documents could be downloaded");
    }

    let mut texts = Vec::new();
    for file in &files {
        let bytes = match tokio::fs::read(&file.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %file.file_name, error = %e, "Failed to read cached file");
                continue;
            }
        };
        match ai
            .extract_text(&file.file_name, &file.mime_type, bytes, request_id)
            .await
        {
            Ok(extracted) if !extracted.text.trim().is_empty() => {
                output.page_count += extracted.page_count.unwrap_or(0);
                texts.push(extracted.text);
            }
            Ok(_) => warn!(file = %file.file_name, "No text extracted"),
            Err(e) => warn!(file = %file.file_name, error = %e, "Text extraction failed"),
        }
    }

    if texts.is_empty() {
        anyhow::bail!("No text could be extracted from the tender documents");
    }

    output.document_count = texts.len();
    output.document_text = texts.join("\n\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisType, InitiateAnalysisRequest};
    use parking_lot::Mutex;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticDocuments(Vec<LocalTenderFile>);

    #[axum::async_trait]
    impl DocumentSource for StaticDocuments {
        async fn tender_files(&self, _tender_id: Uuid) -> anyhow::Result<Vec<LocalTenderFile>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordedSteps(Mutex<Vec<AnalysisStep>>);

    #[axum::async_trait]
    impl ProgressSink for RecordedSteps {
        async fn record(&self, step: AnalysisStep) -> anyhow::Result<()> {
            self.0.lock().push(step);
            Ok(())
        }
    }

    impl RecordedSteps {
        fn steps(&self) -> Vec<AnalysisStep> {
            self.0.lock().clone()
        }
    }

    fn full_options() -> AnalysisOptions {
        InitiateAnalysisRequest {
            analysis_type: AnalysisType::Full,
            ..Default::default()
        }
        .options()
    }

    async fn respond(server: &MockServer, route: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_ai(server: &MockServer, risk_status: u16) {
        respond(server, "/v1/tender/extract-text", 200, json!({"text": "Construction of 4 km road", "page_count": 3})).await;
        respond(server, "/v1/tender/info", 200, json!({"tender_info": {"title": "Road works"}})).await;
        respond(
            server,
            "/v1/tender/risks",
            risk_status,
            json!({"risk_score": 0.4, "risks": [], "message": "model overloaded"}),
        )
        .await;
        respond(server, "/v1/tender/rfp-sections", 200, json!({"sections": [{"section_number": "1", "title": "Scope"}]})).await;
        respond(server, "/v1/tender/scope", 200, json!({"items": [{"title": "Earthwork"}]})).await;
        respond(server, "/v1/tender/one-pager", 200, json!({"executive_summary": "Worth bidding"})).await;
    }

    fn tender_file(dir: &tempfile::TempDir) -> LocalTenderFile {
        let path = dir.path().join("nit.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        LocalTenderFile {
            file_name: "nit.pdf".into(),
            mime_type: "application/pdf".into(),
            path,
        }
    }

    #[tokio::test]
    async fn missing_documents_fail_the_analysis() {
        let server = MockServer::start().await;
        mount_ai(&server, 200).await;
        let ai = AiClient::new(&server.uri(), "internal-token", 5).unwrap();
        let progress = RecordedSteps::default();

        let result = execute_plan(
            &ai,
            &StaticDocuments(Vec::new()),
            &progress,
            Uuid::new_v4(),
            &full_options(),
            None,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            progress.steps(),
            vec![AnalysisStep::Initializing, AnalysisStep::ParsingDocument]
        );
    }

    #[tokio::test]
    async fn unextractable_documents_fail_the_analysis() {
        let server = MockServer::start().await;
        respond(&server, "/v1/tender/extract-text", 200, json!({"text": "   "})).await;
        let ai = AiClient::new(&server.uri(), "internal-token", 5).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = execute_plan(
            &ai,
            &StaticDocuments(vec![tender_file(&dir)]),
            &RecordedSteps::default(),
            Uuid::new_v4(),
            &full_options(),
            None,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("No text could be extracted"));
    }

    #[tokio::test]
    async fn optional_step_failures_are_skipped() {
        let server = MockServer::start().await;
        mount_ai(&server, 503).await;
        let ai = AiClient::new(&server.uri(), "internal-token", 5).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let progress = RecordedSteps::default();

        let output = execute_plan(
            &ai,
            &StaticDocuments(vec![tender_file(&dir)]),
            &progress,
            Uuid::new_v4(),
            &full_options(),
            Some("req-7"),
        )
        .await
        .unwrap();

        assert!(output.risk_assessment.is_none());
        assert_eq!(output.tender_info.title.as_deref(), Some("Road works"));
        assert_eq!(output.rfp_analysis.map(|r| r.sections.len()), Some(1));
        assert_eq!(output.scope_of_work.map(|s| s.items.len()), Some(1));
        assert_eq!(output.one_pager.map(|p| p.executive_summary).as_deref(), Some("Worth bidding"));
        assert_eq!(output.document_count, 1);
        assert_eq!(output.page_count, 3);

        let steps = progress.steps();
        assert!(steps.contains(&AnalysisStep::AnalyzingRisk));
        assert!(steps.windows(2).all(|w| w[0].progress() <= w[1].progress()));
        assert_eq!(steps.last(), Some(&AnalysisStep::GeneratingSummary));
    }
}
