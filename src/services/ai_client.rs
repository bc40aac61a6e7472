//! AI service client used by the tender analysis processor.
//!
//! Provides type-safe methods for:
//! - Document text extraction (multipart upload)
//! - Tender info extraction
//! - Risk assessment
//! - RFP section and scope of work extraction
//! - One-pager generation

use anyhow::{Context, Result};
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::domain::ai::{
    ExtractedText, OnePager, OnePagerInput, RfpAnalysis, RiskAssessment, ScopeOfWork, TenderInfo,
};
use crate::error::ApiError;

/// Client for the AI service.
#[derive(Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
    token: String,
}

/// Error response from AI service.
#[derive(Debug, Deserialize)]
struct AiErrorResponse {
    message: String,
}

/// Body shared by the text-based extraction endpoints.
#[derive(Serialize)]
struct DocumentRequest<'a> {
    document_text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tender_info: Option<&'a TenderInfo>,
}

impl AiClient {
    /// Create a new AI service client.
    pub fn new(base_url: &str, token: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, "AI client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, path: &str, request_id: Option<&str>) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "AI service request");

        let req = self
            .client
            .post(&url)
            .header("X-Internal-Token", &self.token);

        match request_id {
            Some(rid) => req.header("x-request-id", rid),
            None => req,
        }
    }

    /// Send a prepared request and decode the JSON response.
    async fn send<R: DeserializeOwned>(&self, req: RequestBuilder) -> Result<R, ApiError> {
        let response = req.send().await.map_err(|e| {
            error!(error = %e, "AI service request failed");
            ApiError::BadGateway(format!("AI service unavailable: {}", e))
        })?;

        let status = response.status();

        if status.is_success() {
            return response.json::<R>().await.map_err(|e| {
                error!(error = %e, "Failed to parse AI service response");
                ApiError::BadGateway(format!("Invalid AI service response: {}", e))
            });
        }

        let message = response
            .json::<AiErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("AI service error: {}", status));

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ApiError::BadRequest(message))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("AI service authentication failed");
                Err(ApiError::Internal(anyhow::anyhow!("AI service auth error")))
            }
            _ => {
                error!(status = %status, message = %message, "AI service error");
                Err(ApiError::BadGateway(message))
            }
        }
    }

    /// Make a JSON POST request to the AI service.
    async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
        request_id: Option<&str>,
    ) -> Result<R, ApiError> {
        self.send(self.request(path, request_id).json(body)).await
    }

    /// Check AI service health.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("AI service health check failed")?
            .error_for_status()
            .context("AI service unhealthy")?;

        Ok(())
    }

    /// Extract plain text from a tender document.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn extract_text(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        request_id: Option<&str>,
    ) -> Result<ExtractedText, ApiError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| ApiError::bad_request(format!("Invalid mime type: {}", e)))?;
        let form = multipart::Form::new().part("file", part);

        self.send(
            self.request("/v1/tender/extract-text", request_id)
                .multipart(form),
        )
        .await
    }

    /// Extract structured tender header information.
    #[instrument(skip(self, document_text))]
    pub async fn extract_tender_info(
        &self,
        document_text: &str,
        request_id: Option<&str>,
    ) -> Result<TenderInfo, ApiError> {
        #[derive(Deserialize)]
        struct Response {
            tender_info: TenderInfo,
        }

        let response: Response = self
            .post(
                "/v1/tender/info",
                &DocumentRequest {
                    document_text,
                    tender_info: None,
                },
                request_id,
            )
            .await?;

        Ok(response.tender_info)
    }

    /// Assess tender risks.
    #[instrument(skip(self, document_text, tender_info))]
    pub async fn assess_risks(
        &self,
        document_text: &str,
        tender_info: &TenderInfo,
        request_id: Option<&str>,
    ) -> Result<RiskAssessment, ApiError> {
        self.post(
            "/v1/tender/risks",
            &DocumentRequest {
                document_text,
                tender_info: Some(tender_info),
            },
            request_id,
        )
        .await
    }

    /// Extract RFP sections and their requirements.
    #[instrument(skip(self, document_text))]
    pub async fn extract_rfp_sections(
        &self,
        document_text: &str,
        request_id: Option<&str>,
    ) -> Result<RfpAnalysis, ApiError> {
        self.post(
            "/v1/tender/rfp-sections",
            &DocumentRequest {
                document_text,
                tender_info: None,
            },
            request_id,
        )
        .await
    }

    /// Extract the scope of work.
    #[instrument(skip(self, document_text))]
    pub async fn extract_scope(
        &self,
        document_text: &str,
        request_id: Option<&str>,
    ) -> Result<ScopeOfWork, ApiError> {
        self.post(
            "/v1/tender/scope",
            &DocumentRequest {
                document_text,
                tender_info: None,
            },
            request_id,
        )
        .await
    }

    /// Generate the one-page summary.
    #[instrument(skip(self, input))]
    pub async fn generate_one_pager(
        &self,
        input: &OnePagerInput<'_>,
        request_id: Option<&str>,
    ) -> Result<OnePager, ApiError> {
        self.post("/v1/tender/one-pager", input, request_id).await
    }
}
