//! Tender analysis routes

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{Accepted, MessageResponse};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{AnalysisListQuery, InitiateAnalysisRequest};
use crate::error::ApiError;
use crate::middleware::RequestIdExt;

/// Start a background analysis of a tender
pub async fn initiate_analysis(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    headers: HeaderMap,
    auth: RequireAuth,
    body: Result<Json<InitiateAnalysisRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = analysis_request(body)?;
    let request_id = headers.request_id().map(str::to_string);

    tracing::info!(
        user_id = %auth.user_id,
        email = ?auth.email,
        tender_id = %tender_id,
        analysis_type = request.analysis_type.as_str(),
        "Analysis requested"
    );

    let initiated = state
        .analysis
        .initiate(auth.user_id, tender_id, &request, request_id)
        .await?;

    Ok(Accepted(initiated))
}

/// The request body, or defaults when none was sent.
fn analysis_request(
    body: Result<Json<InitiateAnalysisRequest>, JsonRejection>,
) -> Result<InitiateAnalysisRequest, ApiError> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(InitiateAnalysisRequest::default()),
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    }
}

/// Status and progress of an analysis
pub async fn get_analysis_status(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.analysis.status(auth.user_id, analysis_id).await?;
    Ok(Json(status))
}

/// Results of a completed analysis
pub async fn get_analysis_results(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let results = state.analysis.results(auth.user_id, analysis_id).await?;
    Ok(Json(results))
}

/// The caller's analyses
pub async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalysisListQuery>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.analysis.list(auth.user_id, &query).await?;
    Ok(page)
}

/// Delete an analysis and its results
pub async fn delete_analysis(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<Uuid>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    state.analysis.delete(auth.user_id, analysis_id).await?;
    Ok(MessageResponse::new("Analysis deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, routing::post, Router};
    use tower::ServiceExt;

    use crate::domain::AnalysisType;

    async fn echo_type(
        body: Result<Json<InitiateAnalysisRequest>, JsonRejection>,
    ) -> Result<String, ApiError> {
        let request = analysis_request(body)?;
        Ok(format!(
            "{}:{:?}",
            request.analysis_type.as_str(),
            request.include_rfp_analysis
        ))
    }

    async fn send(request: Request<Body>) -> (StatusCode, String) {
        let response = Router::new()
            .route("/analyze", post(echo_type))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json_request(body: &str) -> Request<Body> {
        Request::post("/analyze")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_body_uses_defaults() {
        let (status, body) = send(Request::post("/analyze").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("{}:None", AnalysisType::default().as_str()));
    }

    #[tokio::test]
    async fn valid_body_is_used() {
        let (status, body) =
            send(json_request(r#"{"analysis_type": "summary", "include_rfp_analysis": true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "summary:Some(true)");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (status, _) =
            send(json_request(r#"{"analysis_type": "summry", "include_rfp_analysis": "no"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(json_request("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
