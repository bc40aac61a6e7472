//! DMS document routes

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::error::ApiError;

/// Document metadata including cache state
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let document = state.dms.get_document(document_id).await?;
    Ok(Json(document))
}

/// Download file bytes, caching remote documents on demand
pub async fn download_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let content = state.dms.read_document(document_id).await?;

    tracing::debug!(
        user_id = %auth.user_id,
        document_id = %document_id,
        size = content.bytes.len(),
        "Serving document"
    );

    Ok((
        [
            (header::CONTENT_TYPE, content.mime_type),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&content.file_name),
            ),
        ],
        content.bytes,
    ))
}

/// Prefetch a document into the local cache
pub async fn cache_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let cached = state.dms.cache_document(document_id).await?;
    Ok(Json(cached))
}

/// DMS documents linked to a tender's files
pub async fn list_tender_documents(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let documents = state.dms.tender_documents(tender_id).await?;
    Ok(Json(documents))
}

/// `attachment` disposition with quotes and control characters stripped
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}
