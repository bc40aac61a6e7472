//! TenderIQ tender listing routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::TenderFilterQuery;
use crate::error::ApiError;

/// Scrape runs available in the date selector
pub async fn list_scraped_dates(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let dates = state.tenders.scraped_dates().await?;
    Ok(Json(dates))
}

/// Filtered tender listing
pub async fn list_tenders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenderFilterQuery>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let today = Utc::now().date_naive();
    let page = state.tenders.filtered_tenders(&query, today).await?;
    Ok(page)
}

/// Full tender with its files
pub async fn get_tender(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let tender = state.tenders.tender_details(tender_id).await?;
    Ok(Json(tender))
}
