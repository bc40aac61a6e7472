//! Tender action, flagged listing and corrigendum routes

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::PaginationParams;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::{ApplyCorrigendumRequest, TenderActionRequest};
use crate::error::ApiError;
use crate::middleware::RequestIdExt;
use crate::services::tender_actions::FlaggedList;

/// Toggle wishlist, favourite or archive, or set the tender status
pub async fn perform_action(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    headers: HeaderMap,
    auth: RequireAuth,
    Json(request): Json<TenderActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = headers.request_id().map(str::to_string);
    let response = state
        .tender_actions
        .perform(auth.user_id, tender_id, &request, request_id)
        .await?;
    Ok(Json(response))
}

pub async fn list_wishlist(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .tender_actions
        .flagged(auth.user_id, FlaggedList::Wishlist, &pagination)
        .await?;
    Ok(page)
}

pub async fn list_favourites(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .tender_actions
        .flagged(auth.user_id, FlaggedList::Favourites, &pagination)
        .await?;
    Ok(page)
}

pub async fn list_archived(
    State(state): State<Arc<AppState>>,
    Query(pagination): Query<PaginationParams>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .tender_actions
        .flagged(auth.user_id, FlaggedList::Archived, &pagination)
        .await?;
    Ok(page)
}

/// The caller's action log for a tender
pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let log = state.tender_actions.action_log(auth.user_id, tender_id).await?;
    Ok(Json(log))
}

/// Field changes in the newest scraped version
pub async fn get_changes(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let changes = state.tender_actions.changes(tender_id).await?;
    Ok(Json(changes))
}

pub async fn apply_corrigendum(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    auth: RequireAuth,
    Json(request): Json<ApplyCorrigendumRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let applied = state
        .tender_actions
        .apply_corrigendum(auth.user_id, tender_id, request.note.as_deref())
        .await?;
    Ok(Json(applied))
}

/// Change history across scraped versions
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(tender_id): Path<Uuid>,
    _auth: RequireAuth,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.tender_actions.history(tender_id).await?;
    Ok(Json(history))
}
