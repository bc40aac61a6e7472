pub mod analysis;
pub mod dms;
pub mod health;
pub mod tender_actions;
pub mod tenders;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        .nest("/api/v1", v1_router())
}

fn v1_router() -> Router<Arc<AppState>> {
    Router::new()
        // TenderIQ listing
        .route("/tenderiq/dates", get(tenders::list_scraped_dates))
        .route("/tenderiq/tenders", get(tenders::list_tenders))
        .route("/tenderiq/tenders/:tender_id", get(tenders::get_tender))
        // Tender actions and corrigenda
        .route(
            "/tenderiq/tenders/:tender_id/actions",
            get(tender_actions::list_actions).post(tender_actions::perform_action),
        )
        .route("/tenderiq/wishlist", get(tender_actions::list_wishlist))
        .route("/tenderiq/favourite", get(tender_actions::list_favourites))
        .route("/tenderiq/archived", get(tender_actions::list_archived))
        .route(
            "/tenderiq/tenders/:tender_id/changes",
            get(tender_actions::get_changes),
        )
        .route(
            "/tenderiq/tenders/:tender_id/corrigendum/apply",
            post(tender_actions::apply_corrigendum),
        )
        .route(
            "/tenderiq/tenders/:tender_id/history",
            get(tender_actions::get_history),
        )
        // Analysis
        .route(
            "/tenderiq/analyze/tender/:tender_id",
            post(analysis::initiate_analysis),
        )
        .route(
            "/tenderiq/analyze/status/:analysis_id",
            get(analysis::get_analysis_status),
        )
        .route(
            "/tenderiq/analyze/results/:analysis_id",
            get(analysis::get_analysis_results),
        )
        .route("/tenderiq/analyze/analyses", get(analysis::list_analyses))
        .route(
            "/tenderiq/analyze/:analysis_id",
            delete(analysis::delete_analysis),
        )
        // DMS
        .route("/dms/documents/:document_id", get(dms::get_document))
        .route(
            "/dms/documents/:document_id/download",
            get(dms::download_document),
        )
        .route(
            "/dms/documents/:document_id/cache",
            post(dms::cache_document),
        )
        .route(
            "/dms/tenders/:tender_id/documents",
            get(dms::list_tender_documents),
        )
}
