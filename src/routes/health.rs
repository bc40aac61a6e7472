use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::db;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub database: &'static str,
    pub redis: &'static str,
    pub ai_service: &'static str,
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_ok, redis_result, ai_result) = tokio::join!(
        db::health_check(&state.db),
        state.cache.health_check(),
        state.ai_client.health_check(),
    );

    let (status_code, response) = summarize(db_ok, redis_result.is_ok(), ai_result.is_ok());
    (status_code, Json(response))
}

/// Overall status from individual checks; the database is the only critical one.
fn summarize(db_ok: bool, redis_ok: bool, ai_ok: bool) -> (StatusCode, HealthResponse) {
    let label = |ok: bool| if ok { "ok" } else { "error" };

    let status = match (db_ok, redis_ok && ai_ok) {
        (true, true) => "healthy",
        (true, false) => "degraded",
        (false, _) => "unhealthy",
    };
    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            services: ServiceHealth {
                database: label(db_ok),
                redis: label(redis_ok),
                ai_service: label(ai_ok),
            },
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_outage_is_unhealthy() {
        let (code, body) = summarize(false, true, true);
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "unhealthy");
        assert_eq!(body.services.database, "error");
    }

    #[test]
    fn optional_service_outage_is_degraded() {
        let (code, body) = summarize(true, false, true);
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.services.redis, "error");

        let (_, body) = summarize(true, true, true);
        assert_eq!(body.status, "healthy");
    }
}
