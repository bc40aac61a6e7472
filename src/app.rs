use axum::{http::HeaderValue, Router};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::TokenVerifier;
use crate::config::Settings;
use crate::middleware::request_id_layer;
use crate::routes;
use crate::services::{
    AiClient, AnalysisService, DmsService, RedisCache, TenderActionService, TenderFilterService,
};

/// Largest accepted request body
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Settings,
    pub token_verifier: TokenVerifier,
    pub cache: RedisCache,
    pub ai_client: AiClient,
    pub tenders: TenderFilterService,
    pub tender_actions: TenderActionService,
    pub dms: DmsService,
    pub analysis: AnalysisService,
}

impl AppState {
    pub fn new(
        db: PgPool,
        settings: Settings,
        token_verifier: TokenVerifier,
        cache: RedisCache,
        ai_client: AiClient,
        dms: DmsService,
    ) -> Arc<Self> {
        let tenders = TenderFilterService::new(db.clone(), cache.clone());
        let analysis = AnalysisService::new(
            db.clone(),
            ai_client.clone(),
            dms.clone(),
            settings.analysis_results_ttl_days,
            settings.analysis_stale_after_minutes,
        );
        let tender_actions = TenderActionService::new(db.clone(), analysis.clone());

        Arc::new(Self {
            db,
            settings,
            token_verifier,
            cache,
            ai_client,
            tenders,
            tender_actions,
            dms,
            analysis,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let router = with_middleware(routes::api_router(), &state.settings);
    router.with_state(state)
}

fn with_middleware<S>(router: Router<S>, settings: &Settings) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build trace layer (use DEBUG for spans to reduce overhead at INFO level)
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    // Request ID layers
    let (set_request_id, propagate_request_id) = request_id_layer();

    // Middleware stack (applied bottom-up)
    router
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // In dev mode, use longer preflight cache to reduce OPTIONS requests
    let max_age = if settings.env.is_dev() {
        // Cache preflight for 24 hours in development
        std::time::Duration::from_secs(86400)
    } else {
        // 1 hour in production
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ]))
        .expose_headers([
            axum::http::header::CONTENT_DISPOSITION,
            axum::http::HeaderName::from_static("x-request-id"),
        ])
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::{get, post},
    };
    use tower::ServiceExt;

    fn settings() -> Settings {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".into(),
            database_url: "postgres://localhost/tenderiq".into(),
            database_max_connections: 1,
            run_migrations: false,
            redis_url: "redis://localhost".into(),
            redis_cache_ttl_seconds: 60,
            cors_allow_origins: vec!["http://localhost:3000".into()],
            jwt_secret: "secret".into(),
            jwt_issuer: None,
            ai_service_url: "http://localhost:8001".into(),
            ai_service_token: "token".into(),
            ai_service_timeout_seconds: 5,
            file_cache_dir: "./dms_cache".into(),
            file_cache_max_bytes: 1024,
            file_download_timeout_seconds: 5,
            analysis_results_ttl_days: 7,
            analysis_stale_after_minutes: 30,
            release_date_reconcile_interval_seconds: 3600,
        }
    }

    fn app() -> Router {
        let router = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route("/echo", post(|body: String| async move { body }));
        with_middleware(router, &settings())
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = app()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_propagated() {
        let response = app()
            .oneshot(
                Request::get("/ping")
                    .header("x-request-id", "req-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "req-7");
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let body = "x".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let response = app()
            .oneshot(
                Request::post("/echo")
                    .header("content-length", body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
