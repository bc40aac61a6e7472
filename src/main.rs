mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::{Context, Result};
use std::sync::Arc;

use services::{AiClient, DmsService, RedisCache, RemoteFileCache, RetryPolicy};
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting TenderIQ backend"
    );

    // Create database pool
    let pool = db::create_pool(&settings).await?;
    if settings.run_migrations {
        db::run_migrations(&pool).await?;
    }

    // Create Redis cache
    let cache = RedisCache::new(&settings.redis_url, settings.redis_cache_ttl_seconds).await?;
    tracing::info!("Redis cache initialized");

    // Create AI service client
    let ai_client = AiClient::new(
        &settings.ai_service_url,
        &settings.ai_service_token,
        settings.ai_service_timeout_seconds,
    )?;

    // Optionally check AI service health (non-blocking)
    tokio::spawn({
        let ai_client = ai_client.clone();
        async move {
            match ai_client.health_check().await {
                Ok(()) => tracing::info!("AI service is healthy"),
                Err(e) => tracing::warn!(error = %e, "AI service health check failed - will retry on first request"),
            }
        }
    });

    // Local cache for remote tender documents
    tokio::fs::create_dir_all(&settings.file_cache_dir)
        .await
        .with_context(|| format!("Failed to create {}", settings.file_cache_dir.display()))?;
    let file_cache = RemoteFileCache::new(
        settings.file_cache_dir.clone(),
        settings.file_cache_max_bytes,
        settings.file_download_timeout_seconds,
        RetryPolicy::default(),
    )?;
    tracing::info!(root = %file_cache.root().display(), "File cache initialized");
    let dms = DmsService::new(pool.clone(), Arc::new(file_cache));

    // JWT verification
    let token_verifier =
        auth::TokenVerifier::new(&settings.jwt_secret, settings.jwt_issuer.as_deref());

    // Create application state
    let state = app::AppState::new(
        pool,
        settings.clone(),
        token_verifier,
        cache,
        ai_client,
        dms,
    );

    // Analyses cannot survive a restart
    match state.analysis.recover_interrupted().await {
        Ok(0) => {}
        Ok(failed) => tracing::warn!(failed, "Marked interrupted analyses as failed"),
        Err(e) => tracing::warn!(error = %e, "Failed to recover interrupted analyses"),
    }

    // Keep release dates in line with the scraped date strings
    tokio::spawn({
        let tenders = state.tenders.clone();
        let period = Duration::from_secs(settings.release_date_reconcile_interval_seconds.max(1));
        async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                match tenders.reconcile_release_dates().await {
                    Ok(0) => {}
                    Ok(updated) => tracing::info!(updated, "Release dates reconciled"),
                    Err(e) => tracing::warn!(error = %e, "Release date reconciliation failed"),
                }
            }
        }
    });

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
