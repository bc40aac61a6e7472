use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Redis
    pub redis_url: String,
    pub redis_cache_ttl_seconds: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Auth
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,

    // AI Service
    pub ai_service_url: String,
    pub ai_service_token: String,
    pub ai_service_timeout_seconds: u64,

    // Remote file cache
    pub file_cache_dir: PathBuf,
    pub file_cache_max_bytes: u64,
    pub file_download_timeout_seconds: u64,

    // Analysis
    pub analysis_results_ttl_days: i64,
    pub analysis_stale_after_minutes: i64,

    // Scrape runs
    pub release_date_reconcile_interval_seconds: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = env_or("DATABASE_MAX_CONNECTIONS", 20);
        let run_migrations = env_or("RUN_MIGRATIONS", true);

        // Redis
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379/0".to_string());
        let redis_cache_ttl_seconds = env_or("REDIS_CACHE_TTL_SECONDS", 300); // 5 minutes

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty());

        // AI Service
        let ai_service_url =
            env::var("AI_SERVICE_URL").unwrap_or_else(|_| "http://ai-service:8001".to_string());
        let ai_service_token =
            env::var("AI_SERVICE_TOKEN").context("AI_SERVICE_TOKEN must be set")?;
        let ai_service_timeout_seconds = env_or("AI_SERVICE_TIMEOUT_SECONDS", 120);

        // Remote file cache
        let file_cache_dir = env::var("FILE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./dms_cache"));
        let file_cache_max_bytes = env_or("FILE_CACHE_MAX_BYTES", 200 * 1024 * 1024);
        let file_download_timeout_seconds = env_or("FILE_DOWNLOAD_TIMEOUT_SECONDS", 60);

        // Analysis
        let analysis_results_ttl_days = env_or("ANALYSIS_RESULTS_TTL_DAYS", 7);
        let analysis_stale_after_minutes = env_or("ANALYSIS_STALE_AFTER_MINUTES", 30);

        // Scrape runs
        let release_date_reconcile_interval_seconds =
            env_or("RELEASE_DATE_RECONCILE_INTERVAL_SECONDS", 3600);

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            run_migrations,
            redis_url,
            redis_cache_ttl_seconds,
            cors_allow_origins,
            jwt_secret,
            jwt_issuer,
            ai_service_url,
            ai_service_token,
            ai_service_timeout_seconds,
            file_cache_dir,
            file_cache_max_bytes,
            file_download_timeout_seconds,
            analysis_results_ttl_days,
            analysis_stale_after_minutes,
            release_date_reconcile_interval_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_defaults_to_dev() {
        assert_eq!(Environment::from_str("production"), Environment::Prod);
        assert_eq!(Environment::from_str("PROD"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything-else"), Environment::Dev);
        assert!(Environment::from_str("").is_dev());
    }
}
