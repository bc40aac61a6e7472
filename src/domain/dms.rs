use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local cache state of a remote document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Pending,
    Cached,
    Failed,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Cached => "cached",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cached" => Self::Cached,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// DMS document metadata
#[derive(Debug, Clone, Serialize)]
pub struct DmsDocumentResponse {
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: Option<i64>,
    pub storage_provider: String,
    pub source_url: Option<String>,
    pub is_tender_file: bool,
    pub is_cached: bool,
    pub cache_status: CacheStatus,
    pub cache_error: Option<String>,
    pub scraped_tender_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of `POST /dms/documents/:id/cache`
#[derive(Debug, Clone, Serialize)]
pub struct CacheDocumentResponse {
    pub id: Uuid,
    pub cache_status: CacheStatus,
    pub size_bytes: Option<i64>,
    pub already_cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_cache_status_reads_as_pending() {
        assert_eq!(CacheStatus::parse("cached"), CacheStatus::Cached);
        assert_eq!(CacheStatus::parse("failed"), CacheStatus::Failed);
        assert_eq!(CacheStatus::parse("downloading"), CacheStatus::Pending);
        assert_eq!(CacheStatus::Cached.as_str(), "cached");
    }
}
