//! DMS document access backed by the remote file cache.

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{CacheDocumentResponse, CacheStatus, DmsDocumentResponse};
use crate::error::{ApiError, ApiResult};
use crate::services::analysis_pipeline::{DocumentSource, LocalTenderFile};
use crate::services::file_cache::{guess_mime_type, CachedFile, FetchError, RemoteFile, RemoteFileCache};

/// Documents fetched concurrently when preparing a tender for analysis
const PREFETCH_CONCURRENCY: usize = 4;

/// Database row for DMS document
#[derive(Debug, sqlx::FromRow)]
struct DmsDocumentRow {
    id: Uuid,
    folder_id: Option<Uuid>,
    name: String,
    original_filename: String,
    mime_type: String,
    size_bytes: Option<i64>,
    storage_path: Option<String>,
    storage_provider: String,
    source_url: Option<String>,
    is_tender_file: bool,
    is_cached: bool,
    cache_status: String,
    cache_error: Option<String>,
    scraped_tender_file_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&DmsDocumentRow> for DmsDocumentResponse {
    fn from(row: &DmsDocumentRow) -> Self {
        Self {
            id: row.id,
            folder_id: row.folder_id,
            name: row.name.clone(),
            original_filename: row.original_filename.clone(),
            mime_type: row.mime_type.clone(),
            size_bytes: row.size_bytes,
            storage_provider: row.storage_provider.clone(),
            source_url: row.source_url.clone(),
            is_tender_file: row.is_tender_file,
            is_cached: row.is_cached,
            cache_status: CacheStatus::parse(&row.cache_status),
            cache_error: row.cache_error.clone(),
            scraped_tender_file_id: row.scraped_tender_file_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const DOCUMENT_COLUMNS: &str = r#"
    d.id, d.folder_id, d.name, d.original_filename, d.mime_type, d.size_bytes,
    d.storage_path, d.storage_provider, d.source_url, d.is_tender_file, d.is_cached,
    d.cache_status, d.cache_error, d.scraped_tender_file_id, d.created_at, d.updated_at
"#;

/// File bytes ready to be served
#[derive(Debug)]
pub struct DocumentContent {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Cache columns written after a fetch attempt
#[derive(Debug, PartialEq)]
struct CacheUpdate {
    status: CacheStatus,
    error: Option<String>,
    storage_path: Option<String>,
    size_bytes: Option<i64>,
}

impl CacheUpdate {
    fn from_fetch(fetched: &Result<CachedFile, FetchError>) -> Self {
        match fetched {
            Ok(cached) => Self {
                status: CacheStatus::Cached,
                error: None,
                storage_path: Some(cached.path.to_string_lossy().to_string()),
                size_bytes: Some(cached.size_bytes as i64),
            },
            Err(e) => Self {
                status: CacheStatus::Failed,
                error: Some(e.to_string()),
                storage_path: None,
                size_bytes: None,
            },
        }
    }
}

/// The file at `storage_path`, if it still exists.
async fn cached_on_disk(storage_path: Option<&str>) -> Option<CachedFile> {
    let path = PathBuf::from(storage_path?);
    let meta = tokio::fs::metadata(&path).await.ok()?;
    meta.is_file().then(|| CachedFile {
        path,
        size_bytes: meta.len(),
        downloaded: false,
    })
}

#[derive(Debug, sqlx::FromRow)]
struct TenderFileRow {
    file_id: Uuid,
    file_name: String,
    file_url: String,
    document_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct DmsService {
    db: PgPool,
    files: Arc<RemoteFileCache>,
}

impl DmsService {
    pub fn new(db: PgPool, files: Arc<RemoteFileCache>) -> Self {
        Self { db, files }
    }

    async fn fetch_row(&self, id: Uuid) -> ApiResult<DmsDocumentRow> {
        sqlx::query_as::<_, DmsDocumentRow>(&format!(
            "SELECT {} FROM dms_documents d WHERE d.id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Document not found"))
    }

    /// Document metadata including cache state.
    pub async fn get_document(&self, id: Uuid) -> ApiResult<DmsDocumentResponse> {
        let row = self.fetch_row(id).await?;
        Ok((&row).into())
    }

    /// Make sure the document is on local disk, downloading it on a miss.
    #[instrument(skip(self, row), fields(document_id = %row.id))]
    async fn ensure_cached(&self, row: &DmsDocumentRow) -> ApiResult<CachedFile> {
        if row.is_cached {
            if let Some(cached) = cached_on_disk(row.storage_path.as_deref()).await {
                return Ok(cached);
            }
            warn!(document_id = %row.id, "Cached file missing on disk, refetching");
        }

        let source_url = match (&row.source_url, row.storage_provider.as_str()) {
            (Some(url), "remote") => url,
            _ => return self.local_file(row).await,
        };

        let fetched = self
            .files
            .ensure_local(RemoteFile {
                id: row.id,
                source_url,
                file_name: &row.original_filename,
            })
            .await;

        self.record_cache_update(row.id, &CacheUpdate::from_fetch(&fetched))
            .await?;
        fetched.map_err(fetch_error_to_api)
    }

    async fn local_file(&self, row: &DmsDocumentRow) -> ApiResult<CachedFile> {
        cached_on_disk(row.storage_path.as_deref())
            .await
            .ok_or_else(|| ApiError::not_found("Document file is not available"))
    }

    async fn record_cache_update(&self, id: Uuid, update: &CacheUpdate) -> ApiResult<()> {
        if let Some(error) = &update.error {
            warn!(document_id = %id, error = %error, "Remote document caching failed");
        }
        sqlx::query(
            r#"
            UPDATE dms_documents
            SET is_cached = $2, cache_status = $3, cache_error = $4,
                storage_path = COALESCE($5, storage_path),
                size_bytes = COALESCE($6, size_bytes),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status == CacheStatus::Cached)
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(&update.storage_path)
        .bind(update.size_bytes)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// File bytes for download, caching on demand.
    pub async fn read_document(&self, id: Uuid) -> ApiResult<DocumentContent> {
        let row = self.fetch_row(id).await?;
        let cached = self.ensure_cached(&row).await?;
        let bytes = tokio::fs::read(&cached.path)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to read cached file: {}", e)))?;

        let mime_type = if row.mime_type == "application/octet-stream" {
            guess_mime_type(&row.original_filename).to_string()
        } else {
            row.mime_type
        };

        Ok(DocumentContent {
            file_name: row.original_filename,
            mime_type,
            bytes,
        })
    }

    /// Prefetch a document into the cache.
    pub async fn cache_document(&self, id: Uuid) -> ApiResult<CacheDocumentResponse> {
        let row = self.fetch_row(id).await?;
        let cached = self.ensure_cached(&row).await?;
        if cached.downloaded {
            info!(document_id = %id, size_bytes = cached.size_bytes, "Document prefetched");
        }

        Ok(CacheDocumentResponse {
            id,
            cache_status: CacheStatus::Cached,
            size_bytes: Some(cached.size_bytes as i64),
            already_cached: !cached.downloaded,
        })
    }

    /// DMS documents linked to a tender's files.
    pub async fn tender_documents(&self, tender_id: Uuid) -> ApiResult<Vec<DmsDocumentResponse>> {
        self.ensure_tender_exists(tender_id).await?;

        let rows = sqlx::query_as::<_, DmsDocumentRow>(&format!(
            r#"
            SELECT {}
            FROM dms_documents d
            JOIN scraped_tender_files f ON d.scraped_tender_file_id = f.id
            WHERE f.tender_id = $1
            ORDER BY d.name
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(tender_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(Into::into).collect())
    }

    async fn ensure_tender_exists(&self, tender_id: Uuid) -> ApiResult<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM scraped_tenders WHERE id = $1)")
                .bind(tender_id)
                .fetch_one(&self.db)
                .await?;
        if exists {
            Ok(())
        } else {
            Err(ApiError::not_found("Tender not found"))
        }
    }

    /// Bring every file of a tender onto local disk. Files that fail to
    /// download are skipped; an empty result means nothing could be fetched.
    pub async fn prefetch_tender_files(&self, tender_id: Uuid) -> anyhow::Result<Vec<LocalTenderFile>> {
        let files = sqlx::query_as::<_, TenderFileRow>(
            r#"
            SELECT f.id AS file_id, f.file_name, f.file_url, d.id AS document_id
            FROM scraped_tender_files f
            LEFT JOIN dms_documents d ON d.scraped_tender_file_id = f.id
            WHERE f.tender_id = $1
            ORDER BY f.file_name
            "#,
        )
        .bind(tender_id)
        .fetch_all(&self.db)
        .await?;

        let local: Vec<LocalTenderFile> = stream::iter(files)
            .map(|file| async move {
                let result = self.prefetch_file(&file).await;
                if let Err(e) = &result {
                    warn!(file_id = %file.file_id, error = %e, "Skipping tender file");
                }
                result.ok()
            })
            .buffer_unordered(PREFETCH_CONCURRENCY)
            .filter_map(|file| async move { file })
            .collect()
            .await;

        Ok(local)
    }

    async fn prefetch_file(&self, file: &TenderFileRow) -> ApiResult<LocalTenderFile> {
        let cached = match file.document_id {
            Some(document_id) => {
                let row = self.fetch_row(document_id).await?;
                self.ensure_cached(&row).await?
            }
            None => self
                .files
                .ensure_local(RemoteFile {
                    id: file.file_id,
                    source_url: &file.file_url,
                    file_name: &file.file_name,
                })
                .await
                .map_err(fetch_error_to_api)?,
        };

        Ok(LocalTenderFile {
            file_name: file.file_name.clone(),
            mime_type: guess_mime_type(&file.file_name).to_string(),
            path: cached.path,
        })
    }
}

#[axum::async_trait]
impl DocumentSource for DmsService {
    async fn tender_files(&self, tender_id: Uuid) -> anyhow::Result<Vec<LocalTenderFile>> {
        self.prefetch_tender_files(tender_id).await
    }
}

fn fetch_error_to_api(error: FetchError) -> ApiError {
    match error {
        FetchError::InvalidUrl(msg) => ApiError::BadRequest(format!("Invalid source URL: {}", msg)),
        FetchError::Io(e) => ApiError::Internal(anyhow::anyhow!("Cache I/O error: {}", e)),
        other => ApiError::BadGateway(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn fetch_errors_map_to_http_statuses() {
        assert_eq!(
            fetch_error_to_api(FetchError::InvalidUrl("ftp://x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            fetch_error_to_api(FetchError::Status(reqwest::StatusCode::NOT_FOUND)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            fetch_error_to_api(FetchError::TooLarge { limit: 10 }).status_code(),
            StatusCode::BAD_GATEWAY
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(
            fetch_error_to_api(FetchError::Io(io)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn successful_fetch_marks_document_cached() {
        let fetched = Ok(CachedFile {
            path: PathBuf::from("/var/cache/tenderiq/ab/nit.pdf"),
            size_bytes: 2048,
            downloaded: true,
        });
        assert_eq!(
            CacheUpdate::from_fetch(&fetched),
            CacheUpdate {
                status: CacheStatus::Cached,
                error: None,
                storage_path: Some("/var/cache/tenderiq/ab/nit.pdf".into()),
                size_bytes: Some(2048),
            }
        );
    }

    #[test]
    fn failed_fetch_keeps_previous_location() {
        let fetched = Err(FetchError::Status(reqwest::StatusCode::NOT_FOUND));
        let update = CacheUpdate::from_fetch(&fetched);
        assert_eq!(update.status, CacheStatus::Failed);
        assert!(update.error.is_some());
        assert_eq!(update.storage_path, None);
        assert_eq!(update.size_bytes, None);
    }

    #[tokio::test]
    async fn cached_file_is_reused_while_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boq.xlsx");
        std::fs::write(&path, b"sheet").unwrap();

        let cached = cached_on_disk(path.to_str()).await.unwrap();
        assert_eq!(cached.size_bytes, 5);
        assert!(!cached.downloaded);

        std::fs::remove_file(&path).unwrap();
        assert!(cached_on_disk(path.to_str()).await.is_none());
        assert!(cached_on_disk(None).await.is_none());
        assert!(cached_on_disk(dir.path().to_str()).await.is_none());
    }
}
