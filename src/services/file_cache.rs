//! Local disk cache for remote tender documents.
//!
//! A document is fetched from its source URL at most once: files are written
//! to a temporary name and renamed into place, so readers never observe a
//! partial file. Concurrent requests for the same document wait on a per
//! document lock and then find the file on disk.

use backoff::ExponentialBackoffBuilder;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Remote server returned {0}")]
    Status(StatusCode),

    #[error("File exceeds the {limit} byte cache limit")]
    TooLarge { limit: u64 },

    #[error("Download failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Connection problems, timeouts, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout() || e.is_body(),
            Self::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidUrl(_) | Self::TooLarge { .. } | Self::Io(_) => false,
        }
    }
}

/// Retry schedule for transient download failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

/// A document that lives at a remote URL
#[derive(Debug, Clone, Copy)]
pub struct RemoteFile<'a> {
    pub id: Uuid,
    pub source_url: &'a str,
    pub file_name: &'a str,
}

/// A document present on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// False when the file was already on disk.
    pub downloaded: bool,
}

/// Handle on one document's download lock; drops the map entry with the
/// last handle, including when the request is cancelled.
struct DownloadSlot<'a> {
    cache: &'a RemoteFileCache,
    id: Uuid,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for DownloadSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.cache.locks.lock();
        // Only the map and this handle remain: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

pub struct RemoteFileCache {
    client: Client,
    root: PathBuf,
    max_bytes: u64,
    retry: RetryPolicy,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RemoteFileCache {
    pub fn new(
        root: impl Into<PathBuf>,
        max_bytes: u64,
        timeout_seconds: u64,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("tenderiq-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        let root = root.into();
        info!(root = %root.display(), max_bytes, "Remote file cache initialized");

        Ok(Self {
            client,
            root,
            max_bytes,
            retry,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a document is stored once cached.
    pub fn path_for(&self, id: Uuid, file_name: &str) -> PathBuf {
        self.root.join(id.to_string()).join(sanitize_file_name(file_name))
    }

    /// Return the local copy of `file`, downloading it if it is not on disk.
    #[instrument(skip(self, file), fields(document_id = %file.id))]
    pub async fn ensure_local(&self, file: RemoteFile<'_>) -> Result<CachedFile, FetchError> {
        let url = validate_source_url(file.source_url)?;
        let path = self.path_for(file.id, file.file_name);

        if let Some(size_bytes) = existing_size(&path).await {
            debug!(path = %path.display(), "Cache hit");
            return Ok(CachedFile {
                path,
                size_bytes,
                downloaded: false,
            });
        }

        let slot = self.lock_for(file.id);
        let _guard = slot.lock.lock().await;
        self.fetch_locked(&url, &path).await
    }

    async fn fetch_locked(&self, url: &Url, path: &Path) -> Result<CachedFile, FetchError> {
        // Another request may have finished the download while we waited.
        if let Some(size_bytes) = existing_size(path).await {
            return Ok(CachedFile {
                path: path.to_path_buf(),
                size_bytes,
                downloaded: false,
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size_bytes = self.download_with_retry(url, path).await?;
        info!(url = %url, size_bytes, "Cached remote file");

        Ok(CachedFile {
            path: path.to_path_buf(),
            size_bytes,
            downloaded: true,
        })
    }

    async fn download_with_retry(&self, url: &Url, path: &Path) -> Result<u64, FetchError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_interval(self.retry.max_interval)
            .with_max_elapsed_time(Some(self.retry.max_elapsed))
            .build();

        let this = self;
        backoff::future::retry(policy, move || async move {
            this.download_once(url, path).await.map_err(|e| {
                if e.is_transient() {
                    warn!(url = %url, error = %e, "Transient download failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn download_once(&self, url: &Url, path: &Path) -> Result<u64, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let tmp = temp_path(path);
        let result = self.write_body(response, &tmp).await;
        match result {
            Ok(written) => {
                tokio::fs::rename(&tmp, path).await?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    async fn write_body(&self, response: reqwest::Response, tmp: &Path) -> Result<u64, FetchError> {
        let mut file = tokio::fs::File::create(tmp).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }

        file.sync_all().await?;
        Ok(written)
    }

    fn lock_for(&self, id: Uuid) -> DownloadSlot<'_> {
        let lock = self
            .locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        DownloadSlot {
            cache: self,
            id,
            lock,
        }
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Only absolute http(s) URLs with a host are fetched.
pub fn validate_source_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(FetchError::InvalidUrl(raw.to_string())),
    }
}

/// Reduce a file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Content type from the file extension.
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

async fn existing_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    path.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(20),
            max_elapsed: Duration::from_millis(500),
        }
    }

    fn cache(dir: &tempfile::TempDir, max_bytes: u64) -> Arc<RemoteFileCache> {
        Arc::new(RemoteFileCache::new(dir.path(), max_bytes, 5, fast_retry()).unwrap())
    }

    fn remote<'a>(id: Uuid, url: &'a str) -> RemoteFile<'a> {
        RemoteFile {
            id,
            source_url: url,
            file_name: "NIT document.pdf",
        }
    }

    #[tokio::test]
    async fn second_request_is_served_from_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/nit.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 tender".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir, 1024);
        let url = format!("{}/files/nit.pdf", server.uri());
        let id = Uuid::new_v4();

        let first = cache.ensure_local(remote(id, &url)).await.unwrap();
        assert!(first.downloaded);
        assert_eq!(first.size_bytes, 15);
        assert_eq!(first.path, dir.path().join(id.to_string()).join("NIT_document.pdf"));
        assert_eq!(tokio::fs::read(&first.path).await.unwrap(), b"%PDF-1.7 tender");

        let second = cache.ensure_local(remote(id, &url)).await.unwrap();
        assert!(!second.downloaded);
        assert_eq!(second.path, first.path);
        assert_eq!(cache.pending_locks(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![7u8; 64])
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir, 1024);
        let url = format!("{}/slow.pdf", server.uri());
        let id = Uuid::new_v4();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let url = url.clone();
                tokio::spawn(async move { cache.ensure_local(remote(id, &url)).await })
            })
            .collect();

        let mut downloads = 0;
        for task in tasks {
            let cached = task.await.unwrap().unwrap();
            assert_eq!(cached.size_bytes, 64);
            if cached.downloaded {
                downloads += 1;
            }
        }
        assert_eq!(downloads, 1);
        assert_eq!(cache.pending_locks(), 0);
    }

    #[tokio::test]
    async fn cancelled_download_releases_its_lock() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stalled.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 16])
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir, 1024);
        let url = format!("{}/stalled.pdf", server.uri());
        let id = Uuid::new_v4();

        let waiting = tokio::spawn({
            let cache = cache.clone();
            let url = url.clone();
            async move {
                tokio::time::timeout(
                    Duration::from_millis(150),
                    cache.ensure_local(remote(id, &url)),
                )
                .await
            }
        });
        let downloading =
            tokio::time::timeout(Duration::from_millis(100), cache.ensure_local(remote(id, &url)))
                .await;

        assert!(downloading.is_err());
        assert!(waiting.await.unwrap().is_err());
        assert_eq!(cache.pending_locks(), 0);
    }

    #[tokio::test]
    async fn not_found_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir, 1024);
        let url = format!("{}/missing.pdf", server.uri());

        let err = cache.ensure_local(remote(Uuid::new_v4(), &url)).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(StatusCode::NOT_FOUND)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir, 1024);
        let url = format!("{}/flaky.pdf", server.uri());

        let cached = cache.ensure_local(remote(Uuid::new_v4(), &url)).await.unwrap();
        assert!(cached.downloaded);
        assert_eq!(cached.size_bytes, 2);
    }

    #[tokio::test]
    async fn oversized_files_leave_nothing_behind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir, 1024);
        let url = format!("{}/big.zip", server.uri());
        let id = Uuid::new_v4();

        let err = cache.ensure_local(remote(id, &url)).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 1024 }));

        let doc_dir = dir.path().join(id.to_string());
        let leftovers = std::fs::read_dir(&doc_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(validate_source_url("https://eprocure.gov.in/doc.pdf").is_ok());
        assert!(validate_source_url("ftp://example.com/doc.pdf").is_err());
        assert!(validate_source_url("file:///etc/passwd").is_err());
        assert!(validate_source_url("not a url").is_err());
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("BOQ (final).xlsx"), "BOQ__final_.xlsx");
        assert_eq!(sanitize_file_name(".."), "document");
        assert_eq!(sanitize_file_name(""), "document");
    }

    #[test]
    fn guesses_common_mime_types() {
        assert_eq!(guess_mime_type("NIT.PDF"), "application/pdf");
        assert!(guess_mime_type("boq.xlsx").contains("spreadsheetml"));
        assert_eq!(guess_mime_type("README"), "application/octet-stream");
    }
}
