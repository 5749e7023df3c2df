use std::fs;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::AsyncSeekExt;
use tracing::{info, warn};

use crate::fetch::{FetchClient, FetchError};
use crate::http::{Body, HttpVersion, Response};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// On-disk file cache backed by the upstream mirror. Request paths map
/// directly onto the cache tree; the filesystem is the only metadata store,
/// so a file exists on disk exactly when it is cached.
pub struct FileCache {
    cache_dir: PathBuf,
    fetcher: FetchClient,
    // Per-path fetch gates: the first miss downloads, concurrent misses of
    // the same path wait on its gate and re-check the disk.
    inflight: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileCache {
    pub fn new(cache_dir: impl Into<PathBuf>, fetcher: FetchClient) -> Self {
        let cache_dir = cache_dir.into();
        ensure_dir(&cache_dir);
        FileCache {
            cache_dir,
            fetcher,
            inflight: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn set_cache_dir(&mut self, cache_dir: impl Into<PathBuf>) {
        self.cache_dir = cache_dir.into();
        ensure_dir(&self.cache_dir);
    }

    /// Map a request path onto the cache tree, stripping the leading slash.
    pub fn cache_path(&self, request_path: &str) -> PathBuf {
        self.cache_dir.join(request_path.trim_start_matches('/'))
    }

    pub fn is_cached(&self, request_path: &str) -> bool {
        self.cache_path(request_path).is_file()
    }

    /// Entity tag for a cached file: `"<size>-<mtime_seconds>"`, quotes
    /// included so the header value round-trips byte-for-byte.
    pub fn generate_etag(&self, request_path: &str) -> std::io::Result<String> {
        let metadata = fs::metadata(self.cache_path(request_path))?;
        Ok(format!("\"{}-{}\"", metadata.len(), mtime_seconds(&metadata)))
    }

    /// Serve the full file, fetching from upstream on miss.
    pub async fn serve(
        &self,
        request_path: &str,
        version: HttpVersion,
    ) -> Result<Response, CacheError> {
        self.ensure_cached(request_path).await?;
        self.file_response(request_path, version).await
    }

    /// Serve a single byte range. An absent or unsatisfiable Range falls
    /// back to a full 200 response rather than a 416.
    pub async fn serve_range(
        &self,
        request_path: &str,
        version: HttpVersion,
        range_header: &str,
    ) -> Result<Response, CacheError> {
        self.ensure_cached(request_path).await?;

        let mut file = tokio::fs::File::open(self.cache_path(request_path)).await?;
        let metadata = file.metadata().await?;
        let size = metadata.len();

        let Some((start, end)) = parse_range(range_header, size) else {
            return self.file_response(request_path, version).await;
        };

        file.seek(SeekFrom::Start(start)).await?;

        Ok(Response::new(206, version)
            .with_header("Content-Type", "application/octet-stream")
            .with_header("Last-Modified", &format_mtime(&metadata))
            .with_header("ETag", &etag_of(&metadata))
            .with_header("Accept-Ranges", "bytes")
            .with_header("Content-Range", &format_range(start, end, size))
            .with_body(Body::File {
                file,
                len: end - start + 1,
            }))
    }

    /// Revalidate against If-None-Match / If-Modified-Since. ETag match
    /// wins; an unparseable date counts as modified.
    pub async fn serve_conditional(
        &self,
        request_path: &str,
        version: HttpVersion,
        if_modified_since: &str,
        if_none_match: &str,
    ) -> Result<Response, CacheError> {
        self.ensure_cached(request_path).await?;

        let etag = self.generate_etag(request_path)?;
        if !if_none_match.is_empty() && if_none_match == etag {
            return Ok(not_modified(&etag, version));
        }

        if !if_modified_since.is_empty() {
            if let Ok(client_time) = httpdate::parse_http_date(if_modified_since) {
                let metadata = fs::metadata(self.cache_path(request_path))?;
                if mtime_truncated(&metadata) <= client_time {
                    return Ok(not_modified(&etag, version));
                }
            }
        }

        self.file_response(request_path, version).await
    }

    /// Fetch on miss, deduplicating concurrent fetches of the same path.
    async fn ensure_cached(&self, request_path: &str) -> Result<(), CacheError> {
        if self.is_cached(request_path) {
            return Ok(());
        }

        let gate = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(request_path.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = gate.lock().await;
            if self.is_cached(request_path) {
                Ok(())
            } else {
                info!(path = request_path, "cache miss, fetching from upstream");
                self.fetcher
                    .fetch(request_path, &self.cache_dir)
                    .await
                    .map_err(CacheError::from)
            }
        };

        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(request_path) {
            // Drop the gate once no other waiter holds it.
            if Arc::strong_count(existing) <= 2 {
                inflight.remove(request_path);
            }
        }

        result
    }

    async fn file_response(
        &self,
        request_path: &str,
        version: HttpVersion,
    ) -> Result<Response, CacheError> {
        let file = tokio::fs::File::open(self.cache_path(request_path)).await?;
        let metadata = file.metadata().await?;
        let len = metadata.len();

        Ok(Response::new(200, version)
            .with_header("Content-Type", "application/octet-stream")
            .with_header("Last-Modified", &format_mtime(&metadata))
            .with_header("ETag", &etag_of(&metadata))
            .with_body(Body::File { file, len }))
    }
}

fn ensure_dir(dir: &Path) {
    if !dir.exists() {
        if let Err(err) = fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %err, "failed to create cache directory");
        }
    }
}

fn not_modified(etag: &str, version: HttpVersion) -> Response {
    Response::new(304, version)
        .with_header("ETag", etag)
        .with_header("Date", &httpdate::fmt_http_date(SystemTime::now()))
}

fn mtime_seconds(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// Modification time truncated to whole seconds, matching the precision of
// the Last-Modified header it is compared against.
fn mtime_truncated(metadata: &fs::Metadata) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_seconds(metadata))
}

fn format_mtime(metadata: &fs::Metadata) -> String {
    httpdate::fmt_http_date(mtime_truncated(metadata))
}

fn etag_of(metadata: &fs::Metadata) -> String {
    format!("\"{}-{}\"", metadata.len(), mtime_seconds(metadata))
}

/// Content-Range value for an inclusive byte range of a `size`-byte file.
pub fn format_range(start: u64, end: u64, size: u64) -> String {
    format!("bytes {start}-{end}/{size}")
}

/// Parse a single-range `bytes=START-END` header against a file of `size`
/// bytes. Returns the inclusive range, or None when the header is malformed
/// or unsatisfiable. The `bytes START-END/SIZE` shape emitted by
/// [`format_range`] is accepted too, so formatted ranges round-trip.
pub fn parse_range(header: &str, size: u64) -> Option<(u64, u64)> {
    let ranges = header
        .strip_prefix("bytes=")
        .or_else(|| header.strip_prefix("bytes "))?
        .trim();
    let ranges = match ranges.split_once('/') {
        Some((head, _)) => head,
        None => ranges,
    };
    let (left, right) = ranges.split_once('-')?;

    let (start, end) = if left.is_empty() {
        // bytes=-N: the last N bytes.
        let n: u64 = right.parse().ok()?;
        if size == 0 {
            return None;
        }
        (size.saturating_sub(n), size - 1)
    } else if right.is_empty() {
        // bytes=A-: from A to the end.
        let start: u64 = left.parse().ok()?;
        if size == 0 {
            return None;
        }
        (start, size - 1)
    } else {
        (left.parse().ok()?, right.parse().ok()?)
    };

    if start < size && end < size && start <= end {
        Some((start, end))
    } else {
        None
    }
}
