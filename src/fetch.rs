use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::SERVER_IDENT;

/// Errors surfaced by an upstream fetch. Client errors and local IO errors
/// fail the fetch immediately; server and transport errors are retried.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream returned client error {0}")]
    UpstreamClient(StatusCode),

    #[error("upstream returned {status} after {attempts} attempts")]
    UpstreamServer { status: StatusCode, attempts: u32 },

    #[error("upstream unreachable after {attempts} attempts")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to persist downloaded file")]
    Persist(#[from] tempfile::PersistError),

    #[error("failed to build http client")]
    ClientBuild(#[source] reqwest::Error),
}

// Outcome of one attempt, classified for the retry loop.
enum AttemptError {
    Status(StatusCode),
    Transport(reqwest::Error),
    Io(std::io::Error),
    Persist(tempfile::PersistError),
}

/// Single-shot HTTP/1.1 GET client against the upstream mirror. Redirects
/// are not followed; each fetch opens its own connection.
pub struct FetchClient {
    client: reqwest::Client,
    upstream: String,
    max_retries: u32,
}

impl FetchClient {
    pub fn new(upstream: &str, config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .user_agent(SERVER_IDENT.as_str())
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(FetchClient {
            client,
            upstream: upstream.to_string(),
            max_retries: config.max_retries().max(1),
        })
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Download `request_path` from the upstream into the cache tree. The
    /// file appears at its final path only once fully written.
    pub async fn fetch(&self, request_path: &str, cache_root: &Path) -> Result<(), FetchError> {
        let relative = request_path.trim_start_matches('/');
        let url = format!("http://{}/{}", self.upstream, relative);
        let destination = cache_root.join(relative);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fetch(&url, &destination).await {
                Ok(()) => {
                    info!(path = request_path, "fetched from upstream");
                    return Ok(());
                }
                Err(AttemptError::Status(status)) if status.is_client_error() => {
                    warn!(path = request_path, %status, "upstream rejected request");
                    return Err(FetchError::UpstreamClient(status));
                }
                Err(AttemptError::Io(err)) => return Err(FetchError::Io(err)),
                Err(AttemptError::Persist(err)) => return Err(FetchError::Persist(err)),
                Err(retryable) if attempt < self.max_retries => {
                    // Exponential backoff: 1s, 2s, 4s, ...
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    match &retryable {
                        AttemptError::Status(status) => warn!(
                            path = request_path, %status, attempt,
                            backoff_secs = backoff.as_secs(),
                            "upstream error, retrying"
                        ),
                        AttemptError::Transport(err) => warn!(
                            path = request_path, error = %err, attempt,
                            backoff_secs = backoff.as_secs(),
                            "fetch failed, retrying"
                        ),
                        _ => {}
                    }
                    tokio::time::sleep(backoff).await;
                }
                Err(AttemptError::Status(status)) => {
                    return Err(FetchError::UpstreamServer {
                        status,
                        attempts: self.max_retries,
                    })
                }
                Err(AttemptError::Transport(source)) => {
                    return Err(FetchError::Transport {
                        attempts: self.max_retries,
                        source,
                    })
                }
            }
        }
    }

    async fn try_fetch(&self, url: &str, destination: &Path) -> Result<(), AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AttemptError::Io)?;
        }

        // Stream into a temp file next to the destination, then rename so a
        // partial download is never visible as a cached file.
        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(parent).map_err(AttemptError::Io)?;
        let mut file = tokio::fs::File::from_std(temp.reopen().map_err(AttemptError::Io)?);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AttemptError::Transport)?;
            file.write_all(&chunk).await.map_err(AttemptError::Io)?;
        }
        file.flush().await.map_err(AttemptError::Io)?;
        drop(file);

        temp.persist(destination).map_err(AttemptError::Persist)?;
        Ok(())
    }
}
