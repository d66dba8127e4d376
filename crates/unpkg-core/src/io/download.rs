//! Tarball download coordination.
//!
//! Each tarball is streamed once: the bytes are hashed and piped into the
//! extractor in the same pass, then the digest is checked before the unpacked
//! tree is moved into the cache. Concurrent requests for the same URL join the
//! download already in flight instead of starting their own.

use bytes::Bytes;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use unpkg_schema::{Integrity, StreamHasher};

use crate::io::extract;

/// Outcome of a failed download. `Clone` so every waiter on a shared
/// download receives the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("HTTP error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP status {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Download of {url} timed out after {}s", .after.as_secs())]
    Timeout { url: String, after: Duration },
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Extraction(err.to_string())
    }
}

impl From<extract::ExtractError> for DownloadError {
    fn from(err: extract::ExtractError) -> Self {
        Self::Extraction(err.to_string())
    }
}

type SharedDownload = Shared<BoxFuture<'static, Result<(), DownloadError>>>;

/// Deduplicates and executes tarball downloads into the package cache.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    staging_root: PathBuf,
    timeout: Duration,
    in_flight: Arc<Mutex<HashMap<String, SharedDownload>>>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("staging_root", &self.staging_root)
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// `staging_root` must be on the same filesystem as the destinations
    /// passed to [`Self::ensure_available`].
    pub fn new(client: Client, staging_root: PathBuf, timeout: Duration) -> Self {
        Self {
            client,
            staging_root,
            timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Make sure the tarball at `url` is extracted into `dest`.
    ///
    /// An existing `dest` counts as a cache hit and is not re-verified.
    /// Otherwise the download runs at most once per URL at a time; callers
    /// arriving while it runs wait for, and share, its result.
    pub async fn ensure_available(
        &self,
        url: &str,
        integrity: &Integrity,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            debug!(dest = %dest.display(), "Package already cached");
            return Ok(());
        }

        let download = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(url) {
                debug!(%url, "Joining in-flight download");
                existing.clone()
            } else {
                let download = self.launch(url, integrity, dest);
                in_flight.insert(url.to_string(), download.clone());
                download
            }
        };

        download.await
    }

    /// Number of downloads currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Spawn the download so it finishes even if the caller that started it
    /// goes away. The in-flight entry is removed by the task itself.
    fn launch(&self, url: &str, integrity: &Integrity, dest: &Path) -> SharedDownload {
        let job = DownloadJob {
            client: self.client.clone(),
            url: url.to_string(),
            integrity: integrity.clone(),
            dest: dest.to_path_buf(),
            staging_root: self.staging_root.clone(),
            timeout: self.timeout,
        };
        let in_flight = Arc::clone(&self.in_flight);

        let handle = tokio::spawn(async move {
            let result = job.run().await;
            in_flight.lock().remove(&job.url);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(DownloadError::Extraction(format!("download task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }
}

struct DownloadJob {
    client: Client,
    url: String,
    integrity: Integrity,
    dest: PathBuf,
    staging_root: PathBuf,
    timeout: Duration,
}

impl DownloadJob {
    async fn run(&self) -> Result<(), DownloadError> {
        // A download that finished just before this one was registered
        if tokio::fs::try_exists(&self.dest).await.unwrap_or(false) {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.staging_root).await?;
        let staging = tempfile::Builder::new()
            .prefix(".unpkg-")
            .tempdir_in(&self.staging_root)?;

        info!(url = %self.url, dest = %self.dest.display(), "Downloading package");

        let fetched = match tokio::time::timeout(self.timeout, self.fetch_into(staging.path())).await
        {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout {
                url: self.url.clone(),
                after: self.timeout,
            }),
        };

        match fetched {
            Ok(entries) => {
                self.publish(staging).await?;
                info!(url = %self.url, entries, "Download complete");
                Ok(())
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Download failed");
                discard(staging).await;
                Err(e)
            }
        }
    }

    /// Stream the tarball through the hasher and the extractor at once.
    async fn fetch_into(&self, staging: &Path) -> Result<u64, DownloadError> {
        let transport = |e: reqwest::Error| DownloadError::Transport {
            url: self.url.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        // Channel for pipelined extraction
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(32);
        let reader = StreamReader::new(ReceiverStream::new(rx));

        let pump = async move {
            let mut stream = response.bytes_stream();
            let mut hasher: StreamHasher = self.integrity.hasher();
            let mut sink = Some(tx);

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(transport)?;
                hasher.update(&chunk);

                // Keep hashing even if the extractor stopped reading (tar
                // trailer reached, or it failed and will report why)
                if let Some(tx) = &sink {
                    if tx.send(Ok(chunk)).await.is_err() {
                        sink = None;
                    }
                }
            }

            Ok::<String, DownloadError>(hasher.finalize())
        };

        let (digest, unpacked) = tokio::join!(pump, extract::unpack_tgz(reader, staging));

        let actual = digest?;
        if !self.integrity.matches(&actual) {
            warn!(
                url = %self.url,
                expected = %self.integrity,
                %actual,
                "Integrity check failed"
            );
            return Err(DownloadError::HashMismatch {
                expected: self.integrity.as_str().to_string(),
                actual,
            });
        }

        Ok(unpacked?)
    }

    /// Move a verified staging directory into place.
    async fn publish(&self, staging: TempDir) -> Result<(), DownloadError> {
        if let Some(parent) = self.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staged = staging.keep();
        match tokio::fs::rename(&staged, &self.dest).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staged).await;
                if tokio::fs::try_exists(&self.dest).await.unwrap_or(false) {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

async fn discard(staging: TempDir) {
    let path = staging.path().to_path_buf();
    match tokio::task::spawn_blocking(move || staging.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
        Err(e) => warn!(path = %path.display(), error = %e, "Cleanup task failed"),
    }
}
