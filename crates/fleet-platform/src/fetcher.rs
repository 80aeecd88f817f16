//! Artifact fetchers — the network seam of the platform resolver.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};

/// Downloads a URL into a local file.
///
/// Implementations write to `dest` only; the resolver owns the temp-file
/// and rename protocol around it.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> PlatformResult<u64>;
}

/// HTTP(S) fetcher backed by reqwest. `file://` URLs are copied locally.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// `timeout` bounds the whole transfer, body included.
    pub fn new(timeout: Duration) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("fleet/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Download {
                reference: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> PlatformResult<u64> {
        if let Some(local) = url.strip_prefix("file://") {
            let bytes = tokio::fs::copy(local, dest).await?;
            debug!(%url, bytes, "artifact copied from local file");
            return Ok(bytes);
        }

        let download_err = |e: reqwest::Error| PlatformError::Download {
            reference: url.to_string(),
            reason: e.to_string(),
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(download_err)? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(%url, bytes = written, "artifact downloaded");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_urls_are_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("server.jar");
        std::fs::write(&src, b"jar bytes").unwrap();
        let dest = dir.path().join("copy.jar");

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let url = format!("file://{}", src.display());
        let written = fetcher.fetch(&url, &dest).await.unwrap();

        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jar bytes");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(Duration::from_millis(500)).unwrap();
        let result = fetcher
            .fetch("http://127.0.0.1:1/paper.jar", &dir.path().join("x.jar"))
            .await;
        assert!(matches!(result, Err(PlatformError::Download { .. })));
    }
}
