use super::{ContentFetcher, FetchedContent, scratch_path, validate_identifier};
use crate::config::GatewayConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Fetches content over HTTP as `GET {gateway}/{cid}`
#[derive(Clone, Debug)]
pub struct GatewayFetcher {
    client: reqwest::Client,
    base_url: Url,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl GatewayFetcher {
    /// Build a fetcher for the configured gateway
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).map_err(|e| Error::Config {
            message: format!("invalid gateway URL {:?}: {}", config.url, e),
            key: Some("gateway.url".to_string()),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config {
                message: format!("gateway URL {:?} cannot be used as a base", config.url),
                key: Some("gateway.url".to_string()),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("backup-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            scratch_dir: config.scratch_dir.clone(),
            timeout: config.fetch_timeout,
        })
    }

    /// URL the object for `cid` is requested from
    pub fn object_url(&self, cid: &str) -> std::result::Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidIdentifier(cid.to_string()))?
            .pop_if_empty()
            .push(cid);
        Ok(url)
    }

    async fn transfer(
        &self,
        url: &Url,
        dest: &Path,
    ) -> std::result::Result<FetchedContent, FetchError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(FetchedContent {
            local_path: dest.to_path_buf(),
            content_type,
            size,
        })
    }
}

#[async_trait]
impl ContentFetcher for GatewayFetcher {
    async fn fetch(
        &self,
        cid: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchedContent, FetchError> {
        validate_identifier(cid)?;
        let url = self.object_url(cid)?;
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let dest = scratch_path(&self.scratch_dir, cid, "download");

        debug!(%cid, %url, "fetching content");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.transfer(&url, &dest)) => {
                outcome.unwrap_or(Err(FetchError::Timeout(self.timeout)))
            }
        };

        match &result {
            Ok(content) => debug!(%cid, size = content.size, "content fetched"),
            Err(e) => {
                warn!(%cid, error = %e, "content fetch failed");
                if let Err(rm) = tokio::fs::remove_file(&dest).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = ?dest, error = %rm, "failed to remove partial download");
                }
            }
        }

        result
    }
}
