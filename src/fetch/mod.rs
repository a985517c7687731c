//! Content fetching from a gateway into scratch storage
//!
//! [`ContentFetcher`] is the seam the retrieval pipeline fetches through;
//! [`GatewayFetcher`] is the HTTP implementation. Fetched files belong to the
//! caller, [`ScratchReaper`] deletes served files after a grace period.

mod gateway;
mod scratch;


pub use gateway::GatewayFetcher;
pub use scratch::{ScratchReaper, scratch_path};

use crate::error::FetchError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Content written to scratch storage by a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    /// Scratch file holding the bytes
    pub local_path: PathBuf,
    /// MIME type reported by the gateway, `application/octet-stream` if none
    pub content_type: String,
    /// Number of bytes written
    pub size: u64,
}

/// Retrieves the bytes behind a content identifier
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch `cid` into scratch storage
    ///
    /// Must return [`FetchError::Cancelled`] promptly once `cancel` fires and
    /// must not leave a partial file behind on any error.
    async fn fetch(
        &self,
        cid: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent, FetchError>;
}

/// Reject identifiers that are empty or could address a path outside scratch storage
pub fn validate_identifier(cid: &str) -> Result<(), FetchError> {
    let invalid = cid.trim().is_empty()
        || cid.contains('/')
        || cid.contains('\\')
        || cid.contains("..")
        || cid.chars().any(char::is_control);
    if invalid {
        return Err(FetchError::InvalidIdentifier(cid.to_string()));
    }
    Ok(())
}
