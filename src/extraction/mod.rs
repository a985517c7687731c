//! Container extraction for retrieved content
//!
//! Content fetched in the `original` format may arrive packaged as a CAR
//! container. This module decides when to try unpacking it and runs the
//! extraction off the async runtime.

mod car;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use car::{CarExtractor, CarSummary};

use crate::error::{Error, Result};
use std::path::Path;
use tokio::task::spawn_blocking;
use tracing::info;

/// Whether a fetched payload should be unpacked as a CAR container
///
/// True when the identifier carries a `.car` suffix or the payload is larger
/// than `threshold_bytes`.
pub fn should_extract(cid: &str, size: u64, threshold_bytes: u64) -> bool {
    cid.to_lowercase().ends_with(".car") || size > threshold_bytes
}

/// Unpack the payload of a CAR container into `dest_path`
///
/// Returns the payload size. On error nothing is left at `dest_path` and the
/// container is untouched.
pub async fn extract_payload(archive_path: &Path, dest_path: &Path) -> Result<u64> {
    let archive = archive_path.to_path_buf();
    let dest = dest_path.to_path_buf();

    let summary = spawn_blocking(move || CarExtractor::extract(&archive, &dest))
        .await
        .map_err(|e| Error::Extraction {
            archive: archive_path.to_path_buf(),
            reason: format!("extraction task panicked: {}", e),
        })??;

    info!(
        ?archive_path,
        ?dest_path,
        blocks = summary.blocks,
        payload_size = summary.payload_size,
        "extracted CAR payload"
    );

    Ok(summary.payload_size)
}
