use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique scratch location for content fetched under `cid`
///
/// Concurrent fetches of one identifier get distinct files.
pub fn scratch_path(dir: &Path, cid: &str, suffix: &str) -> PathBuf {
    let stem: String = cid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{}-{}.{}", stem, Uuid::new_v4().simple(), suffix))
}

/// Deletes served scratch files once their grace period is over
#[derive(Clone, Debug)]
pub struct ScratchReaper {
    grace_period: Duration,
}

impl ScratchReaper {
    /// Reaper that waits `grace_period` before deleting
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Delete `path` after the grace period
    pub fn schedule(&self, path: PathBuf) -> JoinHandle<()> {
        let grace_period = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(?path, "removed served scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(?path, error = %e, "failed to remove scratch file"),
            }
        })
    }
}
