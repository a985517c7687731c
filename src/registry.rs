//! In-memory registry of backup job snapshots
//!
//! The registry is the single source of truth for backup job state. It is
//! constructed explicitly and shared by handle; all mutation goes through
//! [`JobRegistry::advance`] and [`JobRegistry::fail`], which only ever move a
//! job forward. Terminal jobs are evicted once they have been terminal for
//! longer than the configured TTL.

use crate::error::{Error, Result};
use crate::types::{BackupArtifact, BackupJob, BackupJobId, BackupStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Entry {
    job: BackupJob,
    terminal_since: Option<Instant>,
}

/// Concurrency-safe map of backup job id to job snapshot
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<BackupJobId, Entry>>>,
    ttl: Duration,
}

impl JobRegistry {
    /// Empty registry evicting terminal jobs after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Add a job, replacing any snapshot with the same id
    pub async fn insert(&self, job: BackupJob) {
        let terminal_since = job.status.is_terminal().then(Instant::now);
        self.jobs
            .lock()
            .await
            .insert(job.id, Entry { job, terminal_since });
    }

    /// Current snapshot of a job
    pub async fn get(&self, id: BackupJobId) -> Option<BackupJob> {
        self.jobs.lock().await.get(&id).map(|e| e.job.clone())
    }

    /// Move a job to `status` and raise its progress to at least `progress`
    ///
    /// Backward transitions and changes to terminal jobs are rejected with
    /// [`Error::InvalidState`]. Progress never decreases.
    pub async fn advance(
        &self,
        id: BackupJobId,
        status: BackupStatus,
        progress: u8,
    ) -> Result<BackupJob> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("backup job {} not found", id)))?;

        let current = entry.job.status;
        if !current.can_transition_to(status) {
            return Err(Error::InvalidState {
                id: id.to_string(),
                operation: format!("move to {}", status.as_str()),
                current_state: current.as_str().to_string(),
            });
        }

        entry.job.status = status;
        entry.job.progress = entry.job.progress.max(progress.min(100));
        entry.job.updated_at = Utc::now();
        if status.is_terminal() && entry.terminal_since.is_none() {
            entry.terminal_since = Some(Instant::now());
        }

        Ok(entry.job.clone())
    }

    /// Mark a non-terminal job as failed with `error`
    pub async fn fail(&self, id: BackupJobId, error: impl Into<String>) -> Result<BackupJob> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("backup job {} not found", id)))?;

        if entry.job.status.is_terminal() {
            return Err(Error::InvalidState {
                id: id.to_string(),
                operation: "fail".to_string(),
                current_state: entry.job.status.as_str().to_string(),
            });
        }

        entry.job.status = BackupStatus::Failed;
        entry.job.error = Some(error.into());
        entry.job.updated_at = Utc::now();
        entry.terminal_since = Some(Instant::now());

        Ok(entry.job.clone())
    }

    /// Attach the staged artifacts to a job that is still running
    pub async fn record_artifacts(
        &self,
        id: BackupJobId,
        artifacts: Vec<BackupArtifact>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("backup job {} not found", id)))?;

        if entry.job.status != BackupStatus::Running {
            return Err(Error::InvalidState {
                id: id.to_string(),
                operation: "record artifacts for".to_string(),
                current_state: entry.job.status.as_str().to_string(),
            });
        }

        entry.job.artifacts = artifacts;
        entry.job.updated_at = Utc::now();
        Ok(())
    }

    /// Drop a job regardless of state
    pub async fn remove(&self, id: BackupJobId) -> Option<BackupJob> {
        self.jobs.lock().await.remove(&id).map(|e| e.job)
    }

    /// Number of tracked jobs
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Whether no jobs are tracked
    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Evict jobs that have been terminal for longer than the TTL as of `now`
    pub async fn evict_expired_at(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.terminal_since {
            Some(since) => now.saturating_duration_since(since) <= ttl,
            None => true,
        });
        before - jobs.len()
    }

    /// Evict expired terminal jobs
    pub async fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now()).await
    }

    /// Run eviction every `interval` until `shutdown` fires
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("registry sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.evict_expired().await;
                        if evicted > 0 {
                            info!(evicted, "evicted expired backup jobs");
                        }
                    }
                }
            }
        })
    }
}
