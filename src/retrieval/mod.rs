//! Retrieval job coordination
//!
//! [`RetrievalCoordinator`] validates and persists new jobs, runs each one on
//! its own task behind a semaphore, and serves the ownership-checked queries
//! the request layer exposes. The per-job work lives in [`pipeline`].
//!
//! Every job gets a [`CancellationToken`] derived from the coordinator's
//! shutdown token, so cancelling one job or shutting down all of them reaches
//! in-flight transfers.

mod pipeline;


use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{ContentFetcher, ScratchReaper};
use crate::retry::with_retry;
use crate::store::RetrievalStore;
use crate::types::{
    DownloadedFile, Event, FileListPage, FileMetadata, ListQuery, RetrievalCreated,
    RetrievalFormat, RetrievalJob, RetrievalJobId, RetrievalRequest, WalletAddress,
};
use pipeline::PipelineContext;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Interval between checks while waiting for active jobs to drain
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

type ActiveJobs = Arc<Mutex<HashMap<RetrievalJobId, CancellationToken>>>;

/// Creates, runs and serves retrieval jobs
#[derive(Clone)]
pub struct RetrievalCoordinator {
    ctx: Arc<PipelineContext>,
    limiter: Arc<Semaphore>,
    active: ActiveJobs,
    shutdown: CancellationToken,
    accepting: Arc<AtomicBool>,
    reaper: ScratchReaper,
}

impl RetrievalCoordinator {
    /// Coordinator over `store` fetching through `fetcher`
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn RetrievalStore>,
        fetcher: Arc<dyn ContentFetcher>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.retrieval.max_concurrent_jobs.max(1)));
        let reaper = ScratchReaper::new(config.gateway.scratch_grace_period);

        Self {
            ctx: Arc::new(PipelineContext {
                store,
                fetcher,
                event_tx,
                job_files: ScratchReaper::new(config.retrieval.file_retention),
                config,
            }),
            limiter,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            accepting: Arc::new(AtomicBool::new(true)),
            reaper,
        }
    }

    /// Persist a new job for `owner` and start it in the background
    ///
    /// Returns as soon as the pending record is stored. The job waits for a
    /// pool slot while `max_concurrent_jobs` others are running.
    pub async fn create_job(
        &self,
        request: RetrievalRequest,
        owner: &WalletAddress,
    ) -> Result<RetrievalCreated> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        request.validate()?;

        let total_files = request.cids.len() + request.file_paths.len();
        let job = RetrievalJob::pending(request, owner.clone());
        let id = job.id;

        with_retry(&self.ctx.config.persistence.retry, || {
            self.ctx.store.insert_retrieval_job(&job)
        })
        .await?;

        let created = RetrievalCreated {
            id,
            status: job.status,
            message: job.message.clone(),
            progress: job.progress,
            created_at: job.created_at,
            total_files,
        };

        let cancel = self.shutdown.child_token();
        self.active.lock().await.insert(id, cancel.clone());
        self.ctx.event_tx.send(Event::RetrievalQueued { id }).ok();
        tracing::info!(job_id = %id, wallet = %owner, "retrieval job created");

        self.spawn_job(job, cancel);

        Ok(created)
    }

    fn spawn_job(&self, job: RetrievalJob, cancel: CancellationToken) {
        let ctx = Arc::clone(&self.ctx);
        let limiter = Arc::clone(&self.limiter);
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            let id = job.id;

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = limiter.acquire_owned() => permit.ok(),
            };

            let outcome = match permit {
                Some(permit) => {
                    let _permit = permit;
                    pipeline::run_retrieval_pipeline(&ctx, job, &cancel).await
                }
                // Cancelled or shut down while waiting for a slot
                None => pipeline::finish_interrupted(&ctx, job).await,
            };

            if let Err(e) = outcome {
                tracing::error!(job_id = %id, error = %e, "retrieval job aborted");
                ctx.event_tx
                    .send(Event::RetrievalFailed {
                        id,
                        error: e.to_string(),
                    })
                    .ok();
            }

            active.lock().await.remove(&id);
        });
    }

    /// Load a job owned by `caller`
    pub async fn get_job(
        &self,
        id: RetrievalJobId,
        caller: &WalletAddress,
    ) -> Result<RetrievalJob> {
        let job = self
            .ctx
            .store
            .get_retrieval_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("retrieval job {} not found", id)))?;

        if !job.is_owned_by(caller) {
            return Err(Error::Forbidden("access denied".to_string()));
        }
        Ok(job)
    }

    /// Jobs owned by `caller`, newest first
    pub async fn list_jobs(&self, caller: &WalletAddress) -> Result<Vec<RetrievalJob>> {
        self.ctx.store.list_retrieval_jobs(caller).await
    }

    /// Cancel a job owned by `caller`
    ///
    /// The store is updated first, then the job's token fires so an in-flight
    /// transfer stops. Cancelling a finished job is an [`Error::InvalidState`].
    pub async fn cancel_job(
        &self,
        id: RetrievalJobId,
        caller: &WalletAddress,
    ) -> Result<RetrievalJob> {
        let job = self.get_job(id, caller).await?;
        let invalid = |state: &str| Error::InvalidState {
            id: id.to_string(),
            operation: "cancel".to_string(),
            current_state: state.to_string(),
        };

        if job.status.is_terminal() {
            return Err(invalid(job.status.as_str()));
        }

        if !self.ctx.store.cancel_retrieval_job(id).await? {
            // Finished between the read and the update
            let current = self.get_job(id, caller).await?;
            return Err(invalid(current.status.as_str()));
        }

        if let Some(token) = self.active.lock().await.get(&id) {
            token.cancel();
        }
        tracing::info!(job_id = %id, "retrieval job cancelled");

        self.get_job(id, caller).await
    }

    /// One page of the files `owner` has backed up
    pub async fn list_files(
        &self,
        owner: &WalletAddress,
        query: ListQuery,
    ) -> Result<FileListPage> {
        self.ctx
            .store
            .list_user_files(owner, &query.normalized())
            .await
    }

    /// Catalog record of a file owned by `caller`
    pub async fn get_file_metadata(
        &self,
        cid: &str,
        caller: &WalletAddress,
    ) -> Result<FileMetadata> {
        let mut metadata = self
            .ctx
            .store
            .get_file_metadata(cid, caller)
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {} not found", cid)))?;

        if metadata.wallet_address.as_ref() != Some(caller) {
            return Err(Error::Forbidden("access denied".to_string()));
        }

        metadata.gateway = Some(self.ctx.config.gateway.url.clone());
        Ok(metadata)
    }

    /// Fetch one file owned by `caller` for direct download
    ///
    /// The returned scratch file is deleted after the configured grace period.
    pub async fn download_file(
        &self,
        cid: &str,
        format: RetrievalFormat,
        caller: &WalletAddress,
    ) -> Result<DownloadedFile> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let metadata = self.get_file_metadata(cid, caller).await?;

        let cancel = self.shutdown.child_token();
        let content = pipeline::fetch_by_format(&self.ctx, cid, format, caller, &cancel).await?;

        let filename = match format {
            RetrievalFormat::Car => format!("{}.car", cid),
            RetrievalFormat::Metadata => format!("{}_metadata.json", cid),
            RetrievalFormat::Original => Path::new(&metadata.file.file_path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| cid.to_string()),
        };

        self.reaper.schedule(content.local_path.clone());
        tracing::debug!(
            cid,
            format = format.as_str(),
            size = content.size,
            "serving download"
        );

        Ok(DownloadedFile {
            local_path: content.local_path,
            content_type: content.content_type,
            size: content.size,
            filename,
        })
    }

    /// Number of jobs created and not yet finished
    pub async fn active_jobs(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Whether new jobs are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs, cancel the running ones and wait for them to settle
    ///
    /// Returns `false` if jobs were still active when `timeout` ran out.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        tracing::info!(active = self.active_jobs().await, "stopping retrieval jobs");

        let drained = tokio::time::timeout(timeout, async {
            while self.active_jobs().await > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!("all retrieval jobs settled");
        } else {
            tracing::warn!(
                remaining = self.active_jobs().await,
                "timeout waiting for retrieval jobs, proceeding with shutdown"
            );
        }
        drained
    }
}
