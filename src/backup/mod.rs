//! Backup job submission and execution
//!
//! Jobs are admitted through a bounded [`BackupQueue`] and executed by a
//! fixed pool of workers. Job state lives in the shared [`JobRegistry`].
//!
//! - [`queue`] - bounded queue and worker pool
//! - [`executor`] - staged execution of one job
//! - [`processing`] - digest, gzip and AES-256-GCM work behind the stages

mod executor;
mod processing;
mod queue;


pub use processing::{EncryptionKey, decompress, decrypt, encrypt};
pub use queue::BackupQueue;

use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::registry::JobRegistry;
use crate::types::{BackupJob, BackupJobId, BackupRequest, BackupSubmitted, Event};
use executor::ExecutorContext;
use queue::SharedReceiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Accepts backup requests and runs them on the worker pool
#[derive(Clone)]
pub struct BackupService {
    registry: JobRegistry,
    queue: BackupQueue,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
    accepting: Arc<AtomicBool>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    rx: SharedReceiver,
    encryption_ready: bool,
}

impl BackupService {
    /// Create the queue and spawn `config.workers` workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: BackupConfig,
        registry: JobRegistry,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let (queue, rx) = BackupQueue::new(config.queue_capacity);
        let shutdown = CancellationToken::new();
        let worker_count = config.workers.max(1);

        let encryption_key = config
            .encryption_key
            .as_deref()
            .map(EncryptionKey::from_passphrase);
        let encryption_ready = encryption_key.is_some();

        let ctx = ExecutorContext {
            registry: registry.clone(),
            config: Arc::new(config),
            event_tx: event_tx.clone(),
            encryption_key,
        };
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));
        let workers = queue::spawn_workers(worker_count, &rx, ctx, shutdown.clone());

        tracing::info!(
            workers = worker_count,
            capacity = queue.capacity(),
            "backup service started"
        );

        Self {
            registry,
            queue,
            event_tx,
            shutdown,
            accepting: Arc::new(AtomicBool::new(true)),
            workers: Arc::new(Mutex::new(workers)),
            rx,
            encryption_ready,
        }
    }

    /// Validate a request, record a pending job and enqueue it
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a malformed request, or one asking for
    ///   encryption while no `backup.encryption_key` is configured
    /// - [`Error::ShuttingDown`] once [`BackupService::stop`] was called
    /// - [`Error::QueueFull`] when the queue is at capacity; the job is kept
    ///   in the registry as failed so it can still be polled
    pub async fn submit(&self, request: BackupRequest) -> Result<BackupSubmitted> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let schedule = request.validate()?;
        if request.options.encryption && !self.encryption_ready {
            return Err(Error::validation(
                "options.encryption",
                "encryption requested but no encryption key is configured",
            ));
        }
        let job = BackupJob::pending(request, schedule);
        let id = job.id;
        let status = job.status;

        if let Some(schedule) = schedule {
            // Recurrence is run by an external scheduler
            tracing::info!(job_id = %id, ?schedule, "recurring backup requested");
        }

        self.registry.insert(job).await;

        match self.queue.schedule(id) {
            Ok(()) => {
                self.event_tx.send(Event::BackupQueued { id }).ok();
                tracing::info!(job_id = %id, "backup job submitted");
                Ok(BackupSubmitted {
                    id,
                    status,
                    message: "Backup job created successfully".to_string(),
                })
            }
            Err(e) => {
                let reason = match &e {
                    Error::QueueFull { .. } => "queue full".to_string(),
                    other => other.to_string(),
                };
                tracing::warn!(job_id = %id, error = %e, "dropping backup job");
                if let Err(fail_err) = self.registry.fail(id, reason.clone()).await {
                    tracing::warn!(job_id = %id, error = %fail_err, "failed to record dropped job");
                }
                self.event_tx.send(Event::BackupDropped { id, reason }).ok();
                Err(e)
            }
        }
    }

    /// Current snapshot of a job
    pub async fn get_status(&self, id: BackupJobId) -> Result<BackupJob> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("backup job {} not found", id)))
    }

    /// Whether new submissions are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs, signal the workers and wait for them to exit
    ///
    /// The job in flight and every job still waiting in the queue are marked
    /// failed with "interrupted by shutdown".
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "backup worker exited abnormally");
            }
        }

        let abandoned = self.fail_queued().await;
        tracing::info!(abandoned, "backup service stopped");
    }

    /// Settle jobs no worker will pick up; returns how many there were
    async fn fail_queued(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();

        let mut abandoned = 0;
        while let Ok(id) = rx.try_recv() {
            let reason = "interrupted by shutdown".to_string();
            if let Err(e) = self.registry.fail(id, reason.clone()).await {
                tracing::warn!(job_id = %id, error = %e, "failed to record abandoned backup job");
                continue;
            }
            self.event_tx
                .send(Event::BackupFailed { id, error: reason })
                .ok();
            abandoned += 1;
        }
        abandoned
    }
}
