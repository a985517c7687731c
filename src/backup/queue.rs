//! Bounded backup queue and the worker pool draining it.

use super::executor::{ExecutorContext, execute_backup_job};
use crate::error::{Error, Result};
use crate::types::BackupJobId;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded FIFO of backup jobs waiting for a worker
#[derive(Clone, Debug)]
pub struct BackupQueue {
    tx: mpsc::Sender<BackupJobId>,
    capacity: usize,
}

impl BackupQueue {
    /// Queue holding at most `capacity` waiting jobs, plus its receiving end
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BackupJobId>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    /// Enqueue without waiting
    ///
    /// A full queue yields [`Error::QueueFull`]; a queue whose workers are
    /// gone yields [`Error::ShuttingDown`].
    pub fn schedule(&self, id: BackupJobId) -> Result<()> {
        match self.tx.try_send(id) {
            Ok(()) => {
                tracing::debug!(job_id = %id, "backup job queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::QueueFull {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Maximum number of waiting jobs
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs currently waiting
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Whether no jobs are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving end of the queue, shared by the workers
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<BackupJobId>>>;

/// Spawn `count` workers that drain `rx` until `shutdown` fires
pub(crate) fn spawn_workers(
    count: usize,
    rx: &SharedReceiver,
    ctx: ExecutorContext,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let rx = Arc::clone(rx);
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                tracing::debug!(worker, "backup worker started");
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        next = async { rx.lock().await.recv().await } => next,
                    };

                    // Every sender is gone
                    let Some(id) = next else { break };

                    execute_backup_job(&ctx, id, &shutdown).await;
                }
                tracing::debug!(worker, "backup worker stopped");
            })
        })
        .collect()
}
