//! Waiting helpers for integration tests

use backup_engine::{
    BackupJob, BackupJobId, Engine, Event, RetrievalJob, RetrievalJobId, WalletAddress,
};
use std::time::Duration;

/// Poll a retrieval job until it reaches a terminal status
pub async fn wait_for_retrieval(
    engine: &Engine,
    id: RetrievalJobId,
    owner: &WalletAddress,
    timeout: Duration,
) -> RetrievalJob {
    let result = tokio::time::timeout(timeout, async {
        loop {
            let job = engine
                .retrievals()
                .get_job(id, owner)
                .await
                .expect("job should be readable by its owner");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    result.unwrap_or_else(|_| panic!("retrieval job {id} did not finish within {timeout:?}"))
}

/// Poll a backup job until it reaches a terminal status
pub async fn wait_for_backup(engine: &Engine, id: BackupJobId, timeout: Duration) -> BackupJob {
    let result = tokio::time::timeout(timeout, async {
        loop {
            let job = engine
                .backups()
                .get_status(id)
                .await
                .expect("backup job should still be registered");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    result.unwrap_or_else(|_| panic!("backup job {id} did not finish within {timeout:?}"))
}

/// Drain every event already buffered on `events`
pub fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
