use super::*;
use crate::test_helpers::{Scripted, ScriptedFetcher, test_config, wallet};
use crate::types::{
    BackupOptions, BackupRequest, BackupStatus, RetrievalJob, RetrievalRequest, RetrievalStatus,
};
use std::time::Duration;
use tempfile::TempDir;

fn backup_request(dir: &TempDir) -> BackupRequest {
    let source = dir.path().join("photos.tar");
    std::fs::write(&source, b"holiday photos").unwrap();
    BackupRequest {
        files: vec![source.to_string_lossy().into_owned()],
        destination: "filecoin".to_string(),
        options: BackupOptions::default(),
    }
}

async fn start_engine(dir: &TempDir, fetcher: ScriptedFetcher) -> Engine {
    Engine::with_fetcher(test_config(dir.path()), Arc::new(fetcher))
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_startup_creates_scratch_dir_and_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let scratch = config.gateway.scratch_dir.clone();
    let db_path = config.persistence.database_path.clone();

    let engine = Engine::new(config).await.unwrap();

    assert!(scratch.is_dir());
    assert!(db_path.exists());
    assert!(engine.is_accepting());
    assert_eq!(engine.get_config().backup.progress_step, 50);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_startup_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = test_config(dir.path());
    config.backup.queue_capacity = 0;
    let fetcher = Arc::new(ScriptedFetcher::new(dir.path()));
    assert!(matches!(
        Engine::with_fetcher(config, fetcher).await,
        Err(Error::Config { .. })
    ));

    let mut config = test_config(dir.path());
    config.gateway.url = "not a url".to_string();
    assert!(matches!(
        Engine::new(config).await,
        Err(Error::Config { .. })
    ));
}

#[tokio::test]
async fn test_startup_fails_jobs_left_unfinished() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let owner = wallet("0xowner");

    let stale = RetrievalJob::pending(
        RetrievalRequest {
            cids: vec!["bafy1".to_string()],
            ..Default::default()
        },
        owner.clone(),
    );
    {
        let db = Database::new(&config.persistence.database_path)
            .await
            .unwrap();
        db.insert_retrieval_job(&stale).await.unwrap();
        db.close().await;
    }

    let engine = start_engine(&dir, ScriptedFetcher::new(dir.path())).await;

    let job = engine.retrievals().get_job(stale.id, &owner).await.unwrap();
    assert_eq!(job.status, RetrievalStatus::Failed);
    assert_eq!(job.message, "Interrupted by restart");
    assert!(job.completed_at.is_some());

    engine.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_engine_runs_backup_and_retrieval_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    let fetcher = ScriptedFetcher::new(&scratch).with("bafy1", Scripted::Bytes(vec![7; 64]));
    let engine = start_engine(&dir, fetcher).await;
    let owner = wallet("0xowner");

    let submitted = engine.backups().submit(backup_request(&dir)).await.unwrap();
    let created = engine
        .retrievals()
        .create_job(
            RetrievalRequest {
                cids: vec!["bafy1".to_string()],
                ..Default::default()
            },
            &owner,
        )
        .await
        .unwrap();

    let job = crate::test_helpers::wait_for_terminal(engine.retrievals(), created.id, &owner).await;
    assert_eq!(job.status, RetrievalStatus::Completed);
    assert_eq!(job.total_size, 64);

    let mut backup = engine.backups().get_status(submitted.id).await.unwrap();
    for _ in 0..500 {
        if backup.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        backup = engine.backups().get_status(submitted.id).await.unwrap();
    }
    assert_eq!(backup.status, BackupStatus::Completed);
    assert_eq!(backup.artifacts.len(), 1);
    assert!(engine.registry().get(submitted.id).await.is_some());

    engine.shutdown().await.unwrap();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_stops_services_and_emits_event() {
    let dir = tempfile::tempdir().unwrap();
    let engine = start_engine(&dir, ScriptedFetcher::new(dir.path())).await;
    let mut events = engine.subscribe();

    engine.shutdown().await.unwrap();

    assert!(!engine.is_accepting());
    assert!(engine.sweeper.lock().await.is_none());

    let mut saw_shutdown = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Shutdown) {
            saw_shutdown = true;
        }
    }
    assert!(saw_shutdown);

    assert!(matches!(
        engine.backups().submit(backup_request(&dir)).await,
        Err(Error::ShuttingDown)
    ));
    let request = RetrievalRequest {
        cids: vec!["bafy1".to_string()],
        ..Default::default()
    };
    assert!(matches!(
        engine.retrievals().create_job(request, &wallet("0xowner")).await,
        Err(Error::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_shutdown_interrupts_running_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    let fetcher = Arc::new(ScriptedFetcher::new(&scratch).with("bafy1", Scripted::Hang));
    let engine = Engine::with_fetcher(test_config(dir.path()), fetcher.clone())
        .await
        .unwrap();
    let owner = wallet("0xowner");

    let created = engine
        .retrievals()
        .create_job(
            RetrievalRequest {
                cids: vec!["bafy1".to_string()],
                ..Default::default()
            },
            &owner,
        )
        .await
        .unwrap();
    fetcher.wait_for_call("bafy1").await;

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .expect("shutdown should finish promptly")
        .unwrap();

    let job = engine.db.get_retrieval_job(created.id).await.unwrap().unwrap();
    assert_eq!(job.status, RetrievalStatus::Failed);
    assert_eq!(job.message, "Interrupted by shutdown");
    assert_eq!(engine.retrievals().active_jobs().await, 0);
}
