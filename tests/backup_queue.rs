//! Backup submissions through a running [`Engine`]

mod common;

use backup_engine::backup::{decompress, decrypt};
use backup_engine::{
    BackupOptions, BackupRequest, BackupStatus, EncryptionKey, Engine, Error, Event,
};
use common::{BACKUP_PASSPHRASE, drain_events, test_config, wait_for_backup};
use std::time::Duration;
use tempfile::TempDir;

/// Write `file` under `dir` and request an encrypted, compressed backup of it
fn request(dir: &TempDir, file: &str) -> BackupRequest {
    let source = dir.path().join(file);
    std::fs::write(&source, format!("payload of {file}").repeat(100)).unwrap();
    BackupRequest {
        files: vec![source.to_string_lossy().into_owned()],
        destination: "filecoin".to_string(),
        options: BackupOptions {
            compression: true,
            encryption: true,
            schedule: String::new(),
        },
    }
}

#[tokio::test]
async fn submitted_backups_run_to_completion_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(&dir, "http://127.0.0.1:9/ipfs"))
        .await
        .unwrap();
    let mut events = engine.subscribe();

    let first = engine.backups().submit(request(&dir, "a.tar")).await.unwrap();
    let second = engine.backups().submit(request(&dir, "b.tar")).await.unwrap();
    assert_eq!(first.status, BackupStatus::Pending);

    let a = wait_for_backup(&engine, first.id, Duration::from_secs(10)).await;
    let b = wait_for_backup(&engine, second.id, Duration::from_secs(10)).await;
    assert_eq!(a.status, BackupStatus::Completed);
    assert_eq!(b.status, BackupStatus::Completed);
    assert_eq!(a.progress, 100);
    assert!(a.updated_at <= b.updated_at);

    let completed: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::BackupCompleted { id } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![first.id, second.id]);

    let key = EncryptionKey::from_passphrase(BACKUP_PASSPHRASE);
    let artifact = &a.artifacts[0];
    let sealed = std::fs::read(&artifact.staged_path).unwrap();
    let restored = decompress(&decrypt(&sealed, &key).unwrap()).unwrap();
    assert_eq!(restored, std::fs::read(&artifact.source).unwrap());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn full_queue_rejects_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir, "http://127.0.0.1:9/ipfs");
    config.backup.queue_capacity = 2;
    config.backup.step_delay = Duration::from_millis(200);
    let engine = Engine::new(config).await.unwrap();

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for i in 0..8 {
        let started = std::time::Instant::now();
        match engine.backups().submit(request(&dir, &format!("f{i}.bin"))).await {
            Ok(submitted) => accepted.push(submitted.id),
            Err(Error::QueueFull { capacity }) => {
                assert_eq!(capacity, 2);
                rejected.push(i);
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    // One job running, two waiting
    assert!(accepted.len() <= 3);
    assert!(rejected.len() >= 5);

    engine.shutdown().await.unwrap();

    // Nothing admitted is left pending once the engine is down
    for id in accepted {
        let job = engine.backups().get_status(id).await.unwrap();
        assert!(job.status.is_terminal(), "{id} left {:?}", job.status);
    }
}

#[tokio::test]
async fn shutdown_interrupts_running_backup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir, "http://127.0.0.1:9/ipfs");
    config.backup.step_delay = Duration::from_secs(30);
    let engine = Engine::new(config).await.unwrap();

    let submitted = engine.backups().submit(request(&dir, "big.iso")).await.unwrap();
    for _ in 0..200 {
        let job = engine.backups().get_status(submitted.id).await.unwrap();
        if job.status == BackupStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .expect("shutdown should not wait for the backup to finish")
        .unwrap();

    let job = engine.backups().get_status(submitted.id).await.unwrap();
    assert_eq!(job.status, BackupStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("interrupted by shutdown"));
}
