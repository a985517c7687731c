//! Shared helpers for unit tests across the crate.

use crate::config::Config;
use crate::db::{Database, NewCarFile, NewStorageDeal};
use crate::error::FetchError;
use crate::fetch::{ContentFetcher, FetchedContent, scratch_path};
use crate::retrieval::RetrievalCoordinator;
use crate::store::RetrievalStore;
use crate::types::{
    BackupJobId, Event, RetrievalJob, RetrievalJobId, RetrievedFile, RetrievedFileStatus,
    WalletAddress,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub(crate) fn wallet(address: &str) -> WalletAddress {
    WalletAddress::parse(address).unwrap()
}

/// Catalog a completed backup job owned by `owner` with one stored car file per entry
pub(crate) async fn seed_backup(
    db: &Database,
    owner: &WalletAddress,
    files: &[(&str, &str, u64)],
) -> BackupJobId {
    let wallet_id = db.insert_wallet(owner).await.unwrap();
    let backup_job_id = BackupJobId::new();
    db.insert_backup_record(backup_job_id, "completed")
        .await
        .unwrap();

    for (root_cid, file_path, size) in files {
        db.insert_car_file(&NewCarFile {
            backup_job_id,
            root_cid: root_cid.to_string(),
            car_cid: format!("{}-car", root_cid),
            file_path: file_path.to_string(),
            original_size: *size,
            car_size: size + 120,
            status: "stored".to_string(),
            metadata: Some(serde_json::json!({ "source": "test" })),
        })
        .await
        .unwrap();
    }

    db.insert_storage_deal(&NewStorageDeal {
        backup_job_id,
        wallet_id,
        miner_id: "f01234".to_string(),
        deal_cid: Some("bafydeal".to_string()),
        price: 0.25,
        size: files.iter().map(|(_, _, size)| size).sum(),
        duration: 518_400,
        status: "active".to_string(),
        verified_deal: true,
    })
    .await
    .unwrap();

    backup_job_id
}

pub(crate) fn sample_retrieved_file(cid: &str, size: u64) -> RetrievedFile {
    RetrievedFile {
        cid: cid.to_string(),
        file_path: cid.to_string(),
        size,
        content_type: "application/octet-stream".to_string(),
        status: RetrievedFileStatus::Retrieved,
        local_path: PathBuf::from(format!("/tmp/scratch/{}", cid)),
        download_url: format!("/api/v1/retrieval/download/{}?format=original", cid),
    }
}

// ---------------------------------------------------------------------------
// CAR containers
// ---------------------------------------------------------------------------

const RAW_CODEC: u64 = 0x55;

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn raw_block(data: &[u8]) -> (u64, Vec<u8>) {
    (RAW_CODEC, data.to_vec())
}

/// CARv1 bytes holding `blocks` as `(codec, data)` pairs with sha2-256 CIDv1s
pub(crate) fn build_car(blocks: &[(u64, Vec<u8>)]) -> Vec<u8> {
    // {"roots": [], "version": 1}
    let mut header = vec![0xa2, 0x65];
    header.extend_from_slice(b"roots");
    header.push(0x80);
    header.push(0x67);
    header.extend_from_slice(b"version");
    header.push(0x01);

    let mut out = Vec::new();
    push_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);

    for (codec, data) in blocks {
        let mut cid = vec![0x01];
        push_varint(&mut cid, *codec);
        cid.push(0x12);
        cid.push(0x20);
        cid.extend_from_slice(&Sha256::digest(data));

        push_varint(&mut out, (cid.len() + data.len()) as u64);
        out.extend_from_slice(&cid);
        out.extend_from_slice(data);
    }

    out
}

// ---------------------------------------------------------------------------
// Scripted fetcher
// ---------------------------------------------------------------------------

/// What a [`ScriptedFetcher`] does for one identifier
#[derive(Clone, Debug)]
pub(crate) enum Scripted {
    /// Deliver these bytes
    Bytes(Vec<u8>),
    /// Fail as if the gateway answered with this status
    Status(u16),
    /// Deliver these bytes after a delay, unless cancelled first
    Delayed(Duration, Vec<u8>),
    /// Never finish until cancelled
    Hang,
}

/// In-memory [`ContentFetcher`]; unscripted identifiers answer 404
pub(crate) struct ScriptedFetcher {
    scratch_dir: PathBuf,
    script: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn new(scratch_dir: &Path) -> Self {
        Self {
            scratch_dir: scratch_dir.to_path_buf(),
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with(self, cid: &str, outcome: Scripted) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(cid.to_string(), outcome);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_call(&self, cid: &str) {
        for _ in 0..500 {
            if self.calls().iter().any(|c| c == cid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{cid} was never fetched");
    }

    async fn deliver(&self, cid: &str, bytes: &[u8]) -> Result<FetchedContent, FetchError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let local_path = scratch_path(&self.scratch_dir, cid, "download");
        tokio::fs::write(&local_path, bytes).await?;
        Ok(FetchedContent {
            local_path,
            content_type: "application/octet-stream".to_string(),
            size: bytes.len() as u64,
        })
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        cid: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedContent, FetchError> {
        self.calls.lock().unwrap().push(cid.to_string());
        let outcome = self.script.lock().unwrap().get(cid).cloned();

        match outcome {
            Some(Scripted::Bytes(bytes)) => self.deliver(cid, &bytes).await,
            Some(Scripted::Status(status)) => Err(FetchError::Status {
                status,
                url: format!("http://gateway.test/ipfs/{}", cid),
            }),
            Some(Scripted::Delayed(delay, bytes)) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => self.deliver(cid, &bytes).await,
                }
            }
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
            None => Err(FetchError::Status {
                status: 404,
                url: format!("http://gateway.test/ipfs/{}", cid),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator harness
// ---------------------------------------------------------------------------

/// Config with short delays rooted in `dir`
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.gateway.scratch_dir = dir.join("scratch");
    config.gateway.scratch_grace_period = Duration::from_millis(50);
    config.backup.step_delay = Duration::from_millis(5);
    config.backup.progress_step = 50;
    config.backup.staging_dir = dir.join("staging");
    config.retrieval.shutdown_timeout = Duration::from_secs(5);
    config.persistence.retry.initial_delay = Duration::from_millis(1);
    config.persistence.retry.max_delay = Duration::from_millis(10);
    config.persistence.retry.jitter = false;
    config
}

/// A coordinator over a fresh database; keep `_dir` alive for the test
pub(crate) struct TestHarness {
    pub(crate) coordinator: RetrievalCoordinator,
    pub(crate) db: Arc<Database>,
    pub(crate) events: broadcast::Receiver<Event>,
    pub(crate) config: Arc<Config>,
    pub(crate) _dir: TempDir,
}

pub(crate) async fn create_test_coordinator(
    fetcher: impl FnOnce(&Path) -> Arc<dyn ContentFetcher>,
) -> TestHarness {
    create_test_coordinator_with(fetcher, |config| config, |db| db).await
}

/// Like [`create_test_coordinator`], with hooks to adjust the config and wrap the store
pub(crate) async fn create_test_coordinator_with(
    fetcher: impl FnOnce(&Path) -> Arc<dyn ContentFetcher>,
    configure: impl FnOnce(Config) -> Config,
    wrap_store: impl FnOnce(Arc<dyn RetrievalStore>) -> Arc<dyn RetrievalStore>,
) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(configure(test_config(dir.path())));

    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let store = wrap_store(db.clone());
    let fetcher = fetcher(&config.gateway.scratch_dir);

    let (event_tx, events) = broadcast::channel(1000);
    let coordinator = RetrievalCoordinator::new(config.clone(), store, fetcher, event_tx);

    TestHarness {
        coordinator,
        db,
        events,
        config,
        _dir: dir,
    }
}

/// Poll until the job reaches a terminal status
pub(crate) async fn wait_for_terminal(
    coordinator: &RetrievalCoordinator,
    id: RetrievalJobId,
    owner: &WalletAddress,
) -> RetrievalJob {
    for _ in 0..500 {
        let job = coordinator.get_job(id, owner).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("retrieval job {id} never finished");
}
