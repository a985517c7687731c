//! Engine construction and catalog seeding for integration tests

use backup_engine::db::{NewCarFile, NewStorageDeal};
use backup_engine::{BackupJobId, Config, Database, Engine, WalletAddress};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tempfile::TempDir;

/// Passphrase the test engines seal backups with
pub const BACKUP_PASSPHRASE: &str = "integration passphrase";

/// Config rooted in `dir` pointing at `gateway_url`, with short delays
pub fn test_config(dir: &TempDir, gateway_url: &str) -> Config {
    let mut config = Config::default();
    config.gateway.url = gateway_url.to_string();
    config.gateway.fetch_timeout = Duration::from_secs(5);
    config.gateway.scratch_dir = dir.path().join("scratch");
    config.gateway.scratch_grace_period = Duration::from_millis(100);
    config.persistence.database_path = dir.path().join("engine.db");
    config.persistence.retry.initial_delay = Duration::from_millis(1);
    config.persistence.retry.max_delay = Duration::from_millis(10);
    config.persistence.retry.jitter = false;
    config.backup.step_delay = Duration::from_millis(5);
    config.backup.progress_step = 25;
    config.backup.staging_dir = dir.path().join("staging");
    config.backup.encryption_key = Some(BACKUP_PASSPHRASE.to_string());
    config.retrieval.shutdown_timeout = Duration::from_secs(5);
    config
}

/// Start an engine against `gateway_url`; keep the returned dir alive
pub async fn start_engine(gateway_url: &str) -> (Engine, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let engine = Engine::new(test_config(&dir, gateway_url))
        .await
        .expect("engine should start");
    (engine, dir)
}

/// Test wallet
pub fn owner() -> WalletAddress {
    WalletAddress::parse("0xIntegrationOwner").expect("valid wallet address")
}

/// Catalog a completed backup of `files` as `(root cid, path, size)` owned by `owner`
pub async fn seed_backup(
    db: &Database,
    owner: &WalletAddress,
    files: &[(&str, &str, u64)],
) -> BackupJobId {
    let wallet_id = db.insert_wallet(owner).await.expect("insert wallet");
    let backup_job_id = BackupJobId::new();
    db.insert_backup_record(backup_job_id, "completed")
        .await
        .expect("insert backup record");

    for (root_cid, file_path, size) in files {
        db.insert_car_file(&NewCarFile {
            backup_job_id,
            root_cid: root_cid.to_string(),
            car_cid: format!("{}-car", root_cid),
            file_path: file_path.to_string(),
            original_size: *size,
            car_size: size + 96,
            status: "stored".to_string(),
            metadata: None,
        })
        .await
        .expect("insert car file");
    }

    db.insert_storage_deal(&NewStorageDeal {
        backup_job_id,
        wallet_id,
        miner_id: "f09999".to_string(),
        deal_cid: None,
        price: 1.5,
        size: files.iter().map(|(_, _, size)| size).sum(),
        duration: 1_051_200,
        status: "active".to_string(),
        verified_deal: false,
    })
    .await
    .expect("insert storage deal");

    backup_job_id
}

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

/// CARv1 bytes with one raw block per payload chunk
pub fn build_car(chunks: &[&[u8]]) -> Vec<u8> {
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

    for chunk in chunks {
        // CIDv1, raw codec, sha2-256
        let mut cid = vec![0x01, 0x55, 0x12, 0x20];
        cid.extend_from_slice(&Sha256::digest(chunk));

        push_varint(&mut out, (cid.len() + chunk.len()) as u64);
        out.extend_from_slice(&cid);
        out.extend_from_slice(chunk);
    }

    out
}
