//! Database layer for backup-engine
//!
//! Handles SQLite persistence for retrieval jobs and the backup catalog.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`retrieval_jobs`] - Retrieval job records
//! - [`catalog`] - Wallets, backup jobs, car files and storage deals

use crate::error::DatabaseError;
use crate::types::{
    BackupJobId, RetrievalJob, RetrievalJobId, StorageDeal, UserFile, WalletAddress,
};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod catalog;
mod migrations;
mod retrieval_jobs;

/// Retrieval job row as stored; JSON columns are kept as text
#[derive(Debug, Clone, FromRow)]
pub(crate) struct RetrievalJobRow {
    pub id: RetrievalJobId,
    pub backup_job_id: Option<BackupJobId>,
    pub cids: String,
    pub file_paths: String,
    pub format: String,
    pub status: String,
    pub progress: i64,
    pub message: String,
    pub files: String,
    pub total_size: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub metadata: String,
    pub wallet_address: String,
}

impl TryFrom<RetrievalJobRow> for RetrievalJob {
    type Error = Error;

    fn try_from(row: RetrievalJobRow) -> Result<Self> {
        Ok(RetrievalJob {
            id: row.id,
            backup_job_id: row.backup_job_id,
            cids: serde_json::from_str(&row.cids)?,
            file_paths: serde_json::from_str(&row.file_paths)?,
            format: row.format.parse()?,
            status: row.status.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            message: row.message,
            files: serde_json::from_str(&row.files)?,
            total_size: row.total_size.max(0) as u64,
            created_at: timestamp_to_datetime(row.created_at),
            completed_at: row.completed_at.map(timestamp_to_datetime),
            wallet_address: WalletAddress::parse(&row.wallet_address)?,
            metadata: serde_json::from_str(&row.metadata)?,
        })
    }
}

/// Car file joined with its backup job
#[derive(Debug, Clone, FromRow)]
pub(crate) struct UserFileRow {
    pub id: i64,
    pub root_cid: String,
    pub car_cid: String,
    pub file_path: String,
    pub original_size: i64,
    pub car_size: i64,
    pub status: String,
    pub created_at: i64,
    pub metadata: Option<String>,
    pub backup_job_id: BackupJobId,
    pub backup_status: String,
}

impl From<UserFileRow> for UserFile {
    fn from(row: UserFileRow) -> Self {
        // Unparseable catalog metadata is shown as an empty object
        let metadata = row
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

        UserFile {
            id: row.id,
            root_cid: row.root_cid,
            car_cid: row.car_cid,
            file_path: row.file_path,
            original_size: row.original_size.max(0) as u64,
            car_size: row.car_size.max(0) as u64,
            status: row.status,
            created_at: timestamp_to_datetime(row.created_at),
            metadata,
            backup_job_id: row.backup_job_id,
            backup_status: row.backup_status,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct StorageDealRow {
    pub miner_id: String,
    pub deal_cid: Option<String>,
    pub price: f64,
    pub size: i64,
    pub duration: i64,
    pub status: String,
    pub verified_deal: bool,
}

impl From<StorageDealRow> for StorageDeal {
    fn from(row: StorageDealRow) -> Self {
        StorageDeal {
            miner_id: row.miner_id,
            deal_cid: row.deal_cid,
            price: row.price,
            size: row.size.max(0) as u64,
            duration: row.duration,
            status: row.status,
            verified_deal: row.verified_deal,
        }
    }
}

/// New car file to be cataloged
#[derive(Debug, Clone)]
pub struct NewCarFile {
    /// Backup job the file belongs to
    pub backup_job_id: BackupJobId,
    /// Root identifier of the payload
    pub root_cid: String,
    /// Identifier of the CAR container
    pub car_cid: String,
    /// Original path of the file
    pub file_path: String,
    /// Payload size in bytes
    pub original_size: u64,
    /// Container size in bytes
    pub car_size: u64,
    /// Catalog status (e.g., "stored")
    pub status: String,
    /// Optional JSON metadata
    pub metadata: Option<serde_json::Value>,
}

/// New storage deal to be cataloged
#[derive(Debug, Clone)]
pub struct NewStorageDeal {
    /// Backup job the deal stores
    pub backup_job_id: BackupJobId,
    /// Wallet row id that made the deal
    pub wallet_id: i64,
    /// Storage provider
    pub miner_id: String,
    /// Deal proposal identifier
    pub deal_cid: Option<String>,
    /// Agreed price
    pub price: f64,
    /// Deal size in bytes
    pub size: u64,
    /// Deal duration in epochs
    pub duration: i64,
    /// Deal status (e.g., "active")
    pub status: String,
    /// Whether the deal is verified
    pub verified_deal: bool,
}

pub(crate) fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

pub(crate) fn query_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

/// Database handle for backup-engine
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
