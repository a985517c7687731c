//! Opening the pool and bringing the schema up to date.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// Schema steps in order. Each version is applied in its own transaction.
const MIGRATIONS: &[(i64, &[&str])] = &[(
    1,
    &[
        r#"
        CREATE TABLE wallets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE backup_jobs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE car_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            backup_job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
            root_cid TEXT NOT NULL,
            car_cid TEXT NOT NULL,
            file_path TEXT NOT NULL,
            original_size INTEGER NOT NULL DEFAULT 0,
            car_size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            metadata TEXT
        )
        "#,
        r#"
        CREATE TABLE storage_deals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            backup_job_id TEXT NOT NULL REFERENCES backup_jobs(id) ON DELETE CASCADE,
            wallet_id INTEGER NOT NULL REFERENCES wallets(id),
            miner_id TEXT NOT NULL,
            deal_cid TEXT,
            price REAL NOT NULL DEFAULT 0,
            size INTEGER NOT NULL DEFAULT 0,
            duration INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            verified_deal INTEGER NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX idx_car_files_backup_job ON car_files(backup_job_id)",
        "CREATE INDEX idx_car_files_root_cid ON car_files(root_cid)",
        "CREATE INDEX idx_car_files_file_path ON car_files(file_path)",
        "CREATE INDEX idx_storage_deals_backup_job ON storage_deals(backup_job_id)",
        r#"
        CREATE TABLE retrieval_jobs (
            id TEXT PRIMARY KEY,
            backup_job_id TEXT,
            cids TEXT NOT NULL DEFAULT '[]',
            file_paths TEXT NOT NULL DEFAULT '[]',
            format TEXT NOT NULL DEFAULT 'original',
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            files TEXT NOT NULL DEFAULT '[]',
            total_size INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            completed_at INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}',
            wallet_address TEXT NOT NULL
        )
        "#,
        "CREATE INDEX idx_retrieval_jobs_wallet ON retrieval_jobs(wallet_address)",
        "CREATE INDEX idx_retrieval_jobs_status ON retrieval_jobs(status)",
    ],
)];

fn connect_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migrate_err(version: i64) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("v{version}: {e}")))
}

impl Database {
    /// Open (or create) the database at `path` and apply pending migrations
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "cannot create {}: {e}",
                    parent.display()
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connect_err("invalid database path"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connect_err("cannot open database"))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(migrate_err(0))?;

        let applied: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(migrate_err(0))?;

        for &(version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > applied) {
            tracing::info!(version, "applying schema migration");

            // Dropping the transaction on an early return rolls it back
            let mut tx = self.pool.begin().await.map_err(migrate_err(version))?;
            for sql in statements {
                sqlx::query(sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(migrate_err(version))?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(migrate_err(version))?;
            tx.commit().await.map_err(migrate_err(version))?;
        }

        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Underlying pool, for queries the typed methods don't cover
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
