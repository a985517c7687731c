//! Backup catalog: wallets, backup jobs, car files and storage deals.
//!
//! Upstream subsystems own these relations; the engine only reads them.
//! The insert helpers exist for embedding applications and tests.

use crate::types::{
    BackupJobId, FileListPage, FileMetadata, ListQuery, ResolvedTarget, StorageDeal, UserFile,
    WalletAddress,
};
use crate::Result;

use super::{
    Database, NewCarFile, NewStorageDeal, StorageDealRow, UserFileRow, query_failed,
};

/// A car file is visible to a wallet when that wallet made a storage deal
/// for the file's backup job.
const OWNED_BY_WALLET: &str = r#"
    EXISTS (
        SELECT 1 FROM storage_deals sd
        JOIN wallets w ON sd.wallet_id = w.id
        WHERE sd.backup_job_id = cf.backup_job_id AND w.address = ?
    )
"#;

const USER_FILE_COLUMNS: &str = r#"
    cf.id, cf.root_cid, cf.car_cid, cf.file_path, cf.original_size, cf.car_size,
    cf.status, cf.created_at, cf.metadata,
    bj.id AS backup_job_id, bj.status AS backup_status
"#;

impl Database {
    /// Insert a wallet, returning its row id; an existing address is reused
    pub async fn insert_wallet(&self, address: &WalletAddress) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO wallets (address, created_at) VALUES (?, ?)")
            .bind(address.as_str())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to insert wallet", e))?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM wallets WHERE address = ?")
            .bind(address.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to look up wallet", e))?;

        Ok(id)
    }

    /// Insert a backup job catalog record
    pub async fn insert_backup_record(&self, id: BackupJobId, status: &str) -> Result<()> {
        sqlx::query("INSERT INTO backup_jobs (id, status, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(status)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to insert backup job", e))?;
        Ok(())
    }

    /// Insert a car file, returning its row id
    pub async fn insert_car_file(&self, file: &NewCarFile) -> Result<i64> {
        let metadata = file
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO car_files (
                backup_job_id, root_cid, car_cid, file_path, original_size,
                car_size, status, created_at, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.backup_job_id)
        .bind(&file.root_cid)
        .bind(&file.car_cid)
        .bind(&file.file_path)
        .bind(file.original_size as i64)
        .bind(file.car_size as i64)
        .bind(&file.status)
        .bind(chrono::Utc::now().timestamp())
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert car file", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a storage deal, returning its row id
    pub async fn insert_storage_deal(&self, deal: &NewStorageDeal) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO storage_deals (
                backup_job_id, wallet_id, miner_id, deal_cid, price,
                size, duration, status, verified_deal
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(deal.backup_job_id)
        .bind(deal.wallet_id)
        .bind(&deal.miner_id)
        .bind(&deal.deal_cid)
        .bind(deal.price)
        .bind(deal.size as i64)
        .bind(deal.duration)
        .bind(&deal.status)
        .bind(deal.verified_deal)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert storage deal", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Root identifiers and paths of a backup job's files, in catalog order
    pub async fn targets_for_backup_job(
        &self,
        backup_job_id: BackupJobId,
        owner: &WalletAddress,
    ) -> Result<Vec<ResolvedTarget>> {
        let sql = format!(
            r#"
            SELECT cf.root_cid, cf.file_path
            FROM car_files cf
            WHERE cf.backup_job_id = ? AND {OWNED_BY_WALLET}
            ORDER BY cf.id
            "#
        );

        let rows: Vec<(String, String)> = sqlx::query_as(&sql)
            .bind(backup_job_id)
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get files from backup", e))?;

        Ok(rows
            .into_iter()
            .map(|(cid, file_path)| ResolvedTarget { cid, file_path })
            .collect())
    }

    /// Root identifiers of the owner's files stored under any of `paths`
    pub async fn targets_for_paths(
        &self,
        paths: &[String],
        owner: &WalletAddress,
    ) -> Result<Vec<ResolvedTarget>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; paths.len()].join(", ");
        let sql = format!(
            r#"
            SELECT cf.root_cid, cf.file_path
            FROM car_files cf
            WHERE cf.file_path IN ({placeholders}) AND {OWNED_BY_WALLET}
            ORDER BY cf.id
            "#
        );

        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for path in paths {
            query = query.bind(path);
        }
        let rows = query
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get CIDs for paths", e))?;

        Ok(rows
            .into_iter()
            .map(|(cid, file_path)| ResolvedTarget { cid, file_path })
            .collect())
    }

    /// One page of the owner's files, newest first
    pub async fn list_user_files(
        &self,
        owner: &WalletAddress,
        query: &ListQuery,
    ) -> Result<FileListPage> {
        let query = query.normalized();

        let (total_count, total_size): (i64, i64) = sqlx::query_as(&format!(
            r#"
            SELECT COUNT(*), COALESCE(SUM(cf.original_size), 0)
            FROM car_files cf
            WHERE {OWNED_BY_WALLET} AND (? IS NULL OR cf.status = ?)
            "#
        ))
        .bind(owner.as_str())
        .bind(query.status.as_deref())
        .bind(query.status.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to count user files", e))?;

        let rows = sqlx::query_as::<_, UserFileRow>(&format!(
            r#"
            SELECT {USER_FILE_COLUMNS}
            FROM car_files cf
            JOIN backup_jobs bj ON cf.backup_job_id = bj.id
            WHERE {OWNED_BY_WALLET} AND (? IS NULL OR cf.status = ?)
            ORDER BY cf.created_at DESC, cf.id DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(owner.as_str())
        .bind(query.status.as_deref())
        .bind(query.status.as_deref())
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list user files", e))?;

        let files: Vec<UserFile> = rows.into_iter().map(UserFile::from).collect();
        let total_count = total_count.max(0) as u64;
        let has_more = query.offset() + (files.len() as u64) < total_count;

        Ok(FileListPage {
            files,
            total_count,
            total_size: total_size.max(0) as u64,
            page: query.page,
            limit: query.limit,
            has_more,
        })
    }

    /// Catalog record for a root or car identifier, with the deals of its backup job
    ///
    /// Identical content backed up by several wallets shares an identifier, so
    /// a record `owner` holds a deal for wins. Otherwise the first record is
    /// returned with its own wallet, which lets the caller tell "not yours"
    /// apart from "unknown".
    pub async fn get_file_metadata(
        &self,
        cid: &str,
        owner: &WalletAddress,
    ) -> Result<Option<FileMetadata>> {
        let owned = sqlx::query_as::<_, UserFileRow>(&format!(
            r#"
            SELECT {USER_FILE_COLUMNS}
            FROM car_files cf
            JOIN backup_jobs bj ON cf.backup_job_id = bj.id
            WHERE (cf.root_cid = ? OR cf.car_cid = ?) AND {OWNED_BY_WALLET}
            ORDER BY cf.id
            LIMIT 1
            "#
        ))
        .bind(cid)
        .bind(cid)
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get file metadata", e))?;

        let (file, wallet) = match owned {
            Some(row) => (UserFile::from(row), Some(owner.clone())),
            None => {
                let row = sqlx::query_as::<_, UserFileRow>(&format!(
                    r#"
                    SELECT {USER_FILE_COLUMNS}
                    FROM car_files cf
                    JOIN backup_jobs bj ON cf.backup_job_id = bj.id
                    WHERE cf.root_cid = ? OR cf.car_cid = ?
                    ORDER BY cf.id
                    LIMIT 1
                    "#
                ))
                .bind(cid)
                .bind(cid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("Failed to get file metadata", e))?;

                let Some(row) = row else {
                    return Ok(None);
                };
                let file = UserFile::from(row);
                let wallet = self.first_deal_wallet(file.backup_job_id).await?;
                (file, wallet)
            }
        };

        let deals = sqlx::query_as::<_, StorageDealRow>(
            r#"
            SELECT miner_id, deal_cid, price, size, duration, status, verified_deal
            FROM storage_deals
            WHERE backup_job_id = ?
            ORDER BY id
            "#,
        )
        .bind(file.backup_job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get storage deals", e))?;

        Ok(Some(FileMetadata {
            file,
            wallet_address: wallet,
            storage_deals: deals.into_iter().map(StorageDeal::from).collect(),
            gateway: None,
        }))
    }

    async fn first_deal_wallet(&self, backup_job_id: BackupJobId) -> Result<Option<WalletAddress>> {
        let address: Option<String> = sqlx::query_scalar(
            r#"
            SELECT w.address
            FROM storage_deals sd
            JOIN wallets w ON sd.wallet_id = w.id
            WHERE sd.backup_job_id = ?
            ORDER BY sd.id
            LIMIT 1
            "#,
        )
        .bind(backup_job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get file owner", e))?;

        address.as_deref().map(WalletAddress::parse).transpose()
    }
}
