//! Retrieval job records.
//!
//! Updates are guarded in SQL: a terminal status is never replaced and
//! progress only moves up, no matter which writer gets there first.

use crate::error::DatabaseError;
use crate::types::{RetrievalJob, RetrievalJobId, RetrievalStatus, WalletAddress};
use crate::{Error, Result};

use super::{Database, RetrievalJobRow, query_failed};

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

impl Database {
    /// Insert a new retrieval job record
    pub async fn insert_retrieval_job(&self, job: &RetrievalJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retrieval_jobs (
                id, backup_job_id, cids, file_paths, format, status,
                progress, message, files, total_size, created_at,
                completed_at, metadata, wallet_address
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id)
        .bind(job.backup_job_id)
        .bind(serde_json::to_string(&job.cids)?)
        .bind(serde_json::to_string(&job.file_paths)?)
        .bind(job.format.as_str())
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(&job.message)
        .bind(serde_json::to_string(&job.files)?)
        .bind(job.total_size as i64)
        .bind(job.created_at.timestamp())
        .bind(job.completed_at.map(|t| t.timestamp()))
        .bind(serde_json::to_string(&job.metadata)?)
        .bind(job.wallet_address.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert retrieval job", e))?;

        Ok(())
    }

    /// Get a retrieval job by ID
    pub async fn get_retrieval_job(&self, id: RetrievalJobId) -> Result<Option<RetrievalJob>> {
        let row = sqlx::query_as::<_, RetrievalJobRow>(
            r#"
            SELECT
                id, backup_job_id, cids, file_paths, format, status,
                progress, message, files, total_size, created_at,
                completed_at, metadata, wallet_address
            FROM retrieval_jobs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get retrieval job", e))?;

        row.map(RetrievalJob::try_from).transpose()
    }

    /// Read only the status column, as the pipeline does between items
    pub async fn get_retrieval_status(
        &self,
        id: RetrievalJobId,
    ) -> Result<Option<RetrievalStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM retrieval_jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("Failed to get retrieval status", e))?;

        status.map(|s| s.parse()).transpose()
    }

    /// Write the job's mutable fields
    ///
    /// Status and message are left alone once the stored row is terminal, and
    /// progress never decreases. Returns NotFound if the row does not exist.
    pub async fn update_retrieval_job(&self, job: &RetrievalJob) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE retrieval_jobs SET
                status = CASE WHEN status IN {terminal} THEN status ELSE ? END,
                message = CASE WHEN status IN {terminal} THEN message ELSE ? END,
                progress = MAX(progress, ?),
                files = ?,
                total_size = ?,
                completed_at = COALESCE(completed_at, ?),
                metadata = ?
            WHERE id = ?
            "#,
            terminal = TERMINAL_STATUSES
        );

        let result = sqlx::query(&sql)
            .bind(job.status.as_str())
            .bind(&job.message)
            .bind(i64::from(job.progress))
            .bind(serde_json::to_string(&job.files)?)
            .bind(job.total_size as i64)
            .bind(job.completed_at.map(|t| t.timestamp()))
            .bind(serde_json::to_string(&job.metadata)?)
            .bind(job.id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to update retrieval job", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "retrieval job {}",
                job.id
            ))));
        }

        Ok(())
    }

    /// Move a non-terminal job to cancelled
    ///
    /// Returns false when the job was already terminal (or does not exist).
    pub async fn cancel_retrieval_job(&self, id: RetrievalJobId) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE retrieval_jobs
            SET status = 'cancelled', message = 'Cancelled by user', completed_at = ?
            WHERE id = ? AND status NOT IN {terminal}
            "#,
            terminal = TERMINAL_STATUSES
        );

        let result = sqlx::query(&sql)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to cancel retrieval job", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail every job left pending or processing by a previous run
    ///
    /// Returns the number of jobs marked failed.
    pub async fn fail_interrupted_retrievals(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE retrieval_jobs
            SET status = 'failed', message = 'Interrupted by restart', completed_at = ?
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to fail interrupted retrieval jobs", e))?;

        Ok(result.rows_affected())
    }

    /// List a wallet's retrieval jobs, newest first
    pub async fn list_retrieval_jobs(&self, wallet: &WalletAddress) -> Result<Vec<RetrievalJob>> {
        let rows = sqlx::query_as::<_, RetrievalJobRow>(
            r#"
            SELECT
                id, backup_job_id, cids, file_paths, format, status,
                progress, message, files, total_size, created_at,
                completed_at, metadata, wallet_address
            FROM retrieval_jobs
            WHERE wallet_address = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list retrieval jobs", e))?;

        rows.into_iter().map(RetrievalJob::try_from).collect()
    }
}
