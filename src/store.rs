//! Record store seam used by the retrieval pipeline and coordinator.
//!
//! [`Database`] is the production implementation. Tests wrap it to inject
//! failures without touching SQLite.

use crate::db::Database;
use crate::types::{
    BackupJobId, FileListPage, FileMetadata, ListQuery, ResolvedTarget, RetrievalJob,
    RetrievalJobId, RetrievalStatus, WalletAddress,
};
use crate::Result;
use async_trait::async_trait;

/// Persistent retrieval job records plus read access to the backup catalog
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Persist a new job record
    async fn insert_retrieval_job(&self, job: &RetrievalJob) -> Result<()>;

    /// Load a job record
    async fn get_retrieval_job(&self, id: RetrievalJobId) -> Result<Option<RetrievalJob>>;

    /// Load only the status of a job record
    async fn get_retrieval_status(&self, id: RetrievalJobId) -> Result<Option<RetrievalStatus>>;

    /// Write a job's mutable fields; terminal status and progress are guarded
    async fn update_retrieval_job(&self, job: &RetrievalJob) -> Result<()>;

    /// Cancel a non-terminal job; false when it was already terminal
    async fn cancel_retrieval_job(&self, id: RetrievalJobId) -> Result<bool>;

    /// Fail jobs a previous process left unfinished
    async fn fail_interrupted_retrievals(&self) -> Result<u64>;

    /// List a wallet's retrieval jobs
    async fn list_retrieval_jobs(&self, owner: &WalletAddress) -> Result<Vec<RetrievalJob>>;

    /// Files of a backup job visible to `owner`
    async fn targets_for_backup_job(
        &self,
        backup_job_id: BackupJobId,
        owner: &WalletAddress,
    ) -> Result<Vec<ResolvedTarget>>;

    /// Files stored under `paths` visible to `owner`
    async fn targets_for_paths(
        &self,
        paths: &[String],
        owner: &WalletAddress,
    ) -> Result<Vec<ResolvedTarget>>;

    /// One page of the files visible to `owner`
    async fn list_user_files(&self, owner: &WalletAddress, query: &ListQuery)
    -> Result<FileListPage>;

    /// Catalog record for a content identifier, preferring one `owner` holds
    async fn get_file_metadata(
        &self,
        cid: &str,
        owner: &WalletAddress,
    ) -> Result<Option<FileMetadata>>;
}

#[async_trait]
impl RetrievalStore for Database {
    async fn insert_retrieval_job(&self, job: &RetrievalJob) -> Result<()> {
        Database::insert_retrieval_job(self, job).await
    }

    async fn get_retrieval_job(&self, id: RetrievalJobId) -> Result<Option<RetrievalJob>> {
        Database::get_retrieval_job(self, id).await
    }

    async fn get_retrieval_status(&self, id: RetrievalJobId) -> Result<Option<RetrievalStatus>> {
        Database::get_retrieval_status(self, id).await
    }

    async fn update_retrieval_job(&self, job: &RetrievalJob) -> Result<()> {
        Database::update_retrieval_job(self, job).await
    }

    async fn cancel_retrieval_job(&self, id: RetrievalJobId) -> Result<bool> {
        Database::cancel_retrieval_job(self, id).await
    }

    async fn fail_interrupted_retrievals(&self) -> Result<u64> {
        Database::fail_interrupted_retrievals(self).await
    }

    async fn list_retrieval_jobs(&self, owner: &WalletAddress) -> Result<Vec<RetrievalJob>> {
        Database::list_retrieval_jobs(self, owner).await
    }

    async fn targets_for_backup_job(
        &self,
        backup_job_id: BackupJobId,
        owner: &WalletAddress,
    ) -> Result<Vec<ResolvedTarget>> {
        Database::targets_for_backup_job(self, backup_job_id, owner).await
    }

    async fn targets_for_paths(
        &self,
        paths: &[String],
        owner: &WalletAddress,
    ) -> Result<Vec<ResolvedTarget>> {
        Database::targets_for_paths(self, paths, owner).await
    }

    async fn list_user_files(
        &self,
        owner: &WalletAddress,
        query: &ListQuery,
    ) -> Result<FileListPage> {
        Database::list_user_files(self, owner, query).await
    }

    async fn get_file_metadata(
        &self,
        cid: &str,
        owner: &WalletAddress,
    ) -> Result<Option<FileMetadata>> {
        Database::get_file_metadata(self, cid, owner).await
    }
}
