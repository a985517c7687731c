//! Core types for backup-engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a backup job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupJobId(pub Uuid);

impl BackupJobId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BackupJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BackupJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BackupJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a retrieval job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievalJobId(pub Uuid);

impl RetrievalJobId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RetrievalJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RetrievalJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RetrievalJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// Both identifiers are stored as hyphenated TEXT
impl sqlx::Type<sqlx::Sqlite> for BackupJobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for BackupJobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for BackupJobId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(Uuid::parse_str(&text)?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for RetrievalJobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RetrievalJobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode(self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RetrievalJobId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(Uuid::parse_str(&text)?))
    }
}

/// Wallet address identifying the owner of jobs and catalog records
///
/// Addresses are trimmed and lowercased on construction, so two spellings of
/// the same hex address compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Normalize and validate a caller-supplied address
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(Error::validation(
                "wallet_address",
                "wallet address must not be empty",
            ));
        }
        Ok(Self(normalized))
    }

    /// The normalized address
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Backup jobs
// ---------------------------------------------------------------------------

/// Backup job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    /// Accepted and waiting for a worker
    Pending,
    /// Being executed by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl BackupStatus {
    /// Completed and failed jobs never change status again
    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            BackupStatus::Pending => 0,
            BackupStatus::Running => 1,
            BackupStatus::Completed | BackupStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle moving forward
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }

    /// Lowercase name used in messages
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

/// Stage of a running backup job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStage {
    /// Checking the file list
    Validate,
    /// Compressing the file set
    Compress,
    /// Encrypting the file set
    Encrypt,
    /// Handing the file set to storage
    Upload,
}

/// Recurrence requested for a backup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupSchedule {
    /// Once per day
    Daily,
    /// Once per week
    Weekly,
    /// Once per month
    Monthly,
}

impl BackupSchedule {
    /// Parse the request's schedule string; an empty string means "run once"
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        match raw.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "daily" => Ok(Some(BackupSchedule::Daily)),
            "weekly" => Ok(Some(BackupSchedule::Weekly)),
            "monthly" => Ok(Some(BackupSchedule::Monthly)),
            other => Err(Error::validation(
                "options.schedule",
                format!("invalid schedule {other:?}: expected daily, weekly or monthly"),
            )),
        }
    }
}

/// Options attached to a backup request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    /// Compress the file set before upload
    #[serde(default)]
    pub compression: bool,
    /// Encrypt the file set before upload
    #[serde(default)]
    pub encryption: bool,
    /// Recurrence: "", "daily", "weekly" or "monthly"
    #[serde(default)]
    pub schedule: String,
}

/// Request to back up a set of files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Files to back up
    pub files: Vec<String>,
    /// Where the backup should be stored
    pub destination: String,
    /// Processing options
    #[serde(default)]
    pub options: BackupOptions,
}

impl BackupRequest {
    /// Check the request and return its parsed schedule
    pub fn validate(&self) -> Result<Option<BackupSchedule>> {
        if self.files.is_empty() {
            return Err(Error::validation("files", "at least one file is required"));
        }
        if self.files.iter().any(|f| f.trim().is_empty()) {
            return Err(Error::validation("files", "file names must not be blank"));
        }
        if self.destination.trim().is_empty() {
            return Err(Error::validation(
                "destination",
                "destination must not be empty",
            ));
        }
        BackupSchedule::parse(&self.options.schedule)
    }
}

/// Snapshot of a backup job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupJob {
    /// Job identifier
    pub id: BackupJobId,
    /// Current status
    pub status: BackupStatus,
    /// Files being backed up
    pub files: Vec<String>,
    /// Backup destination
    pub destination: String,
    /// Options from the request
    pub options: BackupOptions,
    /// Parsed recurrence, if any
    pub schedule: Option<BackupSchedule>,
    /// Progress percentage (0-100), never decreases
    pub progress: u8,
    /// When the job was accepted
    pub created_at: DateTime<Utc>,
    /// Last status or progress change
    pub updated_at: DateTime<Utc>,
    /// Failure reason for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What the stages produced for each source file, set once the job is staged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<BackupArtifact>,
}

/// One source file of a backup and the staged file standing in for it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    /// Source path from the request
    pub source: String,
    /// Source size in bytes
    pub size: u64,
    /// Hex sha2-256 of the source contents
    pub sha256: String,
    /// Source modification time
    pub modified: DateTime<Utc>,
    /// File handed to storage: the source itself, or its compressed and/or encrypted copy
    pub staged_path: PathBuf,
    /// Size of `staged_path` in bytes
    pub staged_size: u64,
}

impl BackupJob {
    /// Build a pending job from a validated request
    pub fn pending(request: BackupRequest, schedule: Option<BackupSchedule>) -> Self {
        let now = Utc::now();
        Self {
            id: BackupJobId::new(),
            status: BackupStatus::Pending,
            files: request.files,
            destination: request.destination,
            options: request.options,
            schedule,
            progress: 0,
            created_at: now,
            updated_at: now,
            error: None,
            artifacts: Vec::new(),
        }
    }
}

/// Response to a backup submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupSubmitted {
    /// Identifier to poll with
    pub id: BackupJobId,
    /// Status at submission time
    pub status: BackupStatus,
    /// Human-readable summary
    pub message: String,
}

// ---------------------------------------------------------------------------
// Retrieval jobs
// ---------------------------------------------------------------------------

/// Representation a retrieval delivers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalFormat {
    /// The original payload, unpacked from its CAR container when possible
    #[default]
    Original,
    /// The raw CAR container
    Car,
    /// A JSON description of the catalog record
    Metadata,
}

impl RetrievalFormat {
    /// Name used in storage and URLs
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalFormat::Original => "original",
            RetrievalFormat::Car => "car",
            RetrievalFormat::Metadata => "metadata",
        }
    }
}

impl std::str::FromStr for RetrievalFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "original" => Ok(RetrievalFormat::Original),
            "car" => Ok(RetrievalFormat::Car),
            "metadata" => Ok(RetrievalFormat::Metadata),
            other => Err(Error::validation(
                "format",
                format!("unknown format {other:?}"),
            )),
        }
    }
}

/// Retrieval job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStatus {
    /// Persisted, waiting for a pool slot
    Pending,
    /// Pipeline is running
    Processing,
    /// At least one file was retrieved
    Completed,
    /// No file could be retrieved, or the job was interrupted
    Failed,
    /// Cancelled by the owner
    Cancelled,
}

impl RetrievalStatus {
    /// Terminal statuses are never overwritten
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RetrievalStatus::Completed | RetrievalStatus::Failed | RetrievalStatus::Cancelled
        )
    }

    /// Name used in storage
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalStatus::Pending => "pending",
            RetrievalStatus::Processing => "processing",
            RetrievalStatus::Completed => "completed",
            RetrievalStatus::Failed => "failed",
            RetrievalStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for RetrievalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RetrievalStatus::Pending),
            "processing" => Ok(RetrievalStatus::Processing),
            "completed" => Ok(RetrievalStatus::Completed),
            "failed" => Ok(RetrievalStatus::Failed),
            "cancelled" => Ok(RetrievalStatus::Cancelled),
            other => Err(Error::Other(format!("unknown retrieval status {other:?}"))),
        }
    }
}

/// Request to retrieve files
///
/// Exactly one input shape is used, in this order: `backup_job_id`, then
/// `cids`, then `file_paths`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// Retrieve every file of this backup job
    #[serde(default)]
    pub backup_job_id: Option<BackupJobId>,
    /// Retrieve these content identifiers verbatim
    #[serde(default)]
    pub cids: Vec<String>,
    /// Retrieve the catalog files stored under these paths
    #[serde(default)]
    pub file_paths: Vec<String>,
    /// Representation to deliver (default: original)
    #[serde(default)]
    pub format: RetrievalFormat,
}

impl RetrievalRequest {
    /// Reject requests that name nothing to retrieve or contain blank entries
    pub fn validate(&self) -> Result<()> {
        if self.backup_job_id.is_none() && self.cids.is_empty() && self.file_paths.is_empty() {
            return Err(Error::Validation {
                message: "must specify backup_job_id, cids, or file_paths".to_string(),
                field: None,
            });
        }
        if self.cids.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::validation("cids", "content identifiers must not be blank"));
        }
        if self.file_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::validation("file_paths", "file paths must not be blank"));
        }
        Ok(())
    }
}

/// Outcome recorded for one retrieved file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievedFileStatus {
    /// Content is in scratch storage
    Retrieved,
}

/// A file the pipeline retrieved
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFile {
    /// Content identifier that was fetched
    pub cid: String,
    /// Catalog path, or the identifier itself for explicit requests
    pub file_path: String,
    /// Size in bytes of the delivered content
    pub size: u64,
    /// MIME type of the delivered content
    pub content_type: String,
    /// Always `retrieved`
    pub status: RetrievedFileStatus,
    /// Where the content was written
    pub local_path: PathBuf,
    /// URL the request layer serves this file under
    pub download_url: String,
}

/// A retrieval job record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalJob {
    /// Job identifier
    pub id: RetrievalJobId,
    /// Parent backup job, if the request named one
    pub backup_job_id: Option<BackupJobId>,
    /// Explicit identifiers from the request
    pub cids: Vec<String>,
    /// Explicit paths from the request
    pub file_paths: Vec<String>,
    /// Requested representation
    pub format: RetrievalFormat,
    /// Current status
    pub status: RetrievalStatus,
    /// Attempted items as a percentage (0-100)
    pub progress: u8,
    /// Latest human-readable status message
    pub message: String,
    /// Retrieved files in resolution order
    pub files: Vec<RetrievedFile>,
    /// Sum of `files[*].size`
    pub total_size: u64,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Owner of the job
    pub wallet_address: WalletAddress,
    /// Free-form annotations
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievalJob {
    /// Build the initial record for a validated request
    pub fn pending(request: RetrievalRequest, owner: WalletAddress) -> Self {
        Self {
            id: RetrievalJobId::new(),
            backup_job_id: request.backup_job_id,
            cids: request.cids,
            file_paths: request.file_paths,
            format: request.format,
            status: RetrievalStatus::Pending,
            progress: 0,
            message: "Retrieval job queued".to_string(),
            files: Vec::new(),
            total_size: 0,
            created_at: Utc::now(),
            completed_at: None,
            wallet_address: owner,
            metadata: serde_json::Map::new(),
        }
    }

    /// Append a retrieved file and account for its size
    pub fn record_file(&mut self, file: RetrievedFile) {
        self.total_size += file.size;
        self.files.push(file);
    }

    /// Progress after `attempted` of `total` items, never lowered
    pub fn record_attempts(&mut self, attempted: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = (attempted.min(total) * 100 / total) as u8;
        self.progress = self.progress.max(percent);
    }

    /// Whether `caller` owns this job
    pub fn is_owned_by(&self, caller: &WalletAddress) -> bool {
        &self.wallet_address == caller
    }
}

/// Response to a retrieval submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalCreated {
    /// Identifier to poll with
    pub id: RetrievalJobId,
    /// Status at submission time
    pub status: RetrievalStatus,
    /// Human-readable summary
    pub message: String,
    /// Progress at submission time
    pub progress: u8,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Number of explicitly named identifiers and paths
    pub total_files: usize,
}

/// One item the pipeline will fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Content identifier to fetch
    pub cid: String,
    /// Path recorded on the retrieved file
    pub file_path: String,
}

impl ResolvedTarget {
    /// An explicitly requested identifier, recorded under its own name
    pub fn from_cid(cid: &str) -> Self {
        Self {
            cid: cid.to_string(),
            file_path: cid.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog views
// ---------------------------------------------------------------------------

/// A backed-up file as listed for its owner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserFile {
    /// Catalog row id
    pub id: i64,
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
    /// Catalog status of the file
    pub status: String,
    /// When the file was cataloged
    pub created_at: DateTime<Utc>,
    /// Free-form catalog metadata
    pub metadata: serde_json::Value,
    /// Backup job the file belongs to
    pub backup_job_id: BackupJobId,
    /// Status of that backup job
    pub backup_status: String,
}

/// A storage deal made for a backup job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageDeal {
    /// Storage provider
    pub miner_id: String,
    /// Deal proposal identifier, once known
    pub deal_cid: Option<String>,
    /// Agreed price
    pub price: f64,
    /// Deal size in bytes
    pub size: u64,
    /// Deal duration in epochs
    pub duration: i64,
    /// Deal status
    pub status: String,
    /// Whether the deal is verified
    pub verified_deal: bool,
}

/// Full catalog description of one file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// The catalog record
    #[serde(flatten)]
    pub file: UserFile,
    /// Wallet that made the storage deals
    pub wallet_address: Option<WalletAddress>,
    /// Deals of the owning backup job
    pub storage_deals: Vec<StorageDeal>,
    /// Gateway the content is served from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Paging and filtering for file listings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// 1-based page (default: 1)
    #[serde(default)]
    pub page: u32,
    /// Page size, 1..=100 (default: 20)
    #[serde(default)]
    pub limit: u32,
    /// Only list files with this catalog status
    #[serde(default)]
    pub status: Option<String>,
}

impl ListQuery {
    /// Default page size
    pub const DEFAULT_LIMIT: u32 = 20;
    /// Largest accepted page size
    pub const MAX_LIMIT: u32 = 100;

    /// Replace out-of-range paging values with the defaults
    pub fn normalized(&self) -> Self {
        let page = if self.page == 0 { 1 } else { self.page };
        let limit = if (1..=Self::MAX_LIMIT).contains(&self.limit) {
            self.limit
        } else {
            Self::DEFAULT_LIMIT
        };
        let status = self
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            page,
            limit,
            status,
        }
    }

    /// Rows to skip for this page
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// One page of a file listing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileListPage {
    /// Files on this page
    pub files: Vec<UserFile>,
    /// Files matching the filter across all pages
    pub total_count: u64,
    /// Payload bytes matching the filter across all pages
    pub total_size: u64,
    /// Page number
    pub page: u32,
    /// Page size
    pub limit: u32,
    /// Whether a further page exists
    pub has_more: bool,
}

/// A single file fetched for direct download
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// Scratch file holding the content; deleted after the grace period
    pub local_path: PathBuf,
    /// MIME type to serve
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
    /// Suggested attachment filename
    pub filename: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Backup job admitted to the queue
    BackupQueued {
        /// Job ID
        id: BackupJobId,
    },

    /// Backup job rejected because the queue was full
    BackupDropped {
        /// Job ID
        id: BackupJobId,
        /// Why it was dropped
        reason: String,
    },

    /// Backup job advanced
    BackupProgress {
        /// Job ID
        id: BackupJobId,
        /// Stage being executed
        stage: BackupStage,
        /// Progress percentage
        percent: u8,
    },

    /// Backup job finished
    BackupCompleted {
        /// Job ID
        id: BackupJobId,
    },

    /// Backup job failed
    BackupFailed {
        /// Job ID
        id: BackupJobId,
        /// Failure reason
        error: String,
    },

    /// Retrieval job persisted and handed to the pool
    RetrievalQueued {
        /// Job ID
        id: RetrievalJobId,
    },

    /// Retrieval pipeline resolved its file set
    RetrievalStarted {
        /// Job ID
        id: RetrievalJobId,
        /// Number of resolved items
        total_files: usize,
    },

    /// One item was retrieved
    RetrievalFileRetrieved {
        /// Job ID
        id: RetrievalJobId,
        /// Content identifier
        cid: String,
        /// Delivered size in bytes
        size: u64,
    },

    /// One item failed; the job continues
    RetrievalFileFailed {
        /// Job ID
        id: RetrievalJobId,
        /// Content identifier
        cid: String,
        /// Failure reason
        error: String,
    },

    /// Retrieval job completed with at least one file
    RetrievalCompleted {
        /// Job ID
        id: RetrievalJobId,
        /// Number of retrieved files
        retrieved: usize,
        /// Total retrieved bytes
        total_size: u64,
    },

    /// Retrieval job failed
    RetrievalFailed {
        /// Job ID
        id: RetrievalJobId,
        /// Failure reason
        error: String,
    },

    /// Retrieval job stopped after a cancellation
    RetrievalCancelled {
        /// Job ID
        id: RetrievalJobId,
        /// Files retrieved before the cancellation
        retrieved: usize,
    },

    /// Engine is shutting down
    Shutdown,
}
