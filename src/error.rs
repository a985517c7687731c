//! Errors returned by the engine
//!
//! [`Error`] is what every public operation returns. [`ToHttpStatus`] and
//! [`ApiError`] let an embedding request layer turn one into a response
//! without matching on variants itself.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Shorthand for `Result<T, Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of an engine operation
///
/// Every public operation returns this type. Per-item fetch failures inside a
/// retrieval job are recorded on the job instead of being returned.
#[derive(Debug, Error)]
pub enum Error {
    /// Request rejected before any state was created
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of what is wrong with the request
        message: String,
        /// The request field that failed validation (e.g., "files")
        field: Option<String>,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with the value
        message: String,
        /// Dotted path of the offending setting (e.g., "backup.workers")
        key: Option<String>,
    },

    /// Job or catalog record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller identity does not own the requested resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Operation not allowed in the job's current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job the operation targeted
        id: String,
        /// The operation that was attempted (e.g., "cancel")
        operation: String,
        /// The state that prevents the operation (e.g., "completed")
        current_state: String,
    },

    /// Backup queue is at capacity, the job was not admitted
    #[error("backup queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The engine is stopping and admits no new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Content gateway fetch failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    Extraction {
        /// The container file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Driver error from sqlx
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network error outside of a content fetch
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Anything without a dedicated variant
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a validation error tied to a request field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

/// Failures of the SQLite record store
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Pool could not be opened
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Schema setup failed
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// A statement failed, the message names which one
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Expected row is missing
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Content gateway fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Gateway answered with a non-success status
    #[error("gateway returned HTTP {status} for {url}")]
    Status {
        /// HTTP status code returned by the gateway
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// Request could not be sent or the body stream broke
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The whole fetch exceeded the configured timeout
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The owning job was cancelled while the transfer was in flight
    #[error("fetch cancelled")]
    Cancelled,

    /// Identifier is empty or would escape the scratch directory
    #[error("invalid content identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Writing to scratch storage failed
    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON body a request layer returns for a failed engine call
///
/// ```json
/// {
///   "error": {
///     "code": "forbidden",
///     "message": "forbidden: access to retrieval job denied"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Wrapped so the body always has a single `error` key
    pub error: ErrorDetail,
}

/// Body of an [`ApiError`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable snake_case code from [`ToHttpStatus::error_code`]
    pub code: String,

    /// The error's `Display` text
    pub message: String,

    /// Structured fields for variants that carry them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Body with no structured details
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Attach structured details to the body
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }
}

/// HTTP mapping for errors surfaced by the engine
pub trait ToHttpStatus {
    /// Status the request layer should answer with
    fn status_code(&self) -> u16;

    /// Stable snake_case code for clients
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } | Error::Config { .. } => 400,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) | Error::Database(DatabaseError::NotFound(_)) => 404,
            Error::InvalidState { .. } => 409,
            Error::Extraction { .. } => 422,
            Error::Fetch(_) | Error::Network(_) => 502,
            Error::QueueFull { .. } | Error::ShuttingDown => 503,
            Error::Database(_)
            | Error::Sqlx(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation { .. } => "validation_error",
            Error::Config { .. } => "config_error",
            Error::NotFound(_) | Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Forbidden(_) => "forbidden",
            Error::InvalidState { .. } => "invalid_state",
            Error::QueueFull { .. } => "queue_full",
            Error::ShuttingDown => "shutting_down",
            Error::Fetch(FetchError::Timeout(_)) => "fetch_timeout",
            Error::Fetch(FetchError::Cancelled) => "fetch_cancelled",
            Error::Fetch(FetchError::InvalidIdentifier(_)) => "invalid_identifier",
            Error::Fetch(_) => "fetch_error",
            Error::Extraction { .. } => "extraction_failed",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Network(_) => "network_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl Error {
    fn details(&self) -> Option<serde_json::Value> {
        use serde_json::json;

        match self {
            Error::Validation {
                field: Some(field), ..
            } => Some(json!({ "field": field })),
            Error::Config { key: Some(key), .. } => Some(json!({ "key": key })),
            Error::InvalidState {
                id,
                operation,
                current_state,
            } => Some(json!({
                "job_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::QueueFull { capacity } => Some(json!({ "capacity": capacity })),
            Error::Fetch(FetchError::Status { status, .. }) => {
                Some(json!({ "gateway_status": status }))
            }
            _ => None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let api = ApiError::new(error.error_code(), error.to_string());
        match error.details() {
            Some(details) => api.with_details(details),
            None => api,
        }
    }
}
