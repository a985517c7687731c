//! Retry logic with exponential backoff
//!
//! Record store writes made by running jobs go through [`with_retry`] so that
//! a briefly locked or unavailable database does not lose job progress.
//!
//! # Example
//!
//! ```no_run
//! use backup_engine::config::RetryConfig;
//! use backup_engine::retry::with_retry;
//! use backup_engine::{Database, RetrievalJob};
//!
//! # async fn example(db: &Database, job: &RetrievalJob) -> backup_engine::Result<()> {
//! let policy = RetryConfig::default();
//! // A locked database is retried, a missing row is not
//! with_retry(&policy, || db.update_retrieval_job(job)).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DatabaseError, Error, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies a failure as worth another attempt
///
/// A locked database or a reset connection is transient. A missing row or a
/// rejected request is not.
pub trait IsRetryable {
    /// Whether repeating the same operation could succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Database(DatabaseError::QueryFailed(msg))
            | Error::Database(DatabaseError::ConnectionFailed(msg)) => {
                let msg = msg.to_lowercase();
                msg.contains("locked")
                    || msg.contains("busy")
                    || msg.contains("timed out")
                    || msg.contains("pool")
                    || msg.contains("connection")
            }
            Error::Database(_) => false,
            Error::Sqlx(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            Error::Io(e) => is_transient_io(e),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Fetch(e) => e.is_retryable(),
            Error::Validation { .. }
            | Error::Config { .. }
            | Error::NotFound(_)
            | Error::Forbidden(_)
            | Error::InvalidState { .. }
            | Error::QueueFull { .. }
            | Error::ShuttingDown
            | Error::Extraction { .. }
            | Error::Serialization(_)
            | Error::Other(_) => false,
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Request(e) => e.is_timeout() || e.is_connect(),
            FetchError::Io(e) => is_transient_io(e),
            FetchError::Timeout(_) | FetchError::Cancelled | FetchError::InvalidIdentifier(_) => {
                false
            }
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// Makes at most `config.max_attempts` retries after the first call. A
/// failure that is not [`IsRetryable::is_retryable`] is returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut delay = config.initial_delay;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(retries, "operation recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::debug!(error = %err, "not retrying permanent failure");
            return Err(err);
        }
        if retries >= config.max_attempts {
            tracing::error!(
                error = %err,
                attempts = retries + 1,
                "giving up, retry attempts exhausted"
            );
            return Err(err);
        }

        retries += 1;
        let wait = if config.jitter { add_jitter(delay) } else { delay };
        tracing::warn!(
            error = %err,
            retry = retries,
            max_attempts = config.max_attempts,
            wait_ms = wait.as_millis() as u64,
            "transient failure, backing off"
        );
        tokio::time::sleep(wait).await;
        delay = next_delay(delay, config);
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
