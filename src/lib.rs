//! # backup-engine
//!
//! Asynchronous job engine behind a decentralized-storage backup service.
//!
//! Two job kinds run in the background while callers poll for status:
//! - **Backups** go through a bounded queue drained by a fixed worker pool.
//!   Their state lives in memory and is evicted some time after it settles.
//! - **Retrievals** run one task per job behind a concurrency limit. Each
//!   job resolves its file set, fetches every item from a content gateway,
//!   unpacks CAR containers and records progress in SQLite.
//!
//! Both honor cancellation and a coordinated shutdown. The HTTP layer and
//! authentication live outside this crate; they consume the typed requests
//! and results re-exported here.
//!
//! ## Quick Start
//!
//! ```no_run
//! use backup_engine::{Config, Engine, RetrievalRequest, WalletAddress};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let owner = WalletAddress::parse("0xabc")?;
//!     let request = RetrievalRequest {
//!         cids: vec!["bafybeigdyrzt".to_string()],
//!         ..Default::default()
//!     };
//!     let created = engine.retrievals().create_job(request, &owner).await?;
//!     println!("retrieval {} queued", created.id);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backup queue, workers and executor
pub mod backup;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Composition root and shutdown coordination
pub mod engine;
/// Error types
pub mod error;
/// CAR container extraction
pub mod extraction;
/// Content gateway client and scratch files
pub mod fetch;
/// In-memory backup job registry
pub mod registry;
/// Retrieval job coordination and pipeline
pub mod retrieval;
/// Retry logic with exponential backoff
pub mod retry;
/// Storage seam used by the retrieval side
pub mod store;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use backup::{BackupQueue, BackupService, EncryptionKey};
pub use config::{
    BackupConfig, Config, GatewayConfig, PersistenceConfig, RegistryConfig, RetrievalConfig,
    RetryConfig,
};
pub use db::Database;
pub use engine::Engine;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, FetchError, Result, ToHttpStatus};
pub use extraction::{CarExtractor, CarSummary};
pub use fetch::{ContentFetcher, FetchedContent, GatewayFetcher};
pub use registry::JobRegistry;
pub use retrieval::RetrievalCoordinator;
pub use store::RetrievalStore;
pub use types::{
    BackupArtifact, BackupJob, BackupJobId, BackupOptions, BackupRequest, BackupSchedule,
    BackupStage, BackupStatus, BackupSubmitted, DownloadedFile, Event, FileListPage, FileMetadata,
    ListQuery, RetrievalCreated, RetrievalFormat, RetrievalJob, RetrievalJobId, RetrievalRequest,
    RetrievalStatus, RetrievedFile, RetrievedFileStatus, StorageDeal, UserFile, WalletAddress,
};

/// Block until SIGTERM or SIGINT (Ctrl+C elsewhere), then shut the engine down
///
/// ```no_run
/// use backup_engine::{Config, Engine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Engine::new(Config::default()).await?;
///     // Hand clones to the request layer first
///     run_with_shutdown(engine).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: Engine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in sandboxes; fall back to whatever is available
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut term), Ok(mut int)) => {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "stopping engine");
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "one signal handler unavailable, listening on the other");
            only.recv().await;
            tracing::info!("stopping engine");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "no signal handlers available, waiting on ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for Ctrl+C");
        return;
    }
    tracing::info!(signal = "ctrl_c", "stopping engine");
}
