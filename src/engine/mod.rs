//! Composition root tying the job services together.
//!
//! [`Engine`] owns the configuration, the record store, the backup registry,
//! the event channel and both job services. Request handlers hold a clone and
//! reach the services through [`Engine::backups`] and [`Engine::retrievals`].

mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::backup::BackupService;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetch::{ContentFetcher, GatewayFetcher};
use crate::registry::JobRegistry;
use crate::retrieval::RetrievalCoordinator;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Events buffered per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Backup and retrieval engine (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Engine {
    /// Record store, public so embedders and integration tests can query it
    pub db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) registry: JobRegistry,
    pub(crate) backups: BackupService,
    pub(crate) retrievals: RetrievalCoordinator,
    /// Stops the registry sweeper
    pub(crate) sweeper_token: CancellationToken,
    pub(crate) sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Engine {
    /// Create an engine fetching content from the configured gateway
    ///
    /// This:
    /// - Validates the configuration
    /// - Creates the scratch directory
    /// - Opens the database and runs migrations
    /// - Fails retrieval jobs a previous run left unfinished
    /// - Starts the backup workers and the registry sweeper
    pub async fn new(config: Config) -> Result<Self> {
        let fetcher = Arc::new(GatewayFetcher::new(&config.gateway)?);
        Self::with_fetcher(config, fetcher).await
    }

    /// Like [`Engine::new`], with a caller-supplied content fetcher
    pub async fn with_fetcher(config: Config, fetcher: Arc<dyn ContentFetcher>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.gateway.scratch_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create scratch directory '{}': {}",
                        config.gateway.scratch_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;

        let interrupted = db.fail_interrupted_retrievals().await?;
        if interrupted > 0 {
            tracing::warn!(
                count = interrupted,
                "marked retrieval jobs from a previous run as failed"
            );
        }

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let config = Arc::new(config);
        let db = Arc::new(db);

        let registry = JobRegistry::new(config.registry.ttl);
        let sweeper_token = CancellationToken::new();
        let sweeper = registry.spawn_sweeper(config.registry.sweep_interval, sweeper_token.clone());

        let backups =
            BackupService::start(config.backup.clone(), registry.clone(), event_tx.clone());
        let retrievals = RetrievalCoordinator::new(
            Arc::clone(&config),
            db.clone(),
            fetcher,
            event_tx.clone(),
        );

        tracing::info!(
            gateway = %config.gateway.url,
            backup_workers = config.backup.workers,
            max_concurrent_retrievals = config.retrieval.max_concurrent_jobs,
            "engine started"
        );

        Ok(Self {
            db,
            config,
            event_tx,
            registry,
            backups,
            retrievals,
            sweeper_token,
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
        })
    }

    /// Subscribe to job events
    ///
    /// Each subscriber receives every event independently. One that falls
    /// more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Backup submission and status
    pub fn backups(&self) -> &BackupService {
        &self.backups
    }

    /// Retrieval jobs and file queries
    pub fn retrievals(&self) -> &RetrievalCoordinator {
        &self.retrievals
    }

    /// In-memory backup job registry
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// The configuration the engine was started with
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}
