//! Configuration types for backup-engine
//!
//! Loading configuration from files or the environment is left to the
//! embedding application; these types only describe and validate it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Content gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Backup queue and executor settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Retrieval pool settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// In-memory backup registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Record store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject values the engine cannot run with
    ///
    /// Called by [`crate::Engine::new`] before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.backup.queue_capacity == 0 {
            return Err(config_error("backup.queue_capacity", "must be greater than zero"));
        }
        if self.backup.workers == 0 {
            return Err(config_error("backup.workers", "must be greater than zero"));
        }
        if self.backup.progress_step == 0 || self.backup.progress_step > 100 {
            return Err(config_error("backup.progress_step", "must be between 1 and 100"));
        }
        if !(1..=9).contains(&self.backup.compression_level) {
            return Err(config_error("backup.compression_level", "must be between 1 and 9"));
        }
        if self
            .backup
            .encryption_key
            .as_deref()
            .is_some_and(|key| key.is_empty())
        {
            return Err(config_error("backup.encryption_key", "must not be empty"));
        }
        if self.registry.sweep_interval.is_zero() {
            return Err(config_error("registry.sweep_interval", "must be greater than zero"));
        }
        if self.retrieval.max_concurrent_jobs == 0 {
            return Err(config_error(
                "retrieval.max_concurrent_jobs",
                "must be greater than zero",
            ));
        }

        let url = url::Url::parse(&self.gateway.url).map_err(|e| {
            config_error("gateway.url", format!("invalid URL {:?}: {}", self.gateway.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(config_error(
                "gateway.url",
                format!("unsupported scheme {:?}", url.scheme()),
            ));
        }
        if url.cannot_be_a_base() {
            return Err(config_error("gateway.url", "URL cannot be used as a base"));
        }

        Ok(())
    }
}

fn config_error(key: &str, message: impl Into<String>) -> Error {
    Error::Config {
        message: format!("{}: {}", key, message.into()),
        key: Some(key.to_string()),
    }
}

/// Content gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL, objects are requested as `{url}/{cid}` (default: "https://ipfs.io/ipfs")
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Upper bound for a whole fetch including the body transfer (default: 120 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_ms")]
    pub fetch_timeout: Duration,

    /// Directory fetched content is streamed into (default: "./scratch")
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// How long a served download stays on disk before it is deleted (default: 30 seconds)
    #[serde(default = "default_scratch_grace_period", with = "duration_ms")]
    pub scratch_grace_period: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            fetch_timeout: default_fetch_timeout(),
            scratch_dir: default_scratch_dir(),
            scratch_grace_period: default_scratch_grace_period(),
        }
    }
}

/// Backup queue and executor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Maximum number of jobs waiting in the queue (default: 100)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of workers draining the queue (default: 1)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Progress increment per executor step, in percent (default: 10)
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,

    /// Delay between executor steps (default: 1 second)
    #[serde(default = "default_step_delay", with = "duration_ms")]
    pub step_delay: Duration,

    /// Directory compressed and encrypted artifacts are written to, one
    /// subdirectory per job (default: "./staging")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Gzip level for the compress stage, 1 (fastest) to 9 (smallest) (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Passphrase the AES-256 key is derived from; jobs asking for
    /// encryption are rejected while this is unset (default: none)
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            progress_step: default_progress_step(),
            step_delay: default_step_delay(),
            staging_dir: default_staging_dir(),
            compression_level: default_compression_level(),
            encryption_key: None,
        }
    }
}

/// Retrieval pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Retrieval jobs allowed to run at once; further jobs wait as pending (default: 4)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Payloads larger than this are tried as CAR containers (default: 1 MiB)
    #[serde(default = "default_extract_threshold_bytes")]
    pub extract_threshold_bytes: u64,

    /// Prefix for the download URL recorded on each retrieved file
    /// (default: "/api/v1/retrieval/download")
    #[serde(default = "default_download_url_base")]
    pub download_url_base: String,

    /// How long shutdown waits for running retrievals to wind down (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// How long files recorded on a retrieval job stay in scratch storage (default: 1 hour)
    #[serde(default = "default_file_retention", with = "duration_ms")]
    pub file_retention: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            extract_threshold_bytes: default_extract_threshold_bytes(),
            download_url_base: default_download_url_base(),
            shutdown_timeout: default_shutdown_timeout(),
            file_retention: default_file_retention(),
        }
    }
}

/// Backup registry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long finished backup jobs stay queryable (default: 1 hour)
    #[serde(default = "default_registry_ttl", with = "duration_ms")]
    pub ttl: Duration,

    /// How often the sweeper looks for expired jobs (default: 60 seconds)
    #[serde(default = "default_sweep_interval", with = "duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: default_registry_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Record store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./backup-engine.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Retry policy for record store writes
    #[serde(default = "default_persistence_retry")]
    pub retry: RetryConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            retry: default_persistence_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 100 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 5 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_gateway_url() -> String {
    "https://ipfs.io/ipfs".to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./scratch")
}

fn default_scratch_grace_period() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_capacity() -> usize {
    100
}

fn default_workers() -> usize {
    1
}

fn default_progress_step() -> u8 {
    10
}

fn default_step_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_compression_level() -> u32 {
    6
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_extract_threshold_bytes() -> u64 {
    1024 * 1024
}

fn default_download_url_base() -> String {
    "/api/v1/retrieval/download".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_file_retention() -> Duration {
    Duration::from_secs(3600)
}

fn default_registry_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./backup-engine.db")
}

fn default_persistence_retry() -> RetryConfig {
    RetryConfig::default()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Durations are stored as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_documented_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.gateway.url, "https://ipfs.io/ipfs");
        assert_eq!(config.gateway.fetch_timeout, Duration::from_secs(120));
        assert_eq!(config.gateway.scratch_grace_period, Duration::from_secs(30));
        assert_eq!(config.backup.queue_capacity, 100);
        assert_eq!(config.backup.workers, 1);
        assert_eq!(config.backup.progress_step, 10);
        assert_eq!(config.backup.step_delay, Duration::from_secs(1));
        assert_eq!(config.backup.compression_level, 6);
        assert!(config.backup.encryption_key.is_none());
        assert_eq!(config.retrieval.max_concurrent_jobs, 4);
        assert_eq!(config.retrieval.extract_threshold_bytes, 1_048_576);
        assert_eq!(config.retrieval.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.retrieval.file_retention, Duration::from_secs(3600));
        assert_eq!(config.registry.ttl, Duration::from_secs(3600));
        assert_eq!(config.persistence.retry.max_attempts, 3);
        assert_eq!(
            config.persistence.retry.initial_delay,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config: Config = serde_json::from_str(
            r#"{"backup": {"step_delay": 250}, "gateway": {"fetch_timeout": 1500}}"#,
        )
        .unwrap();

        assert_eq!(config.backup.step_delay, Duration::from_millis(250));
        assert_eq!(config.gateway.fetch_timeout, Duration::from_millis(1500));
        // Untouched siblings keep their defaults
        assert_eq!(config.backup.workers, 1);
    }

    #[test]
    fn durations_serialize_as_milliseconds() {
        let json = serde_json::to_value(RetryConfig::default()).unwrap();
        assert_eq!(json["initial_delay"], 100);
        assert_eq!(json["max_delay"], 5000);
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_capacities_are_rejected_with_key() {
        let mut config = Config::default();
        config.backup.workers = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("backup.workers")),
            other => panic!("expected config error, got {other:?}"),
        }

        let mut config = Config::default();
        config.backup.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backup.progress_step = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.registry.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backup_codec_settings_are_checked() {
        let mut config = Config::default();
        config.backup.compression_level = 10;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("backup.compression_level"))
            }
            other => panic!("expected config error, got {other:?}"),
        }

        let mut config = Config::default();
        config.backup.encryption_key = Some(String::new());
        assert!(config.validate().is_err());

        // The passphrase never leaves the process through serialized config
        config.backup.encryption_key = Some("hunter2".into());
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["backup"].get("encryption_key").is_none());
    }

    #[test]
    fn gateway_url_must_be_http() {
        let mut config = Config::default();
        config.gateway.url = "ftp://gateway.example/ipfs".into();
        assert!(config.validate().is_err());

        config.gateway.url = "not a url".into();
        assert!(config.validate().is_err());

        config.gateway.url = "http://127.0.0.1:8080".into();
        config.validate().unwrap();
    }
}
