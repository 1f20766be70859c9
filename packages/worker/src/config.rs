use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{DatabaseConfig, RetryConfig};

/// Delivery worker configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Unique identifier for this worker instance. Default: "mailqueue-worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Run the delivery loop at all. Default: true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between polls. Default: 30.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Items claimed per poll. Default: 10.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// How long a claimed item is hidden from other workers. Default: 300.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Seconds between quarantine purges. Default: 3600.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// Quarantined items older than this are purged. Default: 604800 (7 days).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Drop directory picked up by the local MTA. Default: "./outbox".
    #[serde(default = "default_pickup_dir")]
    pub pickup_dir: PathBuf,
    /// Envelope sender for items that carry none.
    #[serde(default)]
    pub default_sender: Option<String>,
}

fn default_worker_id() -> String {
    "mailqueue-worker-1".into()
}
fn default_enabled() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_batch_size() -> u64 {
    10
}
fn default_lease_secs() -> u64 {
    300
}
fn default_purge_interval_secs() -> u64 {
    3_600
}
fn default_retention_secs() -> u64 {
    604_800
}
fn default_pickup_dir() -> PathBuf {
    PathBuf::from("./outbox")
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Never shorter than a second; a zero lease cannot exclude other workers.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs.max(1))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
            purge_interval_secs: default_purge_interval_secs(),
            retention_secs: default_retention_secs(),
            pickup_dir: default_pickup_dir(),
            default_sender: None,
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl WorkerAppConfig {
    /// Defaults, then `config/config` (or `$MAILQUEUE_CONFIG`), then
    /// `MAILQUEUE__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("MAILQUEUE_CONFIG").unwrap_or_else(|_| "config/config".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("worker.id", default_worker_id())?
            .set_default("worker.batch_size", 10_i64)?
            .set_default("database.url", "sqlite::memory:")?
            .set_default("retry.max_attempts", 5_i64)?
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("MAILQUEUE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
