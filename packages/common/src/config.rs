use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Storage connection settings shared by producers and the delivery worker.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection URL. Default: "sqlite::memory:".
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Upper bound for a single repository statement. Default: 5000.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Connection pool size. Default: 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite::memory:".into()
}
fn default_statement_timeout_ms() -> u64 {
    5_000
}
fn default_max_connections() -> u32 {
    10
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// SQLite in-memory URL: private to one process and lost on exit.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            statement_timeout_ms: default_statement_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

/// Redelivery schedule for failed notifications.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Attempts after which an item is quarantined. Default: 5.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Delay before the first retry. Default: 300 (5 minutes).
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Growth factor applied per attempt. Default: 5.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    /// Cap on any single delay. Default: 259200 (3 days).
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Add 0-25% random jitter to each delay. Default: false.
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> i32 {
    5
}
fn default_base_delay_secs() -> u64 {
    300
}
fn default_multiplier() -> u32 {
    5
}
fn default_max_delay_secs() -> u64 {
    259_200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
            jitter: false,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.base_delay_secs),
            multiplier: config.multiplier,
            max_delay: Duration::from_secs(config.max_delay_secs),
            jitter: config.jitter,
        }
    }
}
