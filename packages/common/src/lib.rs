pub mod config;
pub mod fingerprint;
pub mod retry;

pub use config::{DatabaseConfig, RetryConfig};
pub use fingerprint::{FingerprintError, InsertFingerprint};
pub use retry::{RetryPolicy, calculate_backoff};
