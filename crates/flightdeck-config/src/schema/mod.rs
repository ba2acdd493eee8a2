//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod schema_resources;

pub use schema_resources::*;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub resources: ResourcesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Flight engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of runs executing a step at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Interval between store polls in `Engine::wait_for`.
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    /// Timeout used by callers that do not pass one explicitly.
    #[serde(default = "default_wait_timeout_secs")]
    pub default_wait_timeout_secs: u64,

    /// Resume RUNNING and WAITING runs when the engine starts.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,

    /// First delay before a slice aborted by a store error is retried.
    #[serde(default = "default_store_retry_initial_ms")]
    pub store_retry_initial_ms: u64,

    /// Ceiling for the doubling store-error backoff.
    #[serde(default = "default_store_retry_max_ms")]
    pub store_retry_max_ms: u64,
}

fn default_max_workers() -> usize {
    8
}

fn default_status_poll_interval_ms() -> u64 {
    500
}

fn default_wait_timeout_secs() -> u64 {
    3600
}

fn default_store_retry_initial_ms() -> u64 {
    100
}

fn default_store_retry_max_ms() -> u64 {
    30_000
}

pub(crate) fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            default_wait_timeout_secs: default_wait_timeout_secs(),
            recover_on_start: default_true(),
            store_retry_initial_ms: default_store_retry_initial_ms(),
            store_retry_max_ms: default_store_retry_max_ms(),
        }
    }
}

/// Run store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Runs are kept in process memory only.
    Memory,
    /// One JSON file per run, grouped by status.
    File,
    /// SQLite database.
    Sqlite,
}

/// Run store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Directory (file backend) or database file (sqlite backend).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files. Defaults to `~/.flightdeck/logs`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// Log directory, falling back to `~/.flightdeck/logs`.
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".flightdeck").join("logs"))
                .unwrap_or_else(|| PathBuf::from(".flightdeck/logs"))
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
