//! Resource lifecycle flight configuration (retry policies, sub-flight waiting).

use serde::{Deserialize, Serialize};

/// Retry policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RetryPolicyConfig {
    /// Never retry.
    None,
    /// Fixed delay between attempts, at most `max_count` retries.
    Fixed { interval_ms: u64, max_count: u32 },
    /// Doubling delay capped at `max_ms`, abandoned after `max_total_secs`.
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        max_total_secs: u64,
    },
}

/// Order in which the deletion orchestrator runs sibling sub-flights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionMode {
    /// One sub-flight at a time, in caller order.
    #[default]
    Sequential,
    /// Submit every outstanding sub-flight, then wait for all of them.
    Concurrent,
}

/// Polling settings used while a step waits on a sub-flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_initial_interval_secs")]
    pub initial_interval_secs: u64,

    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Overall ceiling before the wait surfaces as a retryable timeout.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    #[serde(default)]
    pub max_polls: Option<u32>,
}

fn default_initial_interval_secs() -> u64 {
    10
}

fn default_max_interval_secs() -> u64 {
    300
}

fn default_max_duration_secs() -> u64 {
    6 * 60 * 60
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            max_duration_secs: default_max_duration_secs(),
            max_polls: None,
        }
    }
}

/// Configuration shared by the resource lifecycle flights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Policy for steps that call cloud provider APIs.
    #[serde(default = "default_cloud_retry")]
    pub cloud_retry: RetryPolicyConfig,

    /// Policy for steps that only touch workspace metadata.
    #[serde(default = "default_metadata_retry")]
    pub metadata_retry: RetryPolicyConfig,

    /// Policy for the orchestrator step when a sub-flight wait times out.
    #[serde(default = "default_drain_retry")]
    pub drain_retry: RetryPolicyConfig,

    #[serde(default)]
    pub wait: WaitConfig,

    #[serde(default)]
    pub deletion_mode: DeletionMode,
}

fn default_cloud_retry() -> RetryPolicyConfig {
    RetryPolicyConfig::Exponential {
        initial_ms: 1_000,
        max_ms: 60_000,
        max_total_secs: 30 * 60,
    }
}

fn default_metadata_retry() -> RetryPolicyConfig {
    RetryPolicyConfig::Fixed {
        interval_ms: 200,
        max_count: 5,
    }
}

fn default_drain_retry() -> RetryPolicyConfig {
    RetryPolicyConfig::Fixed {
        interval_ms: 1_000,
        max_count: 1,
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            cloud_retry: default_cloud_retry(),
            metadata_retry: default_metadata_retry(),
            drain_retry: default_drain_retry(),
            wait: WaitConfig::default(),
            deletion_mode: DeletionMode::default(),
        }
    }
}
