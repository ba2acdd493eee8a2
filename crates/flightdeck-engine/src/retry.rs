//! Retry policies for retryable step failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flightdeck_config::RetryPolicyConfig;

/// Rule deciding whether a retryable step failure is attempted again.
///
/// Policies are evaluated only for `RetryableFailure` results; fatal
/// results never consult them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fail over to rollback on the first retryable failure.
    #[default]
    NoRetry,
    /// Wait `interval` between attempts, at most `max_count` retries.
    FixedInterval { interval: Duration, max_count: u32 },
    /// Double the sleep after each failure, starting at `initial_sleep` and
    /// capped at `max_sleep`. Gives up once the next attempt would start
    /// later than `max_total_duration` after the first failure.
    Exponential {
        initial_sleep: Duration,
        max_sleep: Duration,
        max_total_duration: Duration,
    },
}

/// Retry bookkeeping for the step currently executing, persisted with the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Retryable failures seen for the current step.
    pub failures: u32,
    /// When the first of those failures happened.
    pub first_failure_at: Option<DateTime<Utc>>,
}

impl RetryState {
    /// Record one more failure.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failures = self.failures.saturating_add(1);
        if self.first_failure_at.is_none() {
            self.first_failure_at = Some(now);
        }
    }

    /// Forget all failures (the step index moved).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Smallest exponential sleep; a zero initial sleep would spin.
const MIN_BACKOFF: Duration = Duration::from_millis(1);

impl RetryPolicy {
    /// Fixed interval shorthand.
    pub fn fixed(interval: Duration, max_count: u32) -> Self {
        RetryPolicy::FixedInterval { interval, max_count }
    }

    /// Exponential backoff shorthand.
    pub fn exponential(initial_sleep: Duration, max_sleep: Duration, max_total_duration: Duration) -> Self {
        RetryPolicy::Exponential {
            initial_sleep,
            max_sleep,
            max_total_duration,
        }
    }

    /// Delay before the next attempt, or `None` when retries are exhausted.
    ///
    /// `state` must already include the failure being evaluated.
    pub fn next_delay(&self, state: &RetryState, now: DateTime<Utc>) -> Option<Duration> {
        if state.failures == 0 {
            return Some(Duration::ZERO);
        }

        match self {
            RetryPolicy::NoRetry => None,
            RetryPolicy::FixedInterval { interval, max_count } => {
                (state.failures <= *max_count).then_some(*interval)
            }
            RetryPolicy::Exponential {
                initial_sleep,
                max_sleep,
                max_total_duration,
            } => {
                let factor = 1u32.checked_shl(state.failures - 1).unwrap_or(u32::MAX);
                let cap = (*max_sleep).max(MIN_BACKOFF);
                let delay = (*initial_sleep)
                    .max(MIN_BACKOFF)
                    .checked_mul(factor)
                    .map_or(cap, |d| d.min(cap));

                let elapsed = state
                    .first_failure_at
                    .and_then(|first| (now - first).to_std().ok())
                    .unwrap_or(Duration::ZERO);

                (elapsed + delay <= *max_total_duration).then_some(delay)
            }
        }
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        match *config {
            RetryPolicyConfig::None => RetryPolicy::NoRetry,
            RetryPolicyConfig::Fixed { interval_ms, max_count } => {
                RetryPolicy::fixed(Duration::from_millis(interval_ms), max_count)
            }
            RetryPolicyConfig::Exponential {
                initial_ms,
                max_ms,
                max_total_secs,
            } => RetryPolicy::exponential(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                Duration::from_secs(max_total_secs),
            ),
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
