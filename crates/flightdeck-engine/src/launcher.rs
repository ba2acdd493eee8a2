//! Launching and awaiting sub-flights from inside a step.
//!
//! Waiting is cooperative: [`SubflightLauncher::wait_for`] checks the child
//! once and, if it is still running, tells the step how long to suspend.
//! The step returns [`StepResult::Suspend`] and the parent run releases its
//! worker until the next poll. Poll progress lives in the parent's working
//! state so a deadline survives restarts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flightdeck_config::WaitConfig;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::parameters::Parameters;
use crate::run::{Run, RunId, RunStatus};
use crate::step::{StepFailure, StepResult};

/// Polling schedule for [`SubflightLauncher::wait_for`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOptions {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Growth factor applied per poll; `1.0` polls at a fixed interval.
    pub multiplier: f64,
    pub max_polls: Option<u32>,
    pub max_duration: Duration,
}

impl WaitOptions {
    /// Poll every `interval` until `max_duration` elapses.
    pub fn fixed(interval: Duration, max_duration: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            max_polls: None,
            max_duration,
        }
    }

    /// Slow cloud operations: 10 s growing to 5 min between polls, 6 h ceiling.
    pub fn patient() -> Self {
        Self::from(&WaitConfig::default())
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Delay after the `polls`-th unsuccessful poll (1-based).
    pub fn delay_for(&self, polls: u32) -> Duration {
        let exponent = polls.saturating_sub(1).min(64) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::patient()
    }
}

impl From<&WaitConfig> for WaitOptions {
    fn from(config: &WaitConfig) -> Self {
        Self {
            initial_interval: Duration::from_secs(config.initial_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            multiplier: 2.0,
            max_polls: config.max_polls,
            max_duration: Duration::from_secs(config.max_duration_secs),
        }
    }
}

/// Result of one [`SubflightLauncher::wait_for`] call.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The child reached a terminal status.
    Finished(Run),
    /// Still running; suspend for the given delay and poll again.
    Pending(Duration),
    /// The wait deadline passed. Progress has been cleared, so a retried
    /// parent step starts a fresh wait.
    DeadlineExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WaitProgress {
    polls: u32,
    started_at: DateTime<Utc>,
}

/// Submits and polls child runs on behalf of a parent step.
#[derive(Clone)]
pub struct SubflightLauncher {
    engine: Engine,
    parent: Option<RunId>,
}

impl SubflightLauncher {
    pub fn new(engine: Engine) -> Self {
        Self { engine, parent: None }
    }

    pub(crate) fn with_parent(mut self, parent: RunId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Submit a child run under a caller-chosen id.
    ///
    /// An id that already exists with the same type and input is treated as
    /// already launched and returned as is.
    pub async fn submit(
        &self,
        run_id: &RunId,
        flight_type: &str,
        input: Parameters,
    ) -> Result<RunId, EngineError> {
        self.engine
            .submit_child(flight_type, input, Some(run_id.clone()), self.parent.clone())
            .await
    }

    /// Current state of a child run, `None` if it was never submitted.
    pub async fn poll(&self, run_id: &RunId) -> Result<Option<Run>, EngineError> {
        self.engine.find_run(run_id).await
    }

    /// Check a child once, tracking poll progress in `working`.
    pub async fn wait_for(
        &self,
        working: &mut Parameters,
        run_id: &RunId,
        options: &WaitOptions,
    ) -> Result<WaitOutcome, EngineError> {
        let key = progress_key(run_id);
        let now = Utc::now();

        let run = self
            .poll(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.clone()))?;

        if run.is_terminal() {
            working.remove(&key);
            debug!(child = %run_id, status = %run.status, "Sub-flight finished");
            return Ok(WaitOutcome::Finished(run));
        }

        let mut progress = working.get::<WaitProgress>(&key)?.unwrap_or(WaitProgress {
            polls: 0,
            started_at: now,
        });
        progress.polls = progress.polls.saturating_add(1);

        let elapsed = (now - progress.started_at).to_std().unwrap_or(Duration::ZERO);
        let polls_exhausted = options.max_polls.is_some_and(|max| progress.polls > max);
        if polls_exhausted || elapsed >= options.max_duration {
            working.remove(&key);
            warn!(
                child = %run_id,
                polls = progress.polls,
                elapsed_secs = elapsed.as_secs(),
                "Gave up waiting for sub-flight"
            );
            return Ok(WaitOutcome::DeadlineExceeded);
        }

        let delay = options
            .delay_for(progress.polls)
            .min(options.max_duration - elapsed);
        working.put(&key, &progress)?;
        Ok(WaitOutcome::Pending(delay))
    }

    /// Wait for a child and translate its outcome into a step result.
    ///
    /// Success maps to `Success`, a failed child to `FatalFailure` carrying
    /// the child's error, a deadline to `RetryableFailure` so the parent's
    /// retry policy decides whether to keep waiting.
    pub async fn await_success(
        &self,
        working: &mut Parameters,
        run_id: &RunId,
        options: &WaitOptions,
    ) -> StepResult {
        match self.wait_for(working, run_id, options).await {
            Ok(WaitOutcome::Finished(run)) if run.status == RunStatus::Succeeded => StepResult::Success,
            Ok(WaitOutcome::Finished(run)) => StepResult::FatalFailure(child_failure(&run)),
            Ok(WaitOutcome::Pending(delay)) => StepResult::Suspend(delay),
            Ok(WaitOutcome::DeadlineExceeded) => StepResult::RetryableFailure(StepFailure::retry(format!(
                "Timed out waiting for sub-flight {}",
                run_id
            ))),
            Err(e) => StepResult::from_failure(e.into()),
        }
    }
}

/// Failure describing a child run that ended FAILED or FATAL.
pub fn child_failure(run: &Run) -> StepFailure {
    let failure = StepFailure::fatal(format!(
        "Sub-flight {} ({}) ended {}",
        run.id, run.flight_type, run.status
    ));
    match run.terminal_error.clone().or_else(|| run.undo_error.clone()) {
        Some(cause) => failure.with_cause(cause),
        None => failure,
    }
}

fn progress_key(run_id: &RunId) -> String {
    format!("wait/{}", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_schedule() {
        let options = WaitOptions::patient();
        assert_eq!(options.delay_for(1), Duration::from_secs(10));
        assert_eq!(options.delay_for(2), Duration::from_secs(20));
        assert_eq!(options.delay_for(5), Duration::from_secs(160));
        assert_eq!(options.delay_for(6), Duration::from_secs(300));
        assert_eq!(options.delay_for(1000), Duration::from_secs(300));
        assert_eq!(options.max_duration, Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_fixed_schedule() {
        let options = WaitOptions::fixed(Duration::from_millis(50), Duration::from_secs(1));
        assert_eq!(options.delay_for(1), Duration::from_millis(50));
        assert_eq!(options.delay_for(10), Duration::from_millis(50));
    }

    #[test]
    fn test_child_failure_keeps_cause() {
        let mut run = Run::new(RunId::new("child"), "delete-resource", Parameters::new());
        run.status = RunStatus::Failed;
        run.terminal_error = Some(StepFailure::fatal("permission denied"));

        let failure = child_failure(&run);
        assert!(!failure.retryable);
        assert!(failure.message.contains("child"));
        assert!(failure.message.contains("FAILED"));
        assert_eq!(failure.root_cause().message, "permission denied");
    }
}
