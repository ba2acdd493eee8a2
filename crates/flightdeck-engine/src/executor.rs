//! Run state machine: forward execution, retries, rollback.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::definition::{FlightDefinition, StepEntry};
use crate::error::StoreError;
use crate::launcher::SubflightLauncher;
use crate::run::{Direction, Run, RunStatus};
use crate::step::{FlightContext, StepFailure, StepResult};
use crate::store::RunStore;

/// Where a slice of execution left the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// The run reached a terminal status.
    Completed(RunStatus),
    /// The run is WAITING and must be resumed at the given time.
    Suspended(DateTime<Utc>),
}

/// Advances a single run until it finishes or suspends.
///
/// Every transition is persisted before the next step starts, so a crash at
/// any point resumes from the last saved index and direction. A store error
/// aborts the slice and leaves the run at its last persisted state.
pub struct FlightExecutor<'a> {
    store: &'a dyn RunStore,
    launcher: SubflightLauncher,
}

enum Action {
    Do,
    Undo,
}

impl<'a> FlightExecutor<'a> {
    pub fn new(store: &'a dyn RunStore, launcher: SubflightLauncher) -> Self {
        Self { store, launcher }
    }

    pub async fn run_slice(
        &self,
        run: &mut Run,
        definition: &FlightDefinition,
    ) -> Result<SliceOutcome, StoreError> {
        if run.is_terminal() {
            return Ok(SliceOutcome::Completed(run.status));
        }

        run.status = RunStatus::Running;
        run.wake_at = None;

        loop {
            match run.direction {
                Direction::Forward => {
                    if run.step_index >= definition.len() as i64 {
                        run.finish(RunStatus::Succeeded);
                        self.store.save_run(run).await?;
                        info!(run_id = %run.id, flight_type = %run.flight_type, "Flight succeeded");
                        return Ok(SliceOutcome::Completed(RunStatus::Succeeded));
                    }

                    let Some(entry) = definition.get(run.step_index) else {
                        return self.abandon(run, "step index outside the definition").await;
                    };

                    match self.invoke(run, entry, Action::Do).await {
                        StepResult::Success => {
                            debug!(run_id = %run.id, step = entry.name(), step_index = run.step_index, "Step done");
                            run.step_index += 1;
                            run.retry.reset();
                            self.persist(run).await?;
                        }
                        StepResult::Suspend(delay) => return self.suspend(run, delay).await,
                        StepResult::RetryableFailure(failure) => {
                            if let Some(delay) = self.next_retry(run, entry, &failure) {
                                if !delay.is_zero() {
                                    return self.suspend(run, delay).await;
                                }
                                self.persist(run).await?;
                            } else {
                                self.start_rollback(run, entry, failure).await?;
                            }
                        }
                        StepResult::FatalFailure(failure) => {
                            self.start_rollback(run, entry, failure).await?;
                        }
                    }
                }
                Direction::RollingBack => {
                    if run.step_index < 0 {
                        return self.finish_rollback(run).await;
                    }

                    let Some(entry) = definition.get(run.step_index) else {
                        return self.abandon(run, "step index outside the definition").await;
                    };

                    match self.invoke(run, entry, Action::Undo).await {
                        StepResult::Success => {
                            debug!(run_id = %run.id, step = entry.name(), step_index = run.step_index, "Step undone");
                            run.step_index -= 1;
                            run.retry.reset();
                            self.persist(run).await?;
                        }
                        StepResult::Suspend(delay) => return self.suspend(run, delay).await,
                        StepResult::RetryableFailure(failure) => {
                            if let Some(delay) = self.next_retry(run, entry, &failure) {
                                if !delay.is_zero() {
                                    return self.suspend(run, delay).await;
                                }
                                self.persist(run).await?;
                            } else {
                                return self.undo_failed(run, entry, failure).await;
                            }
                        }
                        StepResult::FatalFailure(failure) => {
                            return self.undo_failed(run, entry, failure).await;
                        }
                    }
                }
            }
        }
    }

    async fn invoke(&self, run: &mut Run, entry: &StepEntry, action: Action) -> StepResult {
        let mut ctx = FlightContext::new(
            run.id.clone(),
            run.flight_type.clone(),
            run.input().clone(),
            std::mem::take(&mut run.working),
            run.direction,
            run.terminal_error.clone(),
            self.launcher.clone().with_parent(run.id.clone()),
        );

        let result = match action {
            Action::Do => entry.step.do_step(&mut ctx).await,
            Action::Undo => entry.step.undo_step(&mut ctx).await,
        };

        run.working = ctx.into_working();
        result
    }

    /// Record a retryable failure and consult the step's policy.
    fn next_retry(&self, run: &mut Run, entry: &StepEntry, failure: &StepFailure) -> Option<Duration> {
        let now = Utc::now();
        run.retry.record_failure(now);
        let delay = entry.retry.next_delay(&run.retry, now);

        match delay {
            Some(delay) => info!(
                run_id = %run.id,
                step = entry.name(),
                step_index = run.step_index,
                attempt = run.retry.failures,
                delay_ms = delay.as_millis() as u64,
                "Retrying step after failure: {}",
                failure
            ),
            None => warn!(
                run_id = %run.id,
                step = entry.name(),
                step_index = run.step_index,
                attempts = run.retry.failures,
                "Retries exhausted: {}",
                failure
            ),
        }
        delay
    }

    async fn start_rollback(
        &self,
        run: &mut Run,
        entry: &StepEntry,
        failure: StepFailure,
    ) -> Result<(), StoreError> {
        let failure = if failure.step.is_none() {
            failure.with_step(entry.name())
        } else {
            failure
        };

        warn!(
            run_id = %run.id,
            flight_type = %run.flight_type,
            step = entry.name(),
            step_index = run.step_index,
            "Step failed, rolling back: {}",
            failure
        );

        run.terminal_error = Some(failure);
        run.failed_step = Some(entry.name().to_string());
        run.direction = Direction::RollingBack;
        run.retry.reset();
        self.persist(run).await
    }

    async fn finish_rollback(&self, run: &mut Run) -> Result<SliceOutcome, StoreError> {
        // Rolling back with no recorded cause means the run was asked to
        // unwind without a failure; that is never reported as FAILED.
        let status = if run.terminal_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Fatal
        };
        run.finish(status);
        self.store.save_run(run).await?;

        match &run.terminal_error {
            Some(err) => info!(run_id = %run.id, flight_type = %run.flight_type, "Flight rolled back: {}", err),
            None => error!(run_id = %run.id, flight_type = %run.flight_type, "Flight rolled back without a recorded failure"),
        }
        Ok(SliceOutcome::Completed(status))
    }

    async fn undo_failed(
        &self,
        run: &mut Run,
        entry: &StepEntry,
        failure: StepFailure,
    ) -> Result<SliceOutcome, StoreError> {
        let failure = failure.with_step(entry.name());

        error!(
            run_id = %run.id,
            flight_type = %run.flight_type,
            step = entry.name(),
            step_index = run.step_index,
            failed_step = run.failed_step.as_deref().unwrap_or("-"),
            original_error = %run.terminal_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "Undo failed, flight is FATAL: {}",
            failure
        );

        if run.terminal_error.is_none() {
            run.terminal_error = Some(failure.clone());
        }
        run.undo_error = Some(failure);
        run.finish(RunStatus::Fatal);
        self.store.save_run(run).await?;
        Ok(SliceOutcome::Completed(RunStatus::Fatal))
    }

    async fn suspend(&self, run: &mut Run, delay: Duration) -> Result<SliceOutcome, StoreError> {
        let span = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));
        let wake_at = Utc::now() + span;

        run.status = RunStatus::Waiting;
        run.wake_at = Some(wake_at);
        run.updated_at = Utc::now();
        self.store.save_run(run).await?;

        debug!(
            run_id = %run.id,
            step_index = run.step_index,
            delay_ms = delay.as_millis() as u64,
            "Flight suspended"
        );
        Ok(SliceOutcome::Suspended(wake_at))
    }

    async fn abandon(&self, run: &mut Run, reason: &str) -> Result<SliceOutcome, StoreError> {
        error!(run_id = %run.id, step_index = run.step_index, "Abandoning flight: {}", reason);
        let failure = StepFailure::fatal(reason);
        if run.terminal_error.is_none() {
            run.terminal_error = Some(failure.clone());
        } else {
            run.undo_error = Some(failure);
        }
        run.finish(RunStatus::Fatal);
        self.store.save_run(run).await?;
        Ok(SliceOutcome::Completed(RunStatus::Fatal))
    }

    async fn persist(&self, run: &mut Run) -> Result<(), StoreError> {
        run.updated_at = Utc::now();
        self.store.save_run(run).await
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
