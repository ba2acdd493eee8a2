//! Step contract: forward action, compensating action, outcome type.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ParameterError};
use crate::launcher::SubflightLauncher;
use crate::parameters::Parameters;
use crate::run::{Direction, RunId};

/// Structured failure cause carried by step results and recorded on runs.
///
/// Failures chain: a parent step wrapping a sub-flight failure keeps the
/// child's failure as `cause`, so the root cause is never lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    pub retryable: bool,
    /// Step that produced the failure, filled in by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Resource the failure concerns, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<StepFailure>>,
}

impl StepFailure {
    /// Permanent failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            step: None,
            resource: None,
            cause: None,
        }
    }

    /// Transient failure, eligible for the step's retry policy.
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::fatal(message)
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_cause(mut self, cause: StepFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Innermost failure in the cause chain.
    pub fn root_cause(&self) -> &StepFailure {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(resource) = &self.resource {
            write!(f, "[{}] ", resource)?;
        }
        f.write_str(&self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<ParameterError> for StepFailure {
    fn from(err: ParameterError) -> Self {
        StepFailure::fatal(err.to_string())
    }
}

impl From<EngineError> for StepFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(_) | EngineError::ShutDown | EngineError::WaitTimeout { .. } => {
                StepFailure::retry(err.to_string())
            }
            other => StepFailure::fatal(other.to_string()),
        }
    }
}

/// Outcome of one `do_step`/`undo_step` invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Success,
    /// Transient; eligible for the step's retry policy.
    RetryableFailure(StepFailure),
    /// Permanent; starts rollback (forward) or ends the run FATAL (undo).
    FatalFailure(StepFailure),
    /// Not finished; invoke the same step again after the delay. The run
    /// is persisted and releases its worker meanwhile.
    Suspend(Duration),
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(self, StepResult::Success)
    }

    /// Classify a failure by its `retryable` flag.
    pub fn from_failure(failure: StepFailure) -> Self {
        if failure.retryable {
            StepResult::RetryableFailure(failure)
        } else {
            StepResult::FatalFailure(failure)
        }
    }
}

impl From<Result<StepResult, StepFailure>> for StepResult {
    fn from(result: Result<StepResult, StepFailure>) -> Self {
        result.unwrap_or_else(StepResult::from_failure)
    }
}

impl From<Result<(), StepFailure>> for StepResult {
    fn from(result: Result<(), StepFailure>) -> Self {
        match result {
            Ok(()) => StepResult::Success,
            Err(failure) => StepResult::from_failure(failure),
        }
    }
}

/// Execution context handed to a step.
///
/// Input parameters are read-only; working state is read/write and is
/// persisted by the executor after every step.
pub struct FlightContext {
    run_id: RunId,
    flight_type: String,
    input: Parameters,
    working: Parameters,
    direction: Direction,
    failure: Option<StepFailure>,
    launcher: SubflightLauncher,
}

impl FlightContext {
    pub(crate) fn new(
        run_id: RunId,
        flight_type: String,
        input: Parameters,
        working: Parameters,
        direction: Direction,
        failure: Option<StepFailure>,
        launcher: SubflightLauncher,
    ) -> Self {
        Self {
            run_id,
            flight_type,
            input,
            working,
            direction,
            failure,
            launcher,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn flight_type(&self) -> &str {
        &self.flight_type
    }

    pub fn input(&self) -> &Parameters {
        &self.input
    }

    pub fn working(&self) -> &Parameters {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut Parameters {
        &mut self.working
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Forward failure that started the rollback, visible to `undo_step`.
    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    /// Launcher for sub-flights.
    pub fn launcher(&self) -> &SubflightLauncher {
        &self.launcher
    }

    /// Split borrow used by steps that wait on sub-flights.
    pub fn launcher_and_working(&mut self) -> (&SubflightLauncher, &mut Parameters) {
        (&self.launcher, &mut self.working)
    }

    pub(crate) fn into_working(self) -> Parameters {
        self.working
    }
}

/// A unit of forward work plus its compensating undo.
///
/// Steps are stateless; everything they need lives in the context. Both
/// actions may run more than once after a crash, so they must be
/// idempotent.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult;

    /// Compensate `do_step`. Steps without external effects keep the default.
    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause() {
        let failure = StepFailure::fatal("delete workspace failed")
            .with_cause(StepFailure::fatal("bucket b1 failed").with_cause(StepFailure::retry("quota exceeded")));

        assert_eq!(failure.root_cause().message, "quota exceeded");
        assert!(failure.root_cause().retryable);
    }

    #[test]
    fn test_display_includes_resource_and_chain() {
        let failure = StepFailure::fatal("child flight failed")
            .with_resource("bucket-a")
            .with_cause(StepFailure::fatal("permission denied"));

        assert_eq!(failure.to_string(), "[bucket-a] child flight failed: permission denied");
    }

    #[test]
    fn test_result_from_failure() {
        assert!(matches!(
            StepResult::from_failure(StepFailure::retry("x")),
            StepResult::RetryableFailure(_)
        ));
        assert!(matches!(
            StepResult::from(Err::<(), _>(StepFailure::fatal("x"))),
            StepResult::FatalFailure(_)
        ));
        assert!(StepResult::from(Ok::<(), StepFailure>(())).is_success());
    }

    #[test]
    fn test_parameter_error_is_fatal() {
        let failure: StepFailure = ParameterError::Missing("workspace_id".to_string()).into();
        assert!(!failure.retryable);
        assert!(failure.message.contains("workspace_id"));
    }

    #[test]
    fn test_failure_serialization() {
        let failure = StepFailure::fatal("outer").with_cause(StepFailure::retry("inner"));
        let json = serde_json::to_string(&failure).unwrap();
        let parsed: StepFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, failure);
    }
}
