//! Durable run records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parameters::Parameters;
use crate::retry::RetryState;
use crate::step::StepFailure;

/// Stable run identifier, caller-supplied or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Executing or ready to execute a step.
    Running,
    /// Suspended until `wake_at` (retry backoff or sub-flight polling).
    Waiting,
    /// All forward steps completed.
    Succeeded,
    /// Rolled back completely after a failure.
    Failed,
    /// Rollback could not complete; needs operator attention.
    Fatal,
}

impl RunStatus {
    pub const ALL: [RunStatus; 5] = [
        RunStatus::Running,
        RunStatus::Waiting,
        RunStatus::Succeeded,
        RunStatus::Failed,
        RunStatus::Fatal,
    ];

    /// Statuses the engine resumes after a restart.
    pub const IN_FLIGHT: [RunStatus; 2] = [RunStatus::Running, RunStatus::Waiting];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Waiting => "WAITING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Fatal => "FATAL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Fatal)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Fatal)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown run status '{}'", s))
    }
}

/// Direction the run moves through its step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Forward,
    RollingBack,
}

/// One durable execution of a flight definition.
///
/// `step_index` only increases while moving forward and only decreases
/// while rolling back; it reaches `-1` once every undo has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub flight_type: String,
    input: Parameters,
    pub working: Parameters,
    pub status: RunStatus,
    pub direction: Direction,
    pub step_index: i64,
    #[serde(default)]
    pub retry: RetryState,
    pub terminal_error: Option<StepFailure>,
    /// Name of the step whose failure started the rollback.
    pub failed_step: Option<String>,
    pub undo_error: Option<StepFailure>,
    pub wake_at: Option<DateTime<Utc>>,
    /// Run that launched this one, for diagnostics only.
    pub parent_id: Option<RunId>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new run positioned at its first step.
    pub fn new(id: RunId, flight_type: impl Into<String>, input: Parameters) -> Self {
        let now = Utc::now();
        Self {
            id,
            flight_type: flight_type.into(),
            input,
            working: Parameters::new(),
            status: RunStatus::Running,
            direction: Direction::Forward,
            step_index: 0,
            retry: RetryState::default(),
            terminal_error: None,
            failed_step: None,
            undo_error: None,
            wake_at: None,
            parent_id: None,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Record the launching run.
    pub fn with_parent(mut self, parent_id: RunId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Input parameters captured at submission.
    pub fn input(&self) -> &Parameters {
        &self.input
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a resubmission with these values is the same submission.
    pub fn matches_submission(&self, flight_type: &str, input: &Parameters) -> bool {
        self.flight_type == flight_type && &self.input == input
    }

    /// Move to a terminal status.
    pub(crate) fn finish(&mut self, status: RunStatus) {
        let now = Utc::now();
        self.status = status;
        self.wake_at = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            flight_type: self.flight_type.clone(),
            status: self.status,
            direction: self.direction,
            step_index: self.step_index,
            failed_step: self.failed_step.clone(),
            error: self.terminal_error.clone(),
            undo_error: self.undo_error.clone(),
        }
    }
}

/// Caller-facing status of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub flight_type: String,
    pub status: RunStatus,
    pub direction: Direction,
    pub step_index: i64,
    pub failed_step: Option<String>,
    pub error: Option<StepFailure>,
    pub undo_error: Option<StepFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_new() {
        let input = Parameters::new().with("workspace", "ws-1").unwrap();
        let run = Run::new(RunId::new("run-1"), "delete-workspace", input.clone());

        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.direction, Direction::Forward);
        assert_eq!(run.step_index, 0);
        assert_eq!(run.input(), &input);
        assert!(run.working.is_empty());
        assert!(!run.is_terminal());
    }

    #[test]
    fn test_matches_submission() {
        let input = Parameters::new().with("a", &1).unwrap();
        let run = Run::new(RunId::new("run-1"), "t", input.clone());

        assert!(run.matches_submission("t", &input));
        assert!(!run.matches_submission("other", &input));
        assert!(!run.matches_submission("t", &Parameters::new()));
    }

    #[test]
    fn test_status_parse_and_terminal() {
        assert_eq!("fatal".parse::<RunStatus>().unwrap(), RunStatus::Fatal);
        assert_eq!("WAITING".parse::<RunStatus>().unwrap(), RunStatus::Waiting);
        assert!("paused".parse::<RunStatus>().is_err());

        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Fatal.is_failure());
        assert!(!RunStatus::Waiting.is_terminal());
    }

    #[test]
    fn test_run_serialization_keeps_input() {
        let input = Parameters::new().with("k", "v").unwrap();
        let run = Run::new(RunId::generate(), "t", input.clone()).with_parent(RunId::new("parent"));

        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"RUNNING\""));
        let parsed: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.input(), &input);
        assert_eq!(parsed.parent_id, Some(RunId::new("parent")));
    }
}
