use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flightdeck_config::EngineConfig;

use super::*;
use crate::definition::FlightDefinition;
use crate::engine::Engine;
use crate::parameters::Parameters;
use crate::registry::Registry;
use crate::retry::RetryPolicy;
use crate::run::RunId;
use crate::step::{FlightContext, Step};
use crate::store::{MemoryRunStore, RunStore};

type Log = Arc<Mutex<Vec<String>>>;

/// Step that plays back scripted results and records every invocation.
struct ScriptedStep {
    name: String,
    log: Log,
    do_results: Mutex<VecDeque<StepResult>>,
    undo_results: Mutex<VecDeque<StepResult>>,
}

impl ScriptedStep {
    fn new(name: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            do_results: Mutex::new(VecDeque::new()),
            undo_results: Mutex::new(VecDeque::new()),
        }
    }

    fn on_do(self, results: Vec<StepResult>) -> Self {
        *self.do_results.lock().unwrap() = results.into();
        self
    }

    fn on_undo(self, results: Vec<StepResult>) -> Self {
        *self.undo_results.lock().unwrap() = results.into();
        self
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.log.lock().unwrap().push(format!("do {}", self.name));
        ctx.working_mut().put(&self.name, &true).unwrap();
        self.do_results.lock().unwrap().pop_front().unwrap_or(StepResult::Success)
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.log.lock().unwrap().push(format!("undo {}", self.name));
        if let Some(failure) = ctx.failure() {
            let seen = failure.message.clone();
            ctx.working_mut().put("undo_saw", &seen).unwrap();
        }
        self.undo_results.lock().unwrap().pop_front().unwrap_or(StepResult::Success)
    }
}

struct Fixture {
    store: Arc<MemoryRunStore>,
    launcher: SubflightLauncher,
    log: Log,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryRunStore::new());
        let engine = Engine::new(EngineConfig::default(), store.clone(), Registry::builder().build());
        Self {
            store,
            launcher: engine.launcher(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn new_run(&self) -> Run {
        let run = Run::new(RunId::generate(), "test-flight", Parameters::new());
        self.store.create_run(&run).await.unwrap();
        run
    }

    async fn slice(&self, run: &mut Run, definition: &FlightDefinition) -> SliceOutcome {
        let executor = FlightExecutor::new(self.store.as_ref(), self.launcher.clone());
        executor.run_slice(run, definition).await.unwrap()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn test_all_steps_succeed() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new()
        .step(ScriptedStep::new("a", &fx.log), RetryPolicy::NoRetry)
        .step(ScriptedStep::new("b", &fx.log), RetryPolicy::NoRetry);
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Succeeded));
    assert_eq!(fx.log(), vec!["do a", "do b"]);

    let stored = fx.store.load_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert_eq!(stored.step_index, 2);
    assert!(stored.completed_at.is_some());
    assert!(stored.working.flag("a"));
    assert!(stored.working.flag("b"));
}

#[tokio::test]
async fn test_quota_exceeded_rolls_back_to_start() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new()
        .step(ScriptedStep::new("s0", &fx.log), RetryPolicy::NoRetry)
        .step(ScriptedStep::new("s1", &fx.log), RetryPolicy::NoRetry)
        .step(
            ScriptedStep::new("s2", &fx.log)
                .on_do(vec![StepResult::FatalFailure(StepFailure::fatal("quota exceeded"))]),
            RetryPolicy::NoRetry,
        );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Failed));
    assert_eq!(fx.log(), vec!["do s0", "do s1", "do s2", "undo s2", "undo s1", "undo s0"]);

    let stored = fx.store.load_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.step_index, -1);
    assert_eq!(stored.direction, Direction::RollingBack);
    let error = stored.terminal_error.unwrap();
    assert_eq!(error.message, "quota exceeded");
    assert_eq!(error.step.as_deref(), Some("s2"));
    assert_eq!(stored.failed_step.as_deref(), Some("s2"));
    assert!(stored.undo_error.is_none());
    assert_eq!(stored.working.get::<String>("undo_saw").unwrap().as_deref(), Some("quota exceeded"));
}

#[tokio::test]
async fn test_rollback_never_touches_later_steps() {
    let fx = Fixture::new();
    let mut definition = FlightDefinition::new();
    for i in 0..5 {
        let step = ScriptedStep::new(&format!("s{}", i), &fx.log);
        let step = if i == 2 {
            step.on_do(vec![StepResult::FatalFailure(StepFailure::fatal("boom"))])
        } else {
            step
        };
        definition = definition.step(step, RetryPolicy::NoRetry);
    }
    let mut run = fx.new_run().await;

    fx.slice(&mut run, &definition).await;

    let undos: Vec<String> = fx.log().into_iter().filter(|l| l.starts_with("undo")).collect();
    assert_eq!(undos, vec!["undo s2", "undo s1", "undo s0"]);
    assert!(!fx.log().contains(&"do s3".to_string()));
}

#[tokio::test]
async fn test_retry_exhaustion_attempts_four_times() {
    let fx = Fixture::new();
    let always_retry = vec![
        StepResult::RetryableFailure(StepFailure::retry("flaky")),
        StepResult::RetryableFailure(StepFailure::retry("flaky")),
        StepResult::RetryableFailure(StepFailure::retry("flaky")),
        StepResult::RetryableFailure(StepFailure::retry("flaky")),
        StepResult::RetryableFailure(StepFailure::retry("flaky")),
    ];
    let definition = FlightDefinition::new().step(
        ScriptedStep::new("flaky", &fx.log).on_do(always_retry),
        RetryPolicy::fixed(Duration::ZERO, 3),
    );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Failed));
    let attempts = fx.log().iter().filter(|l| *l == "do flaky").count();
    assert_eq!(attempts, 4);
    assert_eq!(fx.log().last().map(String::as_str), Some("undo flaky"));
}

#[tokio::test]
async fn test_retry_then_success_resets_retry_state() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new()
        .step(
            ScriptedStep::new("a", &fx.log).on_do(vec![
                StepResult::RetryableFailure(StepFailure::retry("busy")),
                StepResult::RetryableFailure(StepFailure::retry("busy")),
            ]),
            RetryPolicy::fixed(Duration::ZERO, 5),
        )
        .step(ScriptedStep::new("b", &fx.log), RetryPolicy::NoRetry);
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Succeeded));
    assert_eq!(fx.log(), vec!["do a", "do a", "do a", "do b"]);
    assert_eq!(run.retry.failures, 0);
}

#[tokio::test]
async fn test_retry_with_delay_suspends_run() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new().step(
        ScriptedStep::new("a", &fx.log).on_do(vec![StepResult::RetryableFailure(StepFailure::retry("busy"))]),
        RetryPolicy::fixed(Duration::from_secs(30), 2),
    );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;
    assert!(matches!(outcome, SliceOutcome::Suspended(_)));

    let stored = fx.store.load_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Waiting);
    assert_eq!(stored.step_index, 0);
    assert_eq!(stored.retry.failures, 1);
    assert!(stored.wake_at.is_some());

    // Next slice retries the same step and finishes.
    let mut resumed = stored;
    let outcome = fx.slice(&mut resumed, &definition).await;
    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Succeeded));
    assert_eq!(fx.log(), vec!["do a", "do a"]);
}

#[tokio::test]
async fn test_no_retry_policy_rolls_back_on_retryable_failure() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new().step(
        ScriptedStep::new("a", &fx.log).on_do(vec![StepResult::RetryableFailure(StepFailure::retry("busy"))]),
        RetryPolicy::NoRetry,
    );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Failed));
    assert_eq!(fx.log(), vec!["do a", "undo a"]);
}

#[tokio::test]
async fn test_undo_failure_is_fatal_and_keeps_original_error() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new()
        .step(ScriptedStep::new("s0", &fx.log), RetryPolicy::NoRetry)
        .step(
            ScriptedStep::new("s1", &fx.log)
                .on_undo(vec![StepResult::FatalFailure(StepFailure::fatal("cannot restore"))]),
            RetryPolicy::NoRetry,
        )
        .step(
            ScriptedStep::new("s2", &fx.log)
                .on_do(vec![StepResult::FatalFailure(StepFailure::fatal("original"))]),
            RetryPolicy::NoRetry,
        );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Fatal));
    assert_eq!(fx.log(), vec!["do s0", "do s1", "do s2", "undo s2", "undo s1"]);

    let stored = fx.store.load_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Fatal);
    assert_eq!(stored.step_index, 1);
    assert_eq!(stored.terminal_error.unwrap().message, "original");
    let undo_error = stored.undo_error.unwrap();
    assert_eq!(undo_error.message, "cannot restore");
    assert_eq!(undo_error.step.as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_undo_retries_exhausted_is_fatal() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new().step(
        ScriptedStep::new("a", &fx.log)
            .on_do(vec![StepResult::FatalFailure(StepFailure::fatal("original"))])
            .on_undo(vec![
                StepResult::RetryableFailure(StepFailure::retry("busy")),
                StepResult::RetryableFailure(StepFailure::retry("busy")),
            ]),
        RetryPolicy::fixed(Duration::ZERO, 1),
    );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Fatal));
    assert_eq!(fx.log(), vec!["do a", "undo a", "undo a"]);
}

#[tokio::test]
async fn test_suspend_keeps_step_index() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new()
        .step(ScriptedStep::new("a", &fx.log), RetryPolicy::NoRetry)
        .step(
            ScriptedStep::new("wait", &fx.log).on_do(vec![StepResult::Suspend(Duration::from_secs(10))]),
            RetryPolicy::NoRetry,
        );
    let mut run = fx.new_run().await;

    let outcome = fx.slice(&mut run, &definition).await;
    assert!(matches!(outcome, SliceOutcome::Suspended(_)));
    assert_eq!(run.step_index, 1);
    assert_eq!(run.status, RunStatus::Waiting);

    let outcome = fx.slice(&mut run, &definition).await;
    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Succeeded));
    assert_eq!(fx.log(), vec!["do a", "do wait", "do wait"]);
}

#[tokio::test]
async fn test_rollback_without_recorded_failure_is_fatal() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new().step(ScriptedStep::new("a", &fx.log), RetryPolicy::NoRetry);
    let mut run = fx.new_run().await;
    run.direction = Direction::RollingBack;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Fatal));
    assert_eq!(run.step_index, -1);
    assert_eq!(fx.log(), vec!["undo a"]);
}

#[tokio::test]
async fn test_terminal_run_is_not_executed() {
    let fx = Fixture::new();
    let definition = FlightDefinition::new().step(ScriptedStep::new("a", &fx.log), RetryPolicy::NoRetry);
    let mut run = fx.new_run().await;
    run.status = RunStatus::Succeeded;

    let outcome = fx.slice(&mut run, &definition).await;

    assert_eq!(outcome, SliceOutcome::Completed(RunStatus::Succeeded));
    assert!(fx.log().is_empty());
}
