//! Engine: submission, scheduling on a bounded worker pool, status queries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use flightdeck_config::EngineConfig;

use crate::definition::{FlightDefinition, FlightFactory};
use crate::error::{EngineError, StoreError};
use crate::executor::{FlightExecutor, SliceOutcome};
use crate::launcher::SubflightLauncher;
use crate::parameters::Parameters;
use crate::recovery::RecoveryManager;
use crate::registry::Registry;
use crate::run::{Run, RunId, RunStatus, RunSummary};
use crate::step::StepFailure;
use crate::store::{CreateOutcome, RunStore};

/// Durable flight engine.
///
/// Cloning is cheap; all clones share the same worker pool and store.
/// Each run executes in at most one place at a time: a run is claimed by
/// the task driving it from scheduling until it finishes, and released
/// while it is suspended only if the engine shuts down.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<dyn RunStore>,
    flights: Registry<dyn FlightFactory>,
    permits: Arc<Semaphore>,
    claimed: DashMap<RunId, ()>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn RunStore>, flights: Registry<dyn FlightFactory>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                flights,
                permits,
                claimed: DashMap::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.inner.store
    }

    /// Launcher for submitting runs as sub-flights of no particular parent.
    pub fn launcher(&self) -> SubflightLauncher {
        SubflightLauncher::new(self.clone())
    }

    /// Resume in-flight runs if the configuration asks for it.
    pub async fn start(&self) -> Result<usize, EngineError> {
        if self.inner.config.recover_on_start {
            self.recover().await
        } else {
            Ok(0)
        }
    }

    /// Submit a new run.
    ///
    /// The definition is built once up front so invalid input is rejected
    /// before anything is persisted. Resubmitting an existing id with the
    /// same flight type and input returns that id without creating a run.
    pub async fn submit(
        &self,
        flight_type: &str,
        input: Parameters,
        run_id: Option<RunId>,
    ) -> Result<RunId, EngineError> {
        self.submit_child(flight_type, input, run_id, None).await
    }

    pub(crate) async fn submit_child(
        &self,
        flight_type: &str,
        input: Parameters,
        run_id: Option<RunId>,
        parent: Option<RunId>,
    ) -> Result<RunId, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShutDown);
        }

        self.definition(flight_type, &input)?;

        let run_id = run_id.unwrap_or_else(RunId::generate);
        let mut run = Run::new(run_id.clone(), flight_type, input);
        if let Some(parent) = parent {
            run = run.with_parent(parent);
        }

        match self.inner.store.create_run(&run).await? {
            CreateOutcome::Created => {
                info!(run_id = %run_id, flight_type, parent = ?run.parent_id, "Flight submitted");
                self.schedule(run_id.clone(), None);
            }
            CreateOutcome::Existing(existing) => {
                if !existing.matches_submission(flight_type, run.input()) {
                    return Err(EngineError::RunIdConflict(run_id));
                }
                debug!(run_id = %run_id, status = %existing.status, "Flight already submitted");
                if !existing.is_terminal() {
                    // Orphaned by a previous process: adopt it.
                    self.schedule(run_id.clone(), existing.wake_at);
                }
            }
        }

        Ok(run_id)
    }

    /// Load a run, `None` if it does not exist.
    pub async fn find_run(&self, run_id: &RunId) -> Result<Option<Run>, EngineError> {
        Ok(self.inner.store.load_run(run_id).await?)
    }

    /// Current status and, on failure, the structured cause.
    pub async fn get_status(&self, run_id: &RunId) -> Result<RunSummary, EngineError> {
        self.find_run(run_id)
            .await?
            .map(|run| run.summary())
            .ok_or_else(|| EngineError::RunNotFound(run_id.clone()))
    }

    /// Wait until the run is terminal or `timeout` elapses.
    pub async fn wait_for(&self, run_id: &RunId, timeout: Duration) -> Result<Run, EngineError> {
        let poll = Duration::from_millis(self.inner.config.status_poll_interval_ms.max(1));
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let run = self
                .find_run(run_id)
                .await?
                .ok_or_else(|| EngineError::RunNotFound(run_id.clone()))?;
            if run.is_terminal() {
                return Ok(run);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(EngineError::WaitTimeout {
                    run_id: run_id.clone(),
                    status: run.status,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Wait using the configured default timeout.
    pub async fn wait(&self, run_id: &RunId) -> Result<Run, EngineError> {
        let timeout = Duration::from_secs(self.inner.config.default_wait_timeout_secs);
        self.wait_for(run_id, timeout).await
    }

    /// Resume every RUNNING or WAITING run found in the store.
    ///
    /// Returns how many runs were scheduled. Runs already driven by this
    /// engine are skipped.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let manager = RecoveryManager::new(Arc::clone(&self.inner.store));
        let runs = manager.list_recoverable().await?;

        let mut scheduled = 0;
        for run in runs {
            if self.schedule(run.id.clone(), run.wake_at) {
                scheduled += 1;
            }
        }

        info!("Recovered {} in-flight runs", scheduled);
        Ok(scheduled)
    }

    /// Stop scheduling. Pending wake-ups are cancelled and steps that are
    /// executing run to completion before this returns.
    pub async fn shutdown(&self) {
        info!("Shutting down flight engine");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn definition(&self, flight_type: &str, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let factory = self
            .inner
            .flights
            .get(flight_type)
            .ok_or_else(|| EngineError::UnknownFlightType(flight_type.to_string()))?;
        factory.build(input)
    }

    /// Claim the run and drive it on a background task. Returns false if
    /// the run is already claimed.
    fn schedule(&self, run_id: RunId, resume_at: Option<DateTime<Utc>>) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        if self.inner.claimed.insert(run_id.clone(), ()).is_some() {
            return false;
        }

        let engine = self.clone();
        self.inner.tasks.spawn(async move {
            engine.drive(&run_id, resume_at).await;
            engine.inner.claimed.remove(&run_id);
        });
        true
    }

    async fn drive(&self, run_id: &RunId, mut resume_at: Option<DateTime<Utc>>) {
        let mut store_failures: u32 = 0;
        loop {
            if let Some(wake_at) = resume_at.take() {
                let delay = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = self.inner.shutdown.cancelled() => {
                        debug!(run_id = %run_id, "Wake-up cancelled by shutdown");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let permit = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                permit = Arc::clone(&self.inner.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let outcome = self.run_slice(run_id).await;
            drop(permit);

            match outcome {
                Ok(SliceOutcome::Suspended(wake_at)) => {
                    store_failures = 0;
                    resume_at = Some(wake_at);
                }
                Ok(SliceOutcome::Completed(status)) => {
                    debug!(run_id = %run_id, status = %status, "Flight done");
                    return;
                }
                Err(StoreError::NotFound(_)) => {
                    error!(run_id = %run_id, "Run disappeared from the store; dropping it");
                    return;
                }
                Err(e) => {
                    store_failures = store_failures.saturating_add(1);
                    let delay_ms = self.store_retry_delay_ms(store_failures);
                    warn!(
                        run_id = %run_id,
                        attempt = store_failures,
                        delay_ms = delay_ms,
                        "Flight slice aborted by store error, resuming from last saved state: {}",
                        e
                    );
                    resume_at = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
                }
            }
        }
    }

    /// Doubling backoff after consecutive store failures, capped by config.
    fn store_retry_delay_ms(&self, failures: u32) -> u64 {
        let config = &self.inner.config;
        let initial = config.store_retry_initial_ms.max(1);
        let exponent = failures.saturating_sub(1).min(20);
        initial
            .saturating_mul(1u64 << exponent)
            .min(config.store_retry_max_ms.max(initial))
    }

    async fn run_slice(&self, run_id: &RunId) -> Result<SliceOutcome, StoreError> {
        let Some(mut run) = self.inner.store.load_run(run_id).await? else {
            return Err(StoreError::NotFound(run_id.clone()));
        };
        if run.is_terminal() {
            return Ok(SliceOutcome::Completed(run.status));
        }

        let definition = match self.definition(&run.flight_type, run.input()) {
            Ok(definition) => definition,
            Err(e) => {
                warn!(run_id = %run_id, flight_type = %run.flight_type, "Cannot rebuild flight definition: {}", e);
                let failure = StepFailure::fatal(format!("Cannot rebuild flight definition: {}", e));
                if run.terminal_error.is_none() {
                    run.terminal_error = Some(failure);
                } else {
                    run.undo_error = Some(failure);
                }
                run.finish(RunStatus::Fatal);
                self.inner.store.save_run(&run).await?;
                return Ok(SliceOutcome::Completed(RunStatus::Fatal));
            }
        };

        let executor = FlightExecutor::new(self.inner.store.as_ref(), self.launcher());
        executor.run_slice(&mut run, &definition).await
    }
}
