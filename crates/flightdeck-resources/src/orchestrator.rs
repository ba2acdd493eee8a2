//! Ordered deletion of many targets through sub-flights.
//!
//! Two steps: build the task list once and persist it in working state,
//! then drain it. Draining checks each task's sub-flight: succeeded ones are
//! skipped, a failed one aborts the parent, running or missing ones are
//! (submitted and) waited on cooperatively. Deletions are irreversible, so
//! neither step compensates on rollback.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use flightdeck_config::DeletionMode;
use flightdeck_engine::{
    FlightContext, Parameters, RetryPolicy, Run, RunStatus, Step, StepEntry, StepFailure, StepResult,
    SubflightLauncher, WaitOptions, WaitOutcome, child_failure,
};

use crate::catalog::WorkspaceCatalog;
use crate::keys;
use crate::tasks::{DeleteTarget, ResourceDeleteTask, TargetSource};

/// The build and drain steps for one target source.
pub fn deletion_steps(
    catalog: Arc<dyn WorkspaceCatalog>,
    source: Arc<dyn TargetSource>,
    wait: WaitOptions,
    mode: DeletionMode,
    metadata_retry: RetryPolicy,
    drain_retry: RetryPolicy,
) -> [StepEntry; 2] {
    [
        StepEntry::new(
            Arc::new(BuildDeleteTasksStep {
                catalog: Arc::clone(&catalog),
                source,
            }),
            metadata_retry,
        ),
        StepEntry::new(Arc::new(DrainDeleteTasksStep { catalog, wait, mode }), drain_retry),
    ]
}

pub struct BuildDeleteTasksStep {
    catalog: Arc<dyn WorkspaceCatalog>,
    source: Arc<dyn TargetSource>,
}

impl BuildDeleteTasksStep {
    async fn build(&self, ctx: &mut FlightContext) -> Result<(), StepFailure> {
        if ctx.working().contains(keys::DELETE_TASKS) {
            debug!(run_id = %ctx.run_id(), "Delete task list already built");
            return Ok(());
        }

        let targets = self.source.targets(ctx.input()).await?;
        let mut tasks = Vec::with_capacity(targets.len());
        for target in targets {
            match ResourceDeleteTask::resolve(target, self.catalog.as_ref()).await? {
                Some(task) => tasks.push(task),
                None => debug!(run_id = %ctx.run_id(), "Delete target already gone"),
            }
        }

        info!(run_id = %ctx.run_id(), tasks = tasks.len(), "Built delete task list");
        ctx.working_mut().put(keys::DELETE_TASKS, &tasks)?;
        Ok(())
    }
}

#[async_trait]
impl Step for BuildDeleteTasksStep {
    fn name(&self) -> &str {
        "build-delete-tasks"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.build(ctx).await.into()
    }
}

pub struct DrainDeleteTasksStep {
    catalog: Arc<dyn WorkspaceCatalog>,
    wait: WaitOptions,
    mode: DeletionMode,
}

impl DrainDeleteTasksStep {
    async fn drain(&self, ctx: &mut FlightContext) -> Result<StepResult, StepFailure> {
        let tasks: Vec<ResourceDeleteTask> = ctx.working().require(keys::DELETE_TASKS)?;
        let run_id = ctx.run_id().clone();
        let (launcher, working) = ctx.launcher_and_working();

        if self.mode == DeletionMode::Concurrent {
            for task in &tasks {
                if let Some(child) = launcher.poll(&task.flight_id).await? {
                    if child.status.is_failure() {
                        return Err(self.task_failure(task, &child).await);
                    }
                    continue;
                }
                launcher
                    .submit(&task.flight_id, &task.flight_type, task.input.clone())
                    .await?;
            }
        }

        for (position, task) in tasks.iter().enumerate() {
            match launcher.poll(&task.flight_id).await? {
                Some(child) if child.status == RunStatus::Succeeded => continue,
                Some(child) if child.status.is_failure() => return Err(self.task_failure(task, &child).await),
                Some(_) => {}
                None => {
                    debug!(run_id = %run_id, child = %task.flight_id, "Submitting {}", task.label);
                    launcher
                        .submit(&task.flight_id, &task.flight_type, task.input.clone())
                        .await?;
                }
            }

            match self.wait_one(launcher, working, task).await? {
                Some(result) => {
                    debug!(run_id = %run_id, position, remaining = tasks.len() - position, "Waiting on delete task");
                    return Ok(result);
                }
                None => continue,
            }
        }

        info!(run_id = %run_id, tasks = tasks.len(), "All delete tasks finished");
        Ok(StepResult::Success)
    }

    /// `None` once the task's sub-flight has succeeded.
    async fn wait_one(
        &self,
        launcher: &SubflightLauncher,
        working: &mut Parameters,
        task: &ResourceDeleteTask,
    ) -> Result<Option<StepResult>, StepFailure> {
        match launcher.wait_for(working, &task.flight_id, &self.wait).await? {
            WaitOutcome::Finished(child) if child.status == RunStatus::Succeeded => Ok(None),
            WaitOutcome::Finished(child) => Err(self.task_failure(task, &child).await),
            WaitOutcome::Pending(delay) => Ok(Some(StepResult::Suspend(delay))),
            WaitOutcome::DeadlineExceeded => Ok(Some(StepResult::RetryableFailure(
                StepFailure::retry(format!("Timed out waiting for deletion of {}", task.label))
                    .with_resource(task.label.clone()),
            ))),
        }
    }

    /// Fatal failure naming the target. The name lookup is best effort and
    /// falls back to the label captured when the task was built.
    async fn task_failure(&self, task: &ResourceDeleteTask, child: &Run) -> StepFailure {
        let name = match &task.target {
            DeleteTarget::Resource { resource_id } => match self.catalog.get_resource(*resource_id).await {
                Ok(Some(resource)) => format!("{} resource '{}' ({})", resource.kind(), resource.name, resource.id),
                Ok(None) => task.label.clone(),
                Err(e) => {
                    warn!(resource = %resource_id, "Resource lookup failed while reporting deletion failure: {}", e);
                    task.label.clone()
                }
            },
            _ => task.label.clone(),
        };

        StepFailure::fatal(format!("Failed to delete {}", name))
            .with_resource(name)
            .with_cause(child_failure(child))
    }
}

#[async_trait]
impl Step for DrainDeleteTasksStep {
    fn name(&self) -> &str {
        "drain-delete-tasks"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.drain(ctx).await.into()
    }

    // Completed deletions cannot be reverted; the enclosing flight unwinds
    // its own reversible steps.
    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}
