//! Mark-deleting and remove-row steps shared by workspace, resource and
//! cloud-context deletion.
//!
//! The mark step moves a row to `Deleting{run, prior}` with a
//! compare-and-set and records in working state that this run made the
//! change. Undo restores `prior` only when that record exists and the row is
//! still owned by this run, so a rollback never touches a row another flight
//! owns.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use flightdeck_engine::{FlightContext, Parameters, Step, StepFailure, StepResult};

use crate::catalog::WorkspaceCatalog;
use crate::keys;
use crate::model::{CloudPlatform, LifecycleState, ResourceId, WorkspaceId};

const MARKED: &str = "marked_deleting";

/// A catalog row with a lifecycle state, identified by flight input.
#[async_trait]
pub trait FlaggedRow: Send + Sync {
    /// Short row type name used in step names and messages.
    fn kind(&self) -> &'static str;

    fn label(&self, input: &Parameters) -> String;

    async fn current_state(&self, input: &Parameters) -> Result<Option<LifecycleState>, StepFailure>;

    /// Compare-and-set; returns whether the state changed.
    async fn swap_state(
        &self,
        input: &Parameters,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, StepFailure>;

    /// Remove the row; returns whether it existed.
    async fn remove(&self, input: &Parameters) -> Result<bool, StepFailure>;
}

pub struct WorkspaceRow {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl WorkspaceRow {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl FlaggedRow for WorkspaceRow {
    fn kind(&self) -> &'static str {
        "workspace"
    }

    fn label(&self, input: &Parameters) -> String {
        match input.get::<WorkspaceId>(keys::WORKSPACE_ID) {
            Ok(Some(id)) => format!("workspace {}", id),
            _ => "workspace".to_string(),
        }
    }

    async fn current_state(&self, input: &Parameters) -> Result<Option<LifecycleState>, StepFailure> {
        let id: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        Ok(self.catalog.get_workspace(id).await?.map(|w| w.state))
    }

    async fn swap_state(
        &self,
        input: &Parameters,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, StepFailure> {
        let id: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        Ok(self.catalog.update_workspace_state(id, expected, new).await?)
    }

    async fn remove(&self, input: &Parameters) -> Result<bool, StepFailure> {
        let id: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        Ok(self.catalog.delete_workspace(id).await?)
    }
}

pub struct ResourceRow {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl ResourceRow {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl FlaggedRow for ResourceRow {
    fn kind(&self) -> &'static str {
        "resource"
    }

    fn label(&self, input: &Parameters) -> String {
        match input.get::<ResourceId>(keys::RESOURCE_ID) {
            Ok(Some(id)) => format!("resource {}", id),
            _ => "resource".to_string(),
        }
    }

    async fn current_state(&self, input: &Parameters) -> Result<Option<LifecycleState>, StepFailure> {
        let id: ResourceId = input.require(keys::RESOURCE_ID)?;
        Ok(self.catalog.get_resource(id).await?.map(|r| r.state))
    }

    async fn swap_state(
        &self,
        input: &Parameters,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, StepFailure> {
        let id: ResourceId = input.require(keys::RESOURCE_ID)?;
        Ok(self.catalog.update_resource_state(id, expected, new).await?)
    }

    async fn remove(&self, input: &Parameters) -> Result<bool, StepFailure> {
        let id: ResourceId = input.require(keys::RESOURCE_ID)?;
        Ok(self.catalog.delete_resource(id).await?)
    }
}

pub struct CloudContextRow {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl CloudContextRow {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }

    fn identity(input: &Parameters) -> Result<(WorkspaceId, CloudPlatform), StepFailure> {
        Ok((input.require(keys::WORKSPACE_ID)?, input.require(keys::PLATFORM)?))
    }
}

#[async_trait]
impl FlaggedRow for CloudContextRow {
    fn kind(&self) -> &'static str {
        "cloud-context"
    }

    fn label(&self, input: &Parameters) -> String {
        match Self::identity(input) {
            Ok((workspace_id, platform)) => format!("{} cloud context of workspace {}", platform, workspace_id),
            Err(_) => "cloud context".to_string(),
        }
    }

    async fn current_state(&self, input: &Parameters) -> Result<Option<LifecycleState>, StepFailure> {
        let (workspace_id, platform) = Self::identity(input)?;
        Ok(self
            .catalog
            .get_cloud_context(workspace_id, platform)
            .await?
            .map(|c| c.state))
    }

    async fn swap_state(
        &self,
        input: &Parameters,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, StepFailure> {
        let (workspace_id, platform) = Self::identity(input)?;
        Ok(self
            .catalog
            .update_cloud_context_state(workspace_id, platform, expected, new)
            .await?)
    }

    async fn remove(&self, input: &Parameters) -> Result<bool, StepFailure> {
        let (workspace_id, platform) = Self::identity(input)?;
        Ok(self.catalog.delete_cloud_context(workspace_id, platform).await?)
    }
}

/// Moves a row to `Deleting{run, prior}`.
///
/// A row already owned by another deletion or still being created is a
/// fatal failure with no state change. A missing row is success.
pub struct MarkDeletingStep<R> {
    row: R,
    name: String,
}

impl<R: FlaggedRow> MarkDeletingStep<R> {
    pub fn new(row: R) -> Self {
        let name = format!("mark-{}-deleting", row.kind());
        Self { row, name }
    }

    async fn mark(&self, ctx: &mut FlightContext) -> Result<(), StepFailure> {
        let label = self.row.label(ctx.input());
        let Some(state) = self.row.current_state(ctx.input()).await? else {
            debug!(run_id = %ctx.run_id(), "{} already removed", label);
            return Ok(());
        };

        match &state {
            LifecycleState::Deleting { flight_id, prior } if flight_id == ctx.run_id() => {
                // Swapped by an earlier attempt whose working state was lost.
                if !ctx.working().flag(MARKED) {
                    debug!(run_id = %ctx.run_id(), prior = ?prior, "{} already marked by this flight", label);
                    ctx.working_mut().put(MARKED, &true)?;
                }
                Ok(())
            }
            LifecycleState::Deleting { flight_id, .. } => Err(StepFailure::fatal(format!(
                "{} is already being deleted by flight {}",
                label, flight_id
            ))),
            LifecycleState::Creating { flight_id } => Err(StepFailure::fatal(format!(
                "{} is still being created by flight {}",
                label, flight_id
            ))),
            LifecycleState::Ready | LifecycleState::Broken => {
                let mine = LifecycleState::deleting(ctx.run_id().clone(), state.clone());
                if !self.row.swap_state(ctx.input(), &state, mine).await? {
                    return Err(StepFailure::retry(format!("{} changed state concurrently", label)));
                }
                ctx.working_mut().put(MARKED, &true)?;
                info!(run_id = %ctx.run_id(), "Marked {} as deleting", label);
                Ok(())
            }
        }
    }

    /// Put the row back to the state recorded in its `Deleting` marker.
    async fn restore(&self, ctx: &FlightContext) -> Result<(), StepFailure> {
        let label = self.row.label(ctx.input());
        let Some(current) = self.row.current_state(ctx.input()).await? else {
            debug!(run_id = %ctx.run_id(), "{} already removed, nothing to restore", label);
            return Ok(());
        };

        let prior = match &current {
            LifecycleState::Deleting { flight_id, prior } if flight_id == ctx.run_id() => (**prior).clone(),
            _ => {
                warn!(run_id = %ctx.run_id(), "{} no longer owned by this flight, leaving it", label);
                return Ok(());
            }
        };

        if !self.row.swap_state(ctx.input(), &current, prior).await? {
            return Err(StepFailure::retry(format!("{} changed state concurrently", label)));
        }
        info!(run_id = %ctx.run_id(), "Restored {} state", label);
        Ok(())
    }
}

#[async_trait]
impl<R: FlaggedRow> Step for MarkDeletingStep<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.mark(ctx).await.into()
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if !ctx.working().flag(MARKED) {
            return StepResult::Success;
        }
        if let Err(failure) = self.restore(ctx).await {
            return StepResult::from_failure(failure);
        }
        ctx.working_mut().remove(MARKED);
        StepResult::Success
    }
}

/// Removes a row once everything under it is gone. Not reversible.
pub struct RemoveRowStep<R> {
    row: R,
    name: String,
}

impl<R: FlaggedRow> RemoveRowStep<R> {
    pub fn new(row: R) -> Self {
        let name = format!("remove-{}", row.kind());
        Self { row, name }
    }
}

#[async_trait]
impl<R: FlaggedRow> Step for RemoveRowStep<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        match self.row.remove(ctx.input()).await {
            Ok(existed) => {
                info!(run_id = %ctx.run_id(), existed, "Removed {}", self.row.label(ctx.input()));
                StepResult::Success
            }
            Err(failure) => StepResult::from_failure(failure),
        }
    }
}

