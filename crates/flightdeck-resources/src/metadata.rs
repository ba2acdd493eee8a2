//! Steps that only touch workspace metadata.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use flightdeck_engine::{FlightContext, Step, StepFailure, StepResult};

use crate::catalog::WorkspaceCatalog;
use crate::keys;
use crate::model::{FolderId, LifecycleState, Resource, ResourceId, WorkspaceId};

const INSERTED: &str = "inserted_resource";

/// Inserts the input resource as `Creating{run}`. Undo removes it only if
/// this run inserted it.
pub struct InsertResourceStep {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl InsertResourceStep {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }

    async fn insert(&self, ctx: &mut FlightContext) -> Result<(), StepFailure> {
        let mut resource: Resource = ctx.input().require(keys::RESOURCE)?;
        let creating = LifecycleState::Creating {
            flight_id: ctx.run_id().clone(),
        };
        resource.state = creating.clone();

        if !self.catalog.insert_resource(resource.clone()).await? {
            let existing = self.catalog.get_resource(resource.id).await?;
            if existing.map(|r| r.state) != Some(creating) {
                return Err(StepFailure::fatal(format!("Resource {} already exists", resource.id))
                    .with_resource(resource.name));
            }
            debug!(run_id = %ctx.run_id(), resource = %resource.id, "Resource metadata inserted by an earlier attempt");
        }

        let working = ctx.working_mut();
        working.put(keys::RESOURCE, &resource)?;
        working.put(INSERTED, &true)?;
        Ok(())
    }
}

#[async_trait]
impl Step for InsertResourceStep {
    fn name(&self) -> &str {
        "insert-resource-metadata"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.insert(ctx).await.into()
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if !ctx.working().flag(INSERTED) {
            return StepResult::Success;
        }
        let resource_id = match ctx.working().require::<Resource>(keys::RESOURCE) {
            Ok(resource) => resource.id,
            Err(e) => return StepResult::FatalFailure(e.into()),
        };
        match self.catalog.delete_resource(resource_id).await {
            Ok(_) => {
                info!(run_id = %ctx.run_id(), resource = %resource_id, "Removed resource metadata");
                ctx.working_mut().remove(INSERTED);
                StepResult::Success
            }
            Err(e) => StepResult::from_failure(e.into()),
        }
    }
}

/// Moves the resource from `Creating{run}` to `Ready`.
pub struct MarkResourceReadyStep {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl MarkResourceReadyStep {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }

    async fn mark_ready(&self, ctx: &FlightContext) -> Result<(), StepFailure> {
        let resource: Resource = ctx.working().require(keys::RESOURCE)?;
        let creating = LifecycleState::Creating {
            flight_id: ctx.run_id().clone(),
        };

        if self
            .catalog
            .update_resource_state(resource.id, &creating, LifecycleState::Ready)
            .await?
        {
            info!(run_id = %ctx.run_id(), resource = %resource.id, kind = %resource.kind(), "Resource ready");
            return Ok(());
        }

        match self.catalog.get_resource(resource.id).await? {
            Some(current) if current.state.is_ready() => Ok(()),
            Some(current) => Err(StepFailure::fatal(format!(
                "Resource {} left creating state unexpectedly: {:?}",
                resource.id, current.state
            ))
            .with_resource(resource.name)),
            None => Err(StepFailure::fatal(format!("Resource {} disappeared during creation", resource.id))
                .with_resource(resource.name)),
        }
    }
}

#[async_trait]
impl Step for MarkResourceReadyStep {
    fn name(&self) -> &str {
        "mark-resource-ready"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.mark_ready(ctx).await.into()
    }
}

/// Snapshots the resource into working state for the cloud delete steps.
/// A resource that is already gone leaves nothing to snapshot.
pub struct SnapshotResourceStep {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl SnapshotResourceStep {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }

    async fn snapshot(&self, ctx: &mut FlightContext) -> Result<(), StepFailure> {
        let resource_id: ResourceId = ctx.input().require(keys::RESOURCE_ID)?;
        match self.catalog.get_resource(resource_id).await? {
            Some(resource) => ctx.working_mut().put(keys::RESOURCE, &resource)?,
            None => debug!(run_id = %ctx.run_id(), resource = %resource_id, "Resource already removed"),
        }
        Ok(())
    }
}

#[async_trait]
impl Step for SnapshotResourceStep {
    fn name(&self) -> &str {
        "snapshot-resource"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.snapshot(ctx).await.into()
    }
}

/// Deletes one folder's metadata. Refuses while the folder still holds
/// resources or child folders.
pub struct DeleteFolderStep {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl DeleteFolderStep {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }

    async fn delete(&self, ctx: &FlightContext) -> Result<(), StepFailure> {
        let workspace_id: WorkspaceId = ctx.input().require(keys::WORKSPACE_ID)?;
        let folder_id: FolderId = ctx.input().require(keys::FOLDER_ID)?;

        let Some(folder) = self.catalog.get_folder(folder_id).await? else {
            debug!(run_id = %ctx.run_id(), folder = %folder_id, "Folder already removed");
            return Ok(());
        };

        let resources = self
            .catalog
            .list_resources(workspace_id)
            .await?
            .into_iter()
            .filter(|r| r.folder_id == Some(folder_id))
            .count();
        if resources > 0 {
            return Err(StepFailure::fatal(format!(
                "Folder '{}' still contains {} resource(s)",
                folder.name, resources
            ))
            .with_resource(folder.name));
        }

        let children = self
            .catalog
            .list_folders(workspace_id)
            .await?
            .into_iter()
            .filter(|f| f.parent_id == Some(folder_id))
            .count();
        if children > 0 {
            return Err(StepFailure::fatal(format!(
                "Folder '{}' still contains {} folder(s)",
                folder.name, children
            ))
            .with_resource(folder.name));
        }

        self.catalog.delete_folder(folder_id).await?;
        info!(run_id = %ctx.run_id(), folder = %folder_id, "Deleted folder '{}'", folder.name);
        Ok(())
    }
}

#[async_trait]
impl Step for DeleteFolderStep {
    fn name(&self) -> &str {
        "delete-folder"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.delete(ctx).await.into()
    }
}
