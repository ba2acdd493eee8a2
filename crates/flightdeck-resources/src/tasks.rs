//! Deletion targets and the task list the orchestrator persists.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use flightdeck_engine::{Parameters, RunId, StepFailure};

use crate::catalog::WorkspaceCatalog;
use crate::flights::{DELETE_CLOUD_CONTEXT, DELETE_FOLDER, DELETE_RESOURCE};
use crate::folder::FolderTree;
use crate::keys;
use crate::model::{CloudPlatform, FolderId, ResourceId, WorkspaceId};

/// Something the orchestrator deletes through its own sub-flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeleteTarget {
    Resource {
        resource_id: ResourceId,
    },
    Folder {
        folder_id: FolderId,
    },
    CloudContext {
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    },
}

/// One entry of the persisted deletion task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeleteTask {
    pub target: DeleteTarget,
    pub flight_id: RunId,
    pub flight_type: String,
    pub input: Parameters,
    /// Human-readable description captured when the list was built.
    pub label: String,
}

impl ResourceDeleteTask {
    /// Build the task for `target`, or `None` if it no longer exists.
    ///
    /// A target already marked `Deleting` keeps the flight that marked it.
    pub async fn resolve(target: DeleteTarget, catalog: &dyn WorkspaceCatalog) -> Result<Option<Self>, StepFailure> {
        let task = match target.clone() {
            DeleteTarget::Resource { resource_id } => {
                let Some(resource) = catalog.get_resource(resource_id).await? else {
                    return Ok(None);
                };
                let input = Parameters::new()
                    .with(keys::WORKSPACE_ID, &resource.workspace_id)?
                    .with(keys::RESOURCE_ID, &resource.id)?
                    .with(keys::RESOURCE_KIND, &resource.kind())?
                    .with(keys::STEWARDSHIP, &resource.stewardship)?;
                Self {
                    flight_id: resource.state.deleting_flight().cloned().unwrap_or_else(RunId::generate),
                    flight_type: DELETE_RESOURCE.to_string(),
                    input,
                    label: format!("{} resource '{}' ({})", resource.kind(), resource.name, resource.id),
                    target,
                }
            }
            DeleteTarget::Folder { folder_id } => {
                let Some(folder) = catalog.get_folder(folder_id).await? else {
                    return Ok(None);
                };
                Self {
                    flight_id: RunId::generate(),
                    flight_type: DELETE_FOLDER.to_string(),
                    input: Parameters::new()
                        .with(keys::WORKSPACE_ID, &folder.workspace_id)?
                        .with(keys::FOLDER_ID, &folder.id)?,
                    label: format!("folder '{}' ({})", folder.name, folder.id),
                    target,
                }
            }
            DeleteTarget::CloudContext { workspace_id, platform } => {
                let Some(context) = catalog.get_cloud_context(workspace_id, platform).await? else {
                    return Ok(None);
                };
                Self {
                    flight_id: context.state.deleting_flight().cloned().unwrap_or_else(RunId::generate),
                    flight_type: DELETE_CLOUD_CONTEXT.to_string(),
                    input: Parameters::new()
                        .with(keys::WORKSPACE_ID, &workspace_id)?
                        .with(keys::PLATFORM, &platform)?,
                    label: format!("{} cloud context", platform),
                    target,
                }
            }
        };
        Ok(Some(task))
    }
}

/// Produces the ordered targets of one orchestrator flight from its input.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn targets(&self, input: &Parameters) -> Result<Vec<DeleteTarget>, StepFailure>;
}

/// Everything in a workspace: resources, then folders leaf-first, then
/// cloud contexts.
pub struct WorkspaceTargets {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl WorkspaceTargets {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TargetSource for WorkspaceTargets {
    async fn targets(&self, input: &Parameters) -> Result<Vec<DeleteTarget>, StepFailure> {
        let workspace_id: WorkspaceId = input.require(keys::WORKSPACE_ID)?;

        let mut targets: Vec<DeleteTarget> = self
            .catalog
            .list_resources(workspace_id)
            .await?
            .into_iter()
            .map(|r| DeleteTarget::Resource { resource_id: r.id })
            .collect();

        let tree = FolderTree::build(self.catalog.list_folders(workspace_id).await?)?;
        targets.extend(
            tree.deletion_order(None)
                .into_iter()
                .map(|folder_id| DeleteTarget::Folder { folder_id }),
        );

        let mut contexts = self.catalog.list_cloud_contexts(workspace_id).await?;
        contexts.sort_by_key(|c| c.platform);
        targets.extend(contexts.into_iter().map(|c| DeleteTarget::CloudContext {
            workspace_id,
            platform: c.platform,
        }));
        Ok(targets)
    }
}

/// Controlled resources on one cloud platform.
pub struct CloudContextTargets {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl CloudContextTargets {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TargetSource for CloudContextTargets {
    async fn targets(&self, input: &Parameters) -> Result<Vec<DeleteTarget>, StepFailure> {
        let workspace_id: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        let platform: CloudPlatform = input.require(keys::PLATFORM)?;

        Ok(self
            .catalog
            .list_resources(workspace_id)
            .await?
            .into_iter()
            .filter(|r| r.is_controlled() && r.platform() == Some(platform))
            .map(|r| DeleteTarget::Resource { resource_id: r.id })
            .collect())
    }
}

/// Resources anywhere under a folder, then the folders leaf-first.
pub struct FolderTreeTargets {
    catalog: Arc<dyn WorkspaceCatalog>,
}

impl FolderTreeTargets {
    pub fn new(catalog: Arc<dyn WorkspaceCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TargetSource for FolderTreeTargets {
    async fn targets(&self, input: &Parameters) -> Result<Vec<DeleteTarget>, StepFailure> {
        let workspace_id: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        let root: FolderId = input.require(keys::FOLDER_ID)?;

        let tree = FolderTree::build(self.catalog.list_folders(workspace_id).await?)?;
        if !tree.contains(root) {
            return Ok(Vec::new());
        }
        let subtree: HashSet<FolderId> = tree.subtree(root).into_iter().collect();

        let mut targets: Vec<DeleteTarget> = self
            .catalog
            .list_resources(workspace_id)
            .await?
            .into_iter()
            .filter(|r| r.folder_id.is_some_and(|f| subtree.contains(&f)))
            .map(|r| DeleteTarget::Resource { resource_id: r.id })
            .collect();
        targets.extend(
            tree.deletion_order(Some(root))
                .into_iter()
                .map(|folder_id| DeleteTarget::Folder { folder_id }),
        );
        Ok(targets)
    }
}

/// Caller-ordered list from the `targets` input parameter.
pub struct ExplicitTargets;

#[async_trait]
impl TargetSource for ExplicitTargets {
    async fn targets(&self, input: &Parameters) -> Result<Vec<DeleteTarget>, StepFailure> {
        Ok(input.require(keys::TARGETS)?)
    }
}
