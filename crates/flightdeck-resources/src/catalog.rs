//! Workspace metadata catalog.
//!
//! The catalog is the durable record of workspaces, resources, folders and
//! cloud contexts. State transitions are compare-and-set so a flight can
//! tell whether it was the one that changed a row.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::CatalogError;
use crate::model::{
    CloudContext, CloudPlatform, Folder, FolderId, LifecycleState, Resource, ResourceId, Workspace, WorkspaceId,
};

/// Metadata store used by resource flights.
#[async_trait]
pub trait WorkspaceCatalog: Send + Sync {
    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, CatalogError>;

    async fn create_workspace(&self, workspace: Workspace) -> Result<(), CatalogError>;

    /// Set the state if it currently equals `expected`. Returns whether it changed.
    async fn update_workspace_state(
        &self,
        id: WorkspaceId,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, CatalogError>;

    /// Returns whether the workspace existed.
    async fn delete_workspace(&self, id: WorkspaceId) -> Result<bool, CatalogError>;

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, CatalogError>;

    /// Insert a resource. Returns false if the id already exists.
    async fn insert_resource(&self, resource: Resource) -> Result<bool, CatalogError>;

    async fn list_resources(&self, workspace_id: WorkspaceId) -> Result<Vec<Resource>, CatalogError>;

    async fn update_resource_state(
        &self,
        id: ResourceId,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, CatalogError>;

    async fn delete_resource(&self, id: ResourceId) -> Result<bool, CatalogError>;

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>, CatalogError>;

    async fn insert_folder(&self, folder: Folder) -> Result<bool, CatalogError>;

    async fn list_folders(&self, workspace_id: WorkspaceId) -> Result<Vec<Folder>, CatalogError>;

    async fn delete_folder(&self, id: FolderId) -> Result<bool, CatalogError>;

    async fn get_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<Option<CloudContext>, CatalogError>;

    async fn insert_cloud_context(&self, context: CloudContext) -> Result<bool, CatalogError>;

    async fn list_cloud_contexts(&self, workspace_id: WorkspaceId) -> Result<Vec<CloudContext>, CatalogError>;

    async fn update_cloud_context_state(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, CatalogError>;

    async fn delete_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<bool, CatalogError>;
}

#[derive(Default)]
struct CatalogData {
    workspaces: HashMap<WorkspaceId, Workspace>,
    resources: HashMap<ResourceId, Resource>,
    folders: HashMap<FolderId, Folder>,
    cloud_contexts: HashMap<(WorkspaceId, CloudPlatform), CloudContext>,
}

/// In-memory catalog for tests and embedding.
#[derive(Default)]
pub struct InMemoryCatalog {
    data: RwLock<CatalogData>,
    unavailable: RwLock<bool>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`CatalogError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    fn check_available(&self) -> Result<(), CatalogError> {
        if *self.unavailable.read() {
            return Err(CatalogError::Unavailable("catalog offline".to_string()));
        }
        Ok(())
    }
}

fn swap_state(state: &mut LifecycleState, expected: &LifecycleState, new: LifecycleState) -> bool {
    if state == expected {
        *state = new;
        true
    } else {
        false
    }
}

#[async_trait]
impl WorkspaceCatalog for InMemoryCatalog {
    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, CatalogError> {
        self.check_available()?;
        Ok(self.data.read().workspaces.get(&id).cloned())
    }

    async fn create_workspace(&self, workspace: Workspace) -> Result<(), CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        if data.workspaces.contains_key(&workspace.id) {
            return Err(CatalogError::AlreadyExists {
                kind: "workspace",
                id: workspace.id.to_string(),
            });
        }
        data.workspaces.insert(workspace.id, workspace);
        Ok(())
    }

    async fn update_workspace_state(
        &self,
        id: WorkspaceId,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        Ok(data
            .workspaces
            .get_mut(&id)
            .is_some_and(|ws| swap_state(&mut ws.state, expected, new)))
    }

    async fn delete_workspace(&self, id: WorkspaceId) -> Result<bool, CatalogError> {
        self.check_available()?;
        Ok(self.data.write().workspaces.remove(&id).is_some())
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>, CatalogError> {
        self.check_available()?;
        Ok(self.data.read().resources.get(&id).cloned())
    }

    async fn insert_resource(&self, resource: Resource) -> Result<bool, CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        if data.resources.contains_key(&resource.id) {
            return Ok(false);
        }
        data.resources.insert(resource.id, resource);
        Ok(true)
    }

    async fn list_resources(&self, workspace_id: WorkspaceId) -> Result<Vec<Resource>, CatalogError> {
        self.check_available()?;
        let data = self.data.read();
        let mut resources: Vec<Resource> = data
            .resources
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(resources)
    }

    async fn update_resource_state(
        &self,
        id: ResourceId,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        Ok(data
            .resources
            .get_mut(&id)
            .is_some_and(|r| swap_state(&mut r.state, expected, new)))
    }

    async fn delete_resource(&self, id: ResourceId) -> Result<bool, CatalogError> {
        self.check_available()?;
        Ok(self.data.write().resources.remove(&id).is_some())
    }

    async fn get_folder(&self, id: FolderId) -> Result<Option<Folder>, CatalogError> {
        self.check_available()?;
        Ok(self.data.read().folders.get(&id).cloned())
    }

    async fn insert_folder(&self, folder: Folder) -> Result<bool, CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        if data.folders.contains_key(&folder.id) {
            return Ok(false);
        }
        data.folders.insert(folder.id, folder);
        Ok(true)
    }

    async fn list_folders(&self, workspace_id: WorkspaceId) -> Result<Vec<Folder>, CatalogError> {
        self.check_available()?;
        let data = self.data.read();
        let mut folders: Vec<Folder> = data
            .folders
            .values()
            .filter(|f| f.workspace_id == workspace_id)
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(folders)
    }

    async fn delete_folder(&self, id: FolderId) -> Result<bool, CatalogError> {
        self.check_available()?;
        Ok(self.data.write().folders.remove(&id).is_some())
    }

    async fn get_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<Option<CloudContext>, CatalogError> {
        self.check_available()?;
        Ok(self.data.read().cloud_contexts.get(&(workspace_id, platform)).cloned())
    }

    async fn insert_cloud_context(&self, context: CloudContext) -> Result<bool, CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        let key = (context.workspace_id, context.platform);
        if data.cloud_contexts.contains_key(&key) {
            return Ok(false);
        }
        data.cloud_contexts.insert(key, context);
        Ok(true)
    }

    async fn list_cloud_contexts(&self, workspace_id: WorkspaceId) -> Result<Vec<CloudContext>, CatalogError> {
        self.check_available()?;
        let data = self.data.read();
        let mut contexts: Vec<CloudContext> = data
            .cloud_contexts
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect();
        contexts.sort_by_key(|c| c.platform);
        Ok(contexts)
    }

    async fn update_cloud_context_state(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
        expected: &LifecycleState,
        new: LifecycleState,
    ) -> Result<bool, CatalogError> {
        self.check_available()?;
        let mut data = self.data.write();
        Ok(data
            .cloud_contexts
            .get_mut(&(workspace_id, platform))
            .is_some_and(|c| swap_state(&mut c.state, expected, new)))
    }

    async fn delete_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<bool, CatalogError> {
        self.check_available()?;
        Ok(self.data.write().cloud_contexts.remove(&(workspace_id, platform)).is_some())
    }
}
