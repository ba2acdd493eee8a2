//! Resource lifecycle flights and their registration.

use std::sync::Arc;

use flightdeck_config::{DeletionMode, ResourcesConfig};
use flightdeck_engine::{
    EngineError, FlightDefinition, FlightFactory, Parameters, Registry, RegistryBuilder, RegistryError, RetryPolicy,
    WaitOptions,
};

use crate::catalog::WorkspaceCatalog;
use crate::handler::ResourceHandler;
use crate::keys;
use crate::metadata::{DeleteFolderStep, InsertResourceStep, MarkResourceReadyStep, SnapshotResourceStep};
use crate::model::{CloudPlatform, FolderId, Resource, ResourceId, ResourceKind, StewardshipType, WorkspaceId};
use crate::orchestrator::deletion_steps;
use crate::state_flag::{CloudContextRow, MarkDeletingStep, RemoveRowStep, ResourceRow, WorkspaceRow};
use crate::tasks::{CloudContextTargets, DeleteTarget, ExplicitTargets, FolderTreeTargets, TargetSource, WorkspaceTargets};

pub const CREATE_RESOURCE: &str = "create-resource";
pub const DELETE_RESOURCE: &str = "delete-resource";
pub const DELETE_FOLDER: &str = "delete-folder";
pub const DELETE_FOLDER_TREE: &str = "delete-folder-tree";
pub const DELETE_CLOUD_CONTEXT: &str = "delete-cloud-context";
pub const DELETE_WORKSPACE: &str = "delete-workspace";
pub const DELETE_RESOURCES: &str = "delete-resources";

/// Collaborators and policies shared by every resource flight.
pub struct ResourceServices {
    pub catalog: Arc<dyn WorkspaceCatalog>,
    pub handlers: Registry<dyn ResourceHandler>,
    pub wait: WaitOptions,
    pub deletion_mode: DeletionMode,
    pub metadata_retry: RetryPolicy,
    pub drain_retry: RetryPolicy,
}

impl ResourceServices {
    pub fn new(
        catalog: Arc<dyn WorkspaceCatalog>,
        handlers: Registry<dyn ResourceHandler>,
        config: &ResourcesConfig,
    ) -> Self {
        Self {
            catalog,
            handlers,
            wait: WaitOptions::from(&config.wait),
            deletion_mode: config.deletion_mode,
            metadata_retry: RetryPolicy::from(&config.metadata_retry),
            drain_retry: RetryPolicy::from(&config.drain_retry),
        }
    }

    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_deletion_mode(mut self, mode: DeletionMode) -> Self {
        self.deletion_mode = mode;
        self
    }

    fn handler(&self, flight_type: &str, kind: ResourceKind) -> Result<Arc<dyn ResourceHandler>, EngineError> {
        self.handlers
            .get(kind.as_str())
            .ok_or_else(|| EngineError::InvalidDefinition {
                flight_type: flight_type.to_string(),
                message: format!("no handler for resource kind {}", kind),
            })
    }

    fn orchestrate(&self, definition: &mut FlightDefinition, source: Arc<dyn TargetSource>) {
        for entry in deletion_steps(
            Arc::clone(&self.catalog),
            source,
            self.wait.clone(),
            self.deletion_mode,
            self.metadata_retry.clone(),
            self.drain_retry.clone(),
        ) {
            definition.add(entry);
        }
    }
}

/// Register every resource flight.
pub fn register_flights(
    builder: &mut RegistryBuilder<dyn FlightFactory>,
    services: Arc<ResourceServices>,
) -> Result<(), RegistryError> {
    let flights: [Arc<dyn FlightFactory>; 7] = [
        Arc::new(CreateResourceFlight(Arc::clone(&services))),
        Arc::new(DeleteResourceFlight(Arc::clone(&services))),
        Arc::new(DeleteFolderFlight(Arc::clone(&services))),
        Arc::new(DeleteFolderTreeFlight(Arc::clone(&services))),
        Arc::new(DeleteCloudContextFlight(Arc::clone(&services))),
        Arc::new(DeleteWorkspaceFlight(Arc::clone(&services))),
        Arc::new(DeleteResourcesFlight(services)),
    ];
    for flight in flights {
        builder.register(flight)?;
    }
    Ok(())
}

/// Input for `create-resource`.
pub fn create_resource_input(resource: &Resource) -> Result<Parameters, EngineError> {
    Ok(Parameters::new().with(keys::RESOURCE, resource)?)
}

/// Input for `delete-resource`.
pub fn delete_resource_input(resource: &Resource) -> Result<Parameters, EngineError> {
    Ok(Parameters::new()
        .with(keys::WORKSPACE_ID, &resource.workspace_id)?
        .with(keys::RESOURCE_ID, &resource.id)?
        .with(keys::RESOURCE_KIND, &resource.kind())?
        .with(keys::STEWARDSHIP, &resource.stewardship)?)
}

/// Input for `delete-workspace`.
pub fn delete_workspace_input(workspace_id: WorkspaceId) -> Result<Parameters, EngineError> {
    Ok(Parameters::new().with(keys::WORKSPACE_ID, &workspace_id)?)
}

/// Input for `delete-folder` and `delete-folder-tree`.
pub fn folder_input(workspace_id: WorkspaceId, folder_id: FolderId) -> Result<Parameters, EngineError> {
    Ok(Parameters::new()
        .with(keys::WORKSPACE_ID, &workspace_id)?
        .with(keys::FOLDER_ID, &folder_id)?)
}

/// Input for `delete-cloud-context`.
pub fn cloud_context_input(workspace_id: WorkspaceId, platform: CloudPlatform) -> Result<Parameters, EngineError> {
    Ok(Parameters::new()
        .with(keys::WORKSPACE_ID, &workspace_id)?
        .with(keys::PLATFORM, &platform)?)
}

/// Input for `delete-resources`.
pub fn targets_input(targets: &[DeleteTarget]) -> Result<Parameters, EngineError> {
    Ok(Parameters::new().with(keys::TARGETS, targets)?)
}

struct CreateResourceFlight(Arc<ResourceServices>);

impl FlightFactory for CreateResourceFlight {
    fn flight_type(&self) -> &str {
        CREATE_RESOURCE
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let services = &self.0;
        let resource: Resource = input.require(keys::RESOURCE)?;
        let handler = services.handler(CREATE_RESOURCE, resource.kind())?;
        handler.validate(&resource).map_err(|e| EngineError::InvalidDefinition {
            flight_type: CREATE_RESOURCE.to_string(),
            message: e.to_string(),
        })?;

        let mut definition = FlightDefinition::new().step(
            InsertResourceStep::new(Arc::clone(&services.catalog)),
            services.metadata_retry.clone(),
        );
        for entry in handler.create_steps(resource.stewardship) {
            definition.add(entry);
        }
        Ok(definition.step(
            MarkResourceReadyStep::new(Arc::clone(&services.catalog)),
            services.metadata_retry.clone(),
        ))
    }
}

struct DeleteResourceFlight(Arc<ResourceServices>);

impl FlightFactory for DeleteResourceFlight {
    fn flight_type(&self) -> &str {
        DELETE_RESOURCE
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let services = &self.0;
        let _: ResourceId = input.require(keys::RESOURCE_ID)?;
        let kind: ResourceKind = input.require(keys::RESOURCE_KIND)?;
        let stewardship: StewardshipType = input.require(keys::STEWARDSHIP)?;
        let handler = services.handler(DELETE_RESOURCE, kind)?;
        let catalog = &services.catalog;

        let mut definition = FlightDefinition::new()
            .step(SnapshotResourceStep::new(Arc::clone(catalog)), services.metadata_retry.clone())
            .step(
                MarkDeletingStep::new(ResourceRow::new(Arc::clone(catalog))),
                services.metadata_retry.clone(),
            );
        for entry in handler.delete_steps(stewardship) {
            definition.add(entry);
        }
        Ok(definition.step(
            RemoveRowStep::new(ResourceRow::new(Arc::clone(catalog))),
            services.metadata_retry.clone(),
        ))
    }
}

struct DeleteFolderFlight(Arc<ResourceServices>);

impl FlightFactory for DeleteFolderFlight {
    fn flight_type(&self) -> &str {
        DELETE_FOLDER
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let _: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        let _: FolderId = input.require(keys::FOLDER_ID)?;
        Ok(FlightDefinition::new().step(
            DeleteFolderStep::new(Arc::clone(&self.0.catalog)),
            self.0.metadata_retry.clone(),
        ))
    }
}

struct DeleteFolderTreeFlight(Arc<ResourceServices>);

impl FlightFactory for DeleteFolderTreeFlight {
    fn flight_type(&self) -> &str {
        DELETE_FOLDER_TREE
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let _: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        let _: FolderId = input.require(keys::FOLDER_ID)?;

        let mut definition = FlightDefinition::new();
        self.0.orchestrate(
            &mut definition,
            Arc::new(FolderTreeTargets::new(Arc::clone(&self.0.catalog))),
        );
        Ok(definition)
    }
}

struct DeleteCloudContextFlight(Arc<ResourceServices>);

impl FlightFactory for DeleteCloudContextFlight {
    fn flight_type(&self) -> &str {
        DELETE_CLOUD_CONTEXT
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let services = &self.0;
        let _: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        let _: CloudPlatform = input.require(keys::PLATFORM)?;
        let catalog = &services.catalog;

        let mut definition = FlightDefinition::new().step(
            MarkDeletingStep::new(CloudContextRow::new(Arc::clone(catalog))),
            services.metadata_retry.clone(),
        );
        services.orchestrate(&mut definition, Arc::new(CloudContextTargets::new(Arc::clone(catalog))));
        Ok(definition.step(
            RemoveRowStep::new(CloudContextRow::new(Arc::clone(catalog))),
            services.metadata_retry.clone(),
        ))
    }
}

struct DeleteWorkspaceFlight(Arc<ResourceServices>);

impl FlightFactory for DeleteWorkspaceFlight {
    fn flight_type(&self) -> &str {
        DELETE_WORKSPACE
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let services = &self.0;
        let _: WorkspaceId = input.require(keys::WORKSPACE_ID)?;
        let catalog = &services.catalog;

        let mut definition = FlightDefinition::new().step(
            MarkDeletingStep::new(WorkspaceRow::new(Arc::clone(catalog))),
            services.metadata_retry.clone(),
        );
        services.orchestrate(&mut definition, Arc::new(WorkspaceTargets::new(Arc::clone(catalog))));
        Ok(definition.step(
            RemoveRowStep::new(WorkspaceRow::new(Arc::clone(catalog))),
            services.metadata_retry.clone(),
        ))
    }
}

struct DeleteResourcesFlight(Arc<ResourceServices>);

impl FlightFactory for DeleteResourcesFlight {
    fn flight_type(&self) -> &str {
        DELETE_RESOURCES
    }

    fn build(&self, input: &Parameters) -> Result<FlightDefinition, EngineError> {
        let targets: Vec<DeleteTarget> = input.require(keys::TARGETS)?;
        if targets.is_empty() {
            return Err(EngineError::InvalidDefinition {
                flight_type: DELETE_RESOURCES.to_string(),
                message: "no targets".to_string(),
            });
        }

        let mut definition = FlightDefinition::new();
        self.0.orchestrate(&mut definition, Arc::new(ExplicitTargets));
        Ok(definition)
    }
}
