//! # flightdeck Resources
//!
//! Workspace resource lifecycle flights for the flightdeck engine.
//!
//! ## Features
//!
//! - Tagged resource model covering GCP, Azure and AWS kinds plus git repos
//! - Per-kind handlers contributing cloud create/delete steps
//! - Compare-and-set state flags so concurrent deletions detect each other
//! - Ordered deletion of workspaces, folders and cloud contexts through
//!   sub-flights, with idempotent restart

pub mod catalog;
pub mod error;
pub mod flights;
pub mod folder;
pub mod handler;
pub mod keys;
pub mod metadata;
pub mod model;
pub mod orchestrator;
pub mod state_flag;
pub mod tasks;

pub use catalog::{InMemoryCatalog, WorkspaceCatalog};
pub use error::{CatalogError, ResourceError};
pub use flights::{
    CREATE_RESOURCE, DELETE_CLOUD_CONTEXT, DELETE_FOLDER, DELETE_FOLDER_TREE, DELETE_RESOURCE, DELETE_RESOURCES,
    DELETE_WORKSPACE, ResourceServices, cloud_context_input, create_resource_input, delete_resource_input,
    delete_workspace_input, folder_input, register_flights, targets_input,
};
pub use folder::FolderTree;
pub use handler::{
    CloudError, CloudOperations, CloudResourceHandler, ReferenceOnlyHandler, ResourceHandler, default_handlers,
};
pub use model::{
    CloudContext, CloudPlatform, Folder, FolderId, LifecycleState, Resource, ResourceAttributes, ResourceId,
    ResourceKind, StewardshipType, Workspace, WorkspaceId,
};
pub use orchestrator::{BuildDeleteTasksStep, DrainDeleteTasksStep, deletion_steps};
pub use state_flag::{CloudContextRow, FlaggedRow, MarkDeletingStep, RemoveRowStep, ResourceRow, WorkspaceRow};
pub use tasks::{
    CloudContextTargets, DeleteTarget, ExplicitTargets, FolderTreeTargets, ResourceDeleteTask, TargetSource,
    WorkspaceTargets,
};
