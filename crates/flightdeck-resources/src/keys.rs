//! Parameter keys shared by resource flights.

pub const WORKSPACE_ID: &str = "workspace_id";
pub const RESOURCE_ID: &str = "resource_id";
pub const RESOURCE_KIND: &str = "resource_kind";
pub const STEWARDSHIP: &str = "stewardship";
pub const FOLDER_ID: &str = "folder_id";
pub const PLATFORM: &str = "platform";
pub const TARGETS: &str = "targets";

/// Resource snapshot; input of `create-resource`, working state elsewhere.
pub const RESOURCE: &str = "resource";

/// Orchestrator task list in working state.
pub const DELETE_TASKS: &str = "delete_tasks";
