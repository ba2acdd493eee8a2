//! Workspace, resource, folder and cloud-context records.
//!
//! Resource kinds are one tagged union; everything kind-specific is an
//! exhaustive `match` over [`ResourceAttributes`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flightdeck_engine::RunId;

use crate::error::ResourceError;

pub type WorkspaceId = Uuid;
pub type ResourceId = Uuid;
pub type FolderId = Uuid;

/// Cloud provider a resource or cloud context lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudPlatform {
    Gcp,
    Azure,
    Aws,
}

impl CloudPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudPlatform::Gcp => "GCP",
            CloudPlatform::Azure => "AZURE",
            CloudPlatform::Aws => "AWS",
        }
    }
}

impl fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GCP" => Ok(CloudPlatform::Gcp),
            "AZURE" => Ok(CloudPlatform::Azure),
            "AWS" => Ok(CloudPlatform::Aws),
            other => Err(format!("unknown cloud platform '{}'", other)),
        }
    }
}

/// Whether the system owns the underlying cloud object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StewardshipType {
    /// Created and deleted by us.
    Controlled,
    /// Points at something we do not own; only metadata is managed.
    Referenced,
}

/// Lifecycle state of a workspace, resource or cloud context row.
///
/// `Creating` and `Deleting` name the flight that owns the transition.
/// `Deleting` also keeps the state the row had before, so a rolled back
/// deletion restores exactly that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Ready,
    Creating { flight_id: RunId },
    Deleting { flight_id: RunId, prior: Box<LifecycleState> },
    Broken,
}

impl LifecycleState {
    pub fn deleting(flight_id: RunId, prior: LifecycleState) -> Self {
        LifecycleState::Deleting {
            flight_id,
            prior: Box::new(prior),
        }
    }

    /// Flight currently deleting this row, if any.
    pub fn deleting_flight(&self) -> Option<&RunId> {
        match self {
            LifecycleState::Deleting { flight_id, .. } => Some(flight_id),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready)
    }
}

/// Resource kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    GcsBucket,
    BigQueryDataset,
    AiNotebook,
    AzureStorageContainer,
    AzureVm,
    AwsS3StorageFolder,
    AwsSagemakerNotebook,
    GitRepo,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::GcsBucket,
        ResourceKind::BigQueryDataset,
        ResourceKind::AiNotebook,
        ResourceKind::AzureStorageContainer,
        ResourceKind::AzureVm,
        ResourceKind::AwsS3StorageFolder,
        ResourceKind::AwsSagemakerNotebook,
        ResourceKind::GitRepo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GcsBucket => "GCS_BUCKET",
            ResourceKind::BigQueryDataset => "BIG_QUERY_DATASET",
            ResourceKind::AiNotebook => "AI_NOTEBOOK",
            ResourceKind::AzureStorageContainer => "AZURE_STORAGE_CONTAINER",
            ResourceKind::AzureVm => "AZURE_VM",
            ResourceKind::AwsS3StorageFolder => "AWS_S3_STORAGE_FOLDER",
            ResourceKind::AwsSagemakerNotebook => "AWS_SAGEMAKER_NOTEBOOK",
            ResourceKind::GitRepo => "GIT_REPO",
        }
    }

    /// Cloud the kind lives on; `None` for cloud-independent kinds.
    pub fn platform(&self) -> Option<CloudPlatform> {
        match self {
            ResourceKind::GcsBucket | ResourceKind::BigQueryDataset | ResourceKind::AiNotebook => {
                Some(CloudPlatform::Gcp)
            }
            ResourceKind::AzureStorageContainer | ResourceKind::AzureVm => Some(CloudPlatform::Azure),
            ResourceKind::AwsS3StorageFolder | ResourceKind::AwsSagemakerNotebook => Some(CloudPlatform::Aws),
            ResourceKind::GitRepo => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceAttributes {
    GcsBucket {
        bucket_name: String,
        location: String,
    },
    BigQueryDataset {
        project_id: String,
        dataset_id: String,
        location: String,
    },
    AiNotebook {
        instance_id: String,
        location: String,
        machine_type: String,
    },
    AzureStorageContainer {
        storage_account: String,
        container_name: String,
    },
    AzureVm {
        vm_name: String,
        region: String,
        vm_size: String,
    },
    AwsS3StorageFolder {
        bucket_name: String,
        prefix: String,
        region: String,
    },
    AwsSagemakerNotebook {
        instance_name: String,
        instance_type: String,
        region: String,
    },
    GitRepo {
        url: String,
    },
}

impl ResourceAttributes {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceAttributes::GcsBucket { .. } => ResourceKind::GcsBucket,
            ResourceAttributes::BigQueryDataset { .. } => ResourceKind::BigQueryDataset,
            ResourceAttributes::AiNotebook { .. } => ResourceKind::AiNotebook,
            ResourceAttributes::AzureStorageContainer { .. } => ResourceKind::AzureStorageContainer,
            ResourceAttributes::AzureVm { .. } => ResourceKind::AzureVm,
            ResourceAttributes::AwsS3StorageFolder { .. } => ResourceKind::AwsS3StorageFolder,
            ResourceAttributes::AwsSagemakerNotebook { .. } => ResourceKind::AwsSagemakerNotebook,
            ResourceAttributes::GitRepo { .. } => ResourceKind::GitRepo,
        }
    }

    /// Naming rules of the underlying cloud object.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ResourceAttributes::GcsBucket { bucket_name, location } => {
                check_len("bucket name", bucket_name, 3, 63)?;
                check_chars("bucket name", bucket_name, |c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
                })?;
                check_alnum_ends("bucket name", bucket_name)?;
                if bucket_name.starts_with("goog") {
                    return Err("bucket name cannot start with 'goog'".to_string());
                }
                check_len("location", location, 1, 64)
            }
            ResourceAttributes::BigQueryDataset {
                project_id,
                dataset_id,
                location,
            } => {
                check_len("project id", project_id, 6, 30)?;
                check_len("dataset id", dataset_id, 1, 1024)?;
                check_chars("dataset id", dataset_id, |c| c.is_ascii_alphanumeric() || c == '_')?;
                check_len("location", location, 1, 64)
            }
            ResourceAttributes::AiNotebook {
                instance_id,
                location,
                machine_type,
            } => {
                check_len("instance id", instance_id, 1, 63)?;
                check_chars("instance id", instance_id, |c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
                })?;
                if !instance_id.starts_with(|c: char| c.is_ascii_lowercase()) {
                    return Err("instance id must start with a lowercase letter".to_string());
                }
                check_len("location", location, 1, 64)?;
                check_len("machine type", machine_type, 1, 64)
            }
            ResourceAttributes::AzureStorageContainer {
                storage_account,
                container_name,
            } => {
                check_len("storage account", storage_account, 3, 24)?;
                check_len("container name", container_name, 3, 63)?;
                check_chars("container name", container_name, |c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
                })?;
                check_alnum_ends("container name", container_name)?;
                if container_name.contains("--") {
                    return Err("container name cannot contain consecutive hyphens".to_string());
                }
                Ok(())
            }
            ResourceAttributes::AzureVm { vm_name, region, vm_size } => {
                check_len("vm name", vm_name, 1, 64)?;
                check_chars("vm name", vm_name, |c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))?;
                check_len("region", region, 1, 64)?;
                check_len("vm size", vm_size, 1, 64)
            }
            ResourceAttributes::AwsS3StorageFolder {
                bucket_name,
                prefix,
                region,
            } => {
                check_len("bucket name", bucket_name, 3, 63)?;
                check_len("prefix", prefix, 1, 1024)?;
                if prefix.starts_with('/') {
                    return Err("prefix cannot start with '/'".to_string());
                }
                check_len("region", region, 1, 64)
            }
            ResourceAttributes::AwsSagemakerNotebook {
                instance_name,
                instance_type,
                region,
            } => {
                check_len("instance name", instance_name, 1, 63)?;
                check_chars("instance name", instance_name, |c| c.is_ascii_alphanumeric() || c == '-')?;
                check_alnum_ends("instance name", instance_name)?;
                check_len("instance type", instance_type, 1, 64)?;
                check_len("region", region, 1, 64)
            }
            ResourceAttributes::GitRepo { url } => {
                let supported = ["https://", "ssh://", "git@"];
                if supported.iter().any(|scheme| url.starts_with(scheme)) {
                    Ok(())
                } else {
                    Err(format!("unsupported git url '{}'", url))
                }
            }
        }
    }
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(format!("{} must be {}-{} characters, got {}", field, min, max, len));
    }
    Ok(())
}

fn check_chars(field: &str, value: &str, allowed: impl Fn(char) -> bool) -> Result<(), String> {
    match value.chars().find(|c| !allowed(*c)) {
        Some(c) => Err(format!("{} contains invalid character '{}'", field, c)),
        None => Ok(()),
    }
}

fn check_alnum_ends(field: &str, value: &str) -> Result<(), String> {
    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if alnum(value.chars().next()) && alnum(value.chars().last()) {
        Ok(())
    } else {
        Err(format!("{} must start and end with a letter or digit", field))
    }
}

/// A workspace resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    pub stewardship: StewardshipType,
    pub state: LifecycleState,
    pub attributes: ResourceAttributes,
}

impl Resource {
    pub fn new(
        workspace_id: WorkspaceId,
        name: impl Into<String>,
        stewardship: StewardshipType,
        attributes: ResourceAttributes,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.into(),
            folder_id: None,
            stewardship,
            state: LifecycleState::Ready,
            attributes,
        }
    }

    pub fn in_folder(mut self, folder_id: FolderId) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.attributes.kind()
    }

    pub fn platform(&self) -> Option<CloudPlatform> {
        self.kind().platform()
    }

    pub fn is_controlled(&self) -> bool {
        self.stewardship == StewardshipType::Controlled
    }

    /// Common and kind-specific validation.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let invalid = |message: String| ResourceError::Validation {
            kind: self.kind().to_string(),
            message,
        };

        check_len("resource name", &self.name, 1, 1024).map_err(invalid)?;
        if self.is_controlled() && self.platform().is_none() {
            return Err(invalid("only referenced resources are supported for this kind".to_string()));
        }
        self.attributes.validate().map_err(invalid)
    }
}

/// A workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub state: LifecycleState,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: LifecycleState::Ready,
        }
    }
}

/// A folder grouping resources inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub parent_id: Option<FolderId>,
}

impl Folder {
    pub fn new(workspace_id: WorkspaceId, name: impl Into<String>, parent_id: Option<FolderId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: name.into(),
            parent_id,
        }
    }
}

/// Per-workspace, per-cloud account/project binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudContext {
    pub workspace_id: WorkspaceId,
    pub platform: CloudPlatform,
    pub state: LifecycleState,
}

impl CloudContext {
    pub fn new(workspace_id: WorkspaceId, platform: CloudPlatform) -> Self {
        Self {
            workspace_id,
            platform,
            state: LifecycleState::Ready,
        }
    }
}
