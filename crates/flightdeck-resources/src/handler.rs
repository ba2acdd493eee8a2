//! Per-kind resource handlers and the cloud steps they contribute.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use flightdeck_engine::{
    FlightContext, Registerable, Registry, RegistryBuilder, RegistryError, RetryPolicy, Step, StepEntry,
    StepFailure, StepResult,
};

use crate::error::ResourceError;
use crate::keys;
use crate::model::{Resource, ResourceKind, StewardshipType};

/// Outcome of a provider API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("Cloud object already exists")]
    AlreadyExists,

    #[error("Cloud object not found")]
    NotFound,

    /// Throttling, timeouts and other errors worth retrying.
    #[error("Transient cloud error: {0}")]
    Transient(String),

    #[error("Cloud error: {0}")]
    Permanent(String),
}

/// Provider API used by cloud resource steps.
#[async_trait]
pub trait CloudOperations: Send + Sync {
    async fn create(&self, resource: &Resource) -> Result<(), CloudError>;

    async fn delete(&self, resource: &Resource) -> Result<(), CloudError>;
}

/// Capability set for one resource kind.
pub trait ResourceHandler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn validate(&self, resource: &Resource) -> Result<(), ResourceError> {
        resource.validate()
    }

    /// Steps creating the underlying cloud object. They read the resource
    /// from the `resource` working-state key.
    fn create_steps(&self, stewardship: StewardshipType) -> Vec<StepEntry>;

    /// Steps deleting the underlying cloud object.
    fn delete_steps(&self, stewardship: StewardshipType) -> Vec<StepEntry>;
}

impl Registerable for dyn ResourceHandler {
    fn registry_id(&self) -> &str {
        self.kind().as_str()
    }
}

/// Handler for kinds backed by a cloud object.
///
/// Referenced resources contribute no steps; only their metadata is
/// managed.
pub struct CloudResourceHandler {
    kind: ResourceKind,
    cloud: Arc<dyn CloudOperations>,
    retry: RetryPolicy,
}

impl CloudResourceHandler {
    pub fn new(kind: ResourceKind, cloud: Arc<dyn CloudOperations>, retry: RetryPolicy) -> Self {
        Self { kind, cloud, retry }
    }
}

impl ResourceHandler for CloudResourceHandler {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn create_steps(&self, stewardship: StewardshipType) -> Vec<StepEntry> {
        if stewardship != StewardshipType::Controlled {
            return Vec::new();
        }
        vec![StepEntry::new(
            Arc::new(CreateCloudObjectStep {
                cloud: Arc::clone(&self.cloud),
            }),
            self.retry.clone(),
        )]
    }

    fn delete_steps(&self, stewardship: StewardshipType) -> Vec<StepEntry> {
        if stewardship != StewardshipType::Controlled {
            return Vec::new();
        }
        vec![StepEntry::new(
            Arc::new(DeleteCloudObjectStep {
                cloud: Arc::clone(&self.cloud),
            }),
            self.retry.clone(),
        )]
    }
}

/// Handler for kinds that only exist as references.
pub struct ReferenceOnlyHandler {
    kind: ResourceKind,
}

impl ReferenceOnlyHandler {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

impl ResourceHandler for ReferenceOnlyHandler {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn create_steps(&self, _stewardship: StewardshipType) -> Vec<StepEntry> {
        Vec::new()
    }

    fn delete_steps(&self, _stewardship: StewardshipType) -> Vec<StepEntry> {
        Vec::new()
    }
}

/// Registry with a handler for every kind: cloud kinds delegate to
/// `cloud`, cloud-independent kinds are reference-only.
pub fn default_handlers(
    cloud: Arc<dyn CloudOperations>,
    retry: RetryPolicy,
) -> Result<Registry<dyn ResourceHandler>, RegistryError> {
    let mut builder: RegistryBuilder<dyn ResourceHandler> = RegistryBuilder::new();
    for kind in ResourceKind::ALL {
        let handler: Arc<dyn ResourceHandler> = match kind.platform() {
            Some(_) => Arc::new(CloudResourceHandler::new(kind, Arc::clone(&cloud), retry.clone())),
            None => Arc::new(ReferenceOnlyHandler::new(kind)),
        };
        builder.register(handler)?;
    }
    Ok(builder.build())
}

fn resource_from(ctx: &FlightContext) -> Result<Resource, StepFailure> {
    Ok(ctx.working().require(keys::RESOURCE)?)
}

fn cloud_failure(resource: &Resource, err: CloudError) -> StepResult {
    let failure = |f: StepFailure| f.with_resource(resource.name.clone());
    match err {
        CloudError::Transient(message) => StepResult::RetryableFailure(failure(StepFailure::retry(message))),
        other => StepResult::FatalFailure(failure(StepFailure::fatal(other.to_string()))),
    }
}

const CLOUD_OBJECT_CREATED: &str = "cloud_object_created";

/// Creates the cloud object. "Already exists" lets the step succeed but the
/// object is adopted, not owned, so undo leaves it in place.
struct CreateCloudObjectStep {
    cloud: Arc<dyn CloudOperations>,
}

#[async_trait]
impl Step for CreateCloudObjectStep {
    fn name(&self) -> &str {
        "create-cloud-object"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = match resource_from(ctx) {
            Ok(resource) => resource,
            Err(failure) => return StepResult::FatalFailure(failure),
        };

        match self.cloud.create(&resource).await {
            Ok(()) => {
                if let Err(e) = ctx.working_mut().put(CLOUD_OBJECT_CREATED, &true) {
                    return StepResult::FatalFailure(e.into());
                }
                info!(resource = %resource.id, kind = %resource.kind(), "Cloud object created");
                StepResult::Success
            }
            Err(CloudError::AlreadyExists) => {
                info!(resource = %resource.id, kind = %resource.kind(), "Cloud object already exists, adopting it");
                StepResult::Success
            }
            Err(e) => cloud_failure(&resource, e),
        }
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if !ctx.working().flag(CLOUD_OBJECT_CREATED) {
            return StepResult::Success;
        }
        let resource = match resource_from(ctx) {
            Ok(resource) => resource,
            Err(failure) => return StepResult::FatalFailure(failure),
        };

        match self.cloud.delete(&resource).await {
            Ok(()) | Err(CloudError::NotFound) => {
                debug!(resource = %resource.id, "Cloud object removed during rollback");
                ctx.working_mut().remove(CLOUD_OBJECT_CREATED);
                StepResult::Success
            }
            Err(e) => cloud_failure(&resource, e),
        }
    }
}

/// Deletes the cloud object. "Not found" counts as deleted, as does a
/// resource whose metadata was already gone. Undo is a no-op.
struct DeleteCloudObjectStep {
    cloud: Arc<dyn CloudOperations>,
}

#[async_trait]
impl Step for DeleteCloudObjectStep {
    fn name(&self) -> &str {
        "delete-cloud-object"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = match ctx.working().get::<Resource>(keys::RESOURCE) {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                debug!(run_id = %ctx.run_id(), "No resource snapshot, nothing to delete");
                return StepResult::Success;
            }
            Err(e) => return StepResult::FatalFailure(e.into()),
        };

        match self.cloud.delete(&resource).await {
            Ok(()) | Err(CloudError::NotFound) => {
                info!(resource = %resource.id, kind = %resource.kind(), "Cloud object deleted");
                StepResult::Success
            }
            Err(e) => cloud_failure(&resource, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceAttributes;
    use uuid::Uuid;

    struct NoCloud;

    #[async_trait]
    impl CloudOperations for NoCloud {
        async fn create(&self, _resource: &Resource) -> Result<(), CloudError> {
            Ok(())
        }

        async fn delete(&self, _resource: &Resource) -> Result<(), CloudError> {
            Ok(())
        }
    }

    fn bucket(stewardship: StewardshipType) -> Resource {
        Resource::new(
            Uuid::new_v4(),
            "data",
            stewardship,
            ResourceAttributes::GcsBucket {
                bucket_name: "data-bucket".to_string(),
                location: "US".to_string(),
            },
        )
    }

    #[test]
    fn test_default_handlers_cover_every_kind() {
        let handlers = default_handlers(Arc::new(NoCloud), RetryPolicy::NoRetry).unwrap();
        assert_eq!(handlers.len(), ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            assert_eq!(handlers.get(kind.as_str()).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_referenced_resources_have_no_cloud_steps() {
        let handler = CloudResourceHandler::new(ResourceKind::GcsBucket, Arc::new(NoCloud), RetryPolicy::NoRetry);

        assert_eq!(handler.create_steps(StewardshipType::Controlled).len(), 1);
        assert_eq!(handler.delete_steps(StewardshipType::Controlled).len(), 1);
        assert!(handler.create_steps(StewardshipType::Referenced).is_empty());
        assert!(handler.delete_steps(StewardshipType::Referenced).is_empty());
    }

    #[test]
    fn test_git_repo_is_reference_only() {
        let handlers = default_handlers(Arc::new(NoCloud), RetryPolicy::NoRetry).unwrap();
        let git = handlers.get(ResourceKind::GitRepo.as_str()).unwrap();
        assert!(git.create_steps(StewardshipType::Referenced).is_empty());
        assert!(git.create_steps(StewardshipType::Controlled).is_empty());
    }

    #[test]
    fn test_cloud_failure_translation() {
        let resource = bucket(StewardshipType::Controlled);

        let transient = cloud_failure(&resource, CloudError::Transient("throttled".to_string()));
        assert!(matches!(transient, StepResult::RetryableFailure(f) if f.resource.as_deref() == Some("data")));

        let permanent = cloud_failure(&resource, CloudError::Permanent("denied".to_string()));
        assert!(matches!(permanent, StepResult::FatalFailure(f) if f.message.contains("denied")));
    }
}
