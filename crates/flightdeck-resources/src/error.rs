//! Resource layer errors.

use thiserror::Error;

use flightdeck_engine::StepFailure;

/// Errors from a [`WorkspaceCatalog`](crate::WorkspaceCatalog).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog could not be reached; safe to retry.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    /// An item the operation requires does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An item with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// The catalog rejected the request.
    #[error("Invalid catalog request: {0}")]
    Invalid(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

impl From<CatalogError> for StepFailure {
    fn from(err: CatalogError) -> Self {
        if err.is_transient() {
            StepFailure::retry(err.to_string())
        } else {
            StepFailure::fatal(err.to_string())
        }
    }
}

/// Resource model and handler errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// Kind-specific attribute validation failed.
    #[error("Invalid {kind}: {message}")]
    Validation { kind: String, message: String },

    /// No handler registered for the resource kind.
    #[error("No handler for resource kind: {0}")]
    UnsupportedKind(String),

    /// The folder list does not form a tree.
    #[error("Invalid folder tree: {0}")]
    FolderTree(String),
}

impl From<ResourceError> for StepFailure {
    fn from(err: ResourceError) -> Self {
        StepFailure::fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        let transient: StepFailure = CatalogError::Unavailable("timeout".to_string()).into();
        assert!(transient.retryable);

        let missing: StepFailure = CatalogError::NotFound {
            kind: "workspace",
            id: "ws-1".to_string(),
        }
        .into();
        assert!(!missing.retryable);
        assert!(missing.message.contains("ws-1"));
    }

    #[test]
    fn test_validation_display() {
        let err = ResourceError::Validation {
            kind: "GCS_BUCKET".to_string(),
            message: "name too short".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid GCS_BUCKET: name too short");
    }
}
