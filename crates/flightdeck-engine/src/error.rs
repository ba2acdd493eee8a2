//! Engine errors.

use thiserror::Error;

use crate::run::{RunId, RunStatus};

/// Errors reading or writing typed values in a [`Parameters`](crate::Parameters) map.
#[derive(Debug, Error)]
pub enum ParameterError {
    /// Required key is absent.
    #[error("Missing parameter: {0}")]
    Missing(String),

    /// Value exists but does not have the requested shape.
    #[error("Parameter '{key}' has unexpected type: {message}")]
    InvalidType { key: String, message: String },

    /// Value could not be serialized.
    #[error("Failed to serialize parameter '{key}': {message}")]
    Serialize { key: String, message: String },
}

/// Run store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (IO, database, serialization).
    #[error("Storage error: {0}")]
    Backend(String),

    /// A run expected to exist was not found.
    #[error("Run not found: {0}")]
    NotFound(RunId),
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An item with the same id was registered twice.
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),
}

/// Engine errors surfaced to callers of [`Engine`](crate::Engine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// No factory registered for the flight type.
    #[error("Unknown flight type: {0}")]
    UnknownFlightType(String),

    /// The factory rejected the input parameters.
    #[error("Invalid flight definition for '{flight_type}': {message}")]
    InvalidDefinition { flight_type: String, message: String },

    /// A run with this id exists with different type or inputs.
    #[error("Run id {0} is already used with different flight type or inputs")]
    RunIdConflict(RunId),

    /// Run does not exist.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// `wait_for` deadline passed before the run reached a terminal status.
    #[error("Timed out waiting for run {run_id} (last status {status})")]
    WaitTimeout { run_id: RunId, status: RunStatus },

    /// Engine is shutting down.
    #[error("Engine is shut down")]
    ShutDown,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_display() {
        let err = ParameterError::Missing("workspace_id".to_string());
        assert!(err.to_string().contains("workspace_id"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: EngineError = StoreError::Backend("disk full".to_string()).into();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_wait_timeout_display() {
        let err = EngineError::WaitTimeout {
            run_id: RunId::new("r-1"),
            status: RunStatus::Waiting,
        };
        let display = err.to_string();
        assert!(display.contains("r-1"));
        assert!(display.contains("WAITING"));
    }
}
