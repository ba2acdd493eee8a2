//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, RetryPolicyConfig, StoreBackend};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_engine(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_resources(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_engine(config: &Config, result: &mut ValidationResult) {
        if config.engine.max_workers == 0 {
            result.add_error(ValidationError::new(
                "engine.max_workers",
                "max_workers must be greater than 0",
            ));
        }

        if config.engine.status_poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "engine.status_poll_interval_ms",
                "status_poll_interval_ms must be greater than 0",
            ));
        }

        if config.engine.default_wait_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "engine.default_wait_timeout_secs",
                "waits must be time-bounded; use a positive timeout",
            ));
        }

        if config.engine.store_retry_initial_ms == 0 {
            result.add_error(ValidationError::new(
                "engine.store_retry_initial_ms",
                "store_retry_initial_ms must be greater than 0",
            ));
        } else if config.engine.store_retry_max_ms < config.engine.store_retry_initial_ms {
            result.add_error(ValidationError::new(
                "engine.store_retry_max_ms",
                "store_retry_max_ms must not be less than store_retry_initial_ms",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        match config.store.backend {
            StoreBackend::Memory => {
                result.add_warning(ValidationWarning::new(
                    "store.backend",
                    "memory store does not survive restarts; in-flight runs cannot be recovered",
                ));
            }
            StoreBackend::File | StoreBackend::Sqlite => {
                if config.store.path.is_none() {
                    result.add_error(ValidationError::new(
                        "store.path",
                        format!("{:?} backend requires a path", config.store.backend),
                    ));
                }
            }
        }
    }

    fn validate_resources(config: &Config, result: &mut ValidationResult) {
        let resources = &config.resources;
        Self::validate_retry("resources.cloud_retry", &resources.cloud_retry, result);
        Self::validate_retry("resources.metadata_retry", &resources.metadata_retry, result);
        Self::validate_retry("resources.drain_retry", &resources.drain_retry, result);

        let wait = &resources.wait;
        if wait.initial_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "resources.wait.initial_interval_secs",
                "poll interval must be greater than 0",
            ));
        }
        if wait.initial_interval_secs > wait.max_interval_secs {
            result.add_error(ValidationError::new(
                "resources.wait.max_interval_secs",
                "max_interval_secs must not be smaller than initial_interval_secs",
            ));
        }
        if wait.max_duration_secs == 0 {
            result.add_error(ValidationError::new(
                "resources.wait.max_duration_secs",
                "sub-flight waits must have a positive ceiling",
            ));
        }
        if wait.max_duration_secs < 60 {
            result.add_warning(ValidationWarning::new(
                "resources.wait.max_duration_secs",
                "cloud deletions can take hours; a ceiling under a minute will time out often",
            ));
        }
    }

    fn validate_retry(path: &str, policy: &RetryPolicyConfig, result: &mut ValidationResult) {
        match policy {
            RetryPolicyConfig::None => {}
            RetryPolicyConfig::Fixed { interval_ms, max_count } => {
                if *max_count == 0 {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.max_count", path),
                        "max_count = 0 never retries; use type = \"none\" instead",
                    ));
                }
                if *interval_ms == 0 {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.interval_ms", path),
                        "retrying without delay may hammer the failing service",
                    ));
                }
            }
            RetryPolicyConfig::Exponential {
                initial_ms,
                max_ms,
                max_total_secs,
            } => {
                if *initial_ms == 0 {
                    result.add_error(ValidationError::new(
                        format!("{}.initial_ms", path),
                        "initial_ms must be greater than 0",
                    ));
                }
                if initial_ms > max_ms {
                    result.add_error(ValidationError::new(
                        format!("{}.max_ms", path),
                        "max_ms must not be smaller than initial_ms",
                    ));
                }
                if *max_total_secs == 0 {
                    result.add_error(ValidationError::new(
                        format!("{}.max_total_secs", path),
                        "max_total_secs must be greater than 0",
                    ));
                }
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "log level cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
