//! Configuration loader.

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.flightdeck`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RetryPolicyConfig, StoreBackend};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.engine.max_workers, 8);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_load_engine_and_store() {
        let content = r#"
            [engine]
            max_workers = 2
            status_poll_interval_ms = 50

            [store]
            backend = "sqlite"
            path = "/var/lib/flightdeck/runs.db"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.engine.max_workers, 2);
        assert_eq!(config.engine.status_poll_interval_ms, 50);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(config.store.path.is_some());
    }

    #[test]
    fn test_load_retry_policies() {
        let content = r#"
            [resources.cloud_retry]
            type = "exponential"
            initial_ms = 500
            max_ms = 30000
            max_total_secs = 600

            [resources.metadata_retry]
            type = "fixed"
            interval_ms = 100
            max_count = 5

            [resources.drain_retry]
            type = "none"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(
            config.resources.cloud_retry,
            RetryPolicyConfig::Exponential {
                initial_ms: 500,
                max_ms: 30000,
                max_total_secs: 600,
            }
        );
        assert_eq!(
            config.resources.metadata_retry,
            RetryPolicyConfig::Fixed {
                interval_ms: 100,
                max_count: 5,
            }
        );
        assert_eq!(config.resources.drain_retry, RetryPolicyConfig::None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine]").unwrap();
        writeln!(file, "max_workers = 3").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.engine.max_workers, 3);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/flightdeck.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_nonexistent_file() {
        let config = ConfigLoader::load_or_default(Path::new("/nonexistent/flightdeck.toml")).unwrap();
        assert_eq!(config.engine.max_workers, 8);
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-only variable name, not read anywhere else
        unsafe {
            std::env::set_var("FLIGHTDECK_TEST_STORE_PATH", "/tmp/fd-runs");
        }
        let content = "path = \"${FLIGHTDECK_TEST_STORE_PATH}\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert!(expanded.contains("/tmp/fd-runs"));
        unsafe {
            std::env::remove_var("FLIGHTDECK_TEST_STORE_PATH");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${FLIGHTDECK_NONEXISTENT_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = ConfigLoader::expand_path("~/runs");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/runs"));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        assert_eq!(ConfigLoader::expand_path("/usr/local"), "/usr/local");
    }
}
