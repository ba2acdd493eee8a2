//! Configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Config references ${{{0}}}, which is not set")]
    EnvVarNotSet(String),

    #[error("Bad substitution pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_not_set_names_the_variable() {
        let err = ConfigError::EnvVarNotSet("FLIGHTDECK_DB".to_string());
        assert_eq!(err.to_string(), "Config references ${FLIGHTDECK_DB}, which is not set");
    }

    #[test]
    fn test_parse_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("engine = [").unwrap_err();
        let err = ConfigError::from(toml_err);
        assert!(err.to_string().starts_with("Config is not valid TOML"));
    }
}
