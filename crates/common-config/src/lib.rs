//! Shared configuration helpers for autotest services.

use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// A service configuration that can be layered from defaults, an optional
/// YAML file and environment variables sharing a common prefix.
pub trait ServiceConfig: DeserializeOwned + Default {
    /// Environment prefix, including the trailing underscore (e.g. `AUTOTEST_`).
    const PREFIX: &'static str;

    /// Apply `PREFIX`-scoped environment variables on top of the loaded values.
    fn apply_environment_overrides(&mut self, _prefix: &str) {}
}

/// Load a service configuration.
///
/// Starts from `T::default()`, replaces it with the YAML document named by
/// `<PREFIX>CONFIG` when that variable is set, then applies environment
/// overrides.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    let mut config = match env_override(T::PREFIX, "CONFIG") {
        Some(path) => {
            tracing::info!(%path, "loading configuration file");
            from_path::<T>(path)?
        }
        None => T::default(),
    };
    config.apply_environment_overrides(T::PREFIX);
    Ok(config)
}

/// Parse a configuration from a YAML file on disk.
pub fn from_path<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path)?;
    from_yaml_str(&contents)
}

/// Parse a configuration from a YAML document. Missing fields fall back to
/// whatever `#[serde(default)]` the target type declares.
pub fn from_yaml_str<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Read `<prefix><key>` from the environment, ignoring empty values.
pub fn env_override(prefix: &str, key: &str) -> Option<String> {
    env::var(format!("{prefix}{key}"))
        .ok()
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        bind_address: String,
        port: u16,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
            }
        }
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let sample: Sample = from_yaml_str("port: 9000\n").expect("parse");
        assert_eq!(sample.port, 9000);
        assert_eq!(sample.bind_address, "0.0.0.0");
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let result = from_yaml_str::<Sample>("port: [not, a, port]");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = from_path::<Sample>("/nonexistent/autotest/config.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
