//! Service configuration.
//!
//! The construction-time description of a service: the raw about metadata
//! document, the object path identifier and the session port. Events and
//! actions are registered on the builder, since action handlers cannot come
//! from a file.

use std::path::Path;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "herald.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "HERALD_CONFIG";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "HERALD_LOG";

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("could not read configuration file")]
    Io(#[from] std::io::Error),

    #[error("could not parse configuration file")]
    Yaml(#[from] serde_yaml::Error),
}

/// Construction-time description of one service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// Raw about metadata document; root element `About` with at least
    /// non-empty `AppName` and `DefaultLanguage` children.
    pub about_document: String,
    /// Forward-slash delimited object path, e.g. `/org/example/button`.
    pub path: String,
    /// Port used both for session binding and as the announcement port.
    pub session_port: u16,
}

impl ServiceConfig {
    pub fn new(
        about_document: impl Into<String>,
        path: impl Into<String>,
        session_port: u16,
    ) -> Self {
        Self {
            about_document: about_document.into(),
            path: path.into(),
            session_port,
        }
    }

    /// Parse a configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LoadError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    /// Load from the file named by `HERALD_CONFIG`, falling back to
    /// `herald.yaml` in the working directory.
    pub fn from_env() -> Result<Self, LoadError> {
        let path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_yaml_file(path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    const YAML: &str = r#"
about_document: "<About><AppName>Higgns Button</AppName><DefaultLanguage>en</DefaultLanguage></About>"
path: /org/example/button
session_port: 1337
"#;

    #[test]
    fn test_from_yaml_str() {
        let config = ServiceConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.path, "/org/example/button");
        assert_eq!(config.session_port, 1337);
        assert!(config.about_document.contains("Higgns Button"));
    }

    #[test]
    fn test_from_yaml_str_rejects_garbage() {
        assert!(matches!(
            ServiceConfig::from_yaml_str("nonsense: [").unwrap_err(),
            LoadError::Yaml(_)
        ));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ServiceConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.session_port, 1337);
    }

    #[test]
    fn test_from_yaml_file_missing() {
        assert!(matches!(
            ServiceConfig::from_yaml_file("/nonexistent/herald.yaml").unwrap_err(),
            LoadError::Io(_)
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_uses_config_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        std::env::set_var(CONFIG_ENV_VAR, file.path());
        let config = ServiceConfig::from_env().unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.path, "/org/example/button");
    }
}
