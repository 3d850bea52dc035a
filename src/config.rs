//! Config file loading

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use podtail_types::SessionOptions;

/// On-disk configuration (TOML)
///
/// ```toml
/// [session]
/// capacity = 5000
/// notification_interval_ms = 200
/// default_container = "app"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionOptions,
}

impl Config {
    /// Load the config file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podtail_types::{DEFAULT_CAPACITY, DEFAULT_NOTIFICATION_INTERVAL};
    use std::time::Duration;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.session.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.session.notification_interval, DEFAULT_NOTIFICATION_INTERVAL);
        assert!(config.session.container.is_empty());
    }

    #[test]
    fn test_session_section() {
        let config = Config::parse(
            r#"
            [session]
            capacity = 42
            notification_interval_ms = 50
            default_container = "app"
            case_insensitive = true
            "#,
        )
        .unwrap();
        assert_eq!(config.session.capacity, 42);
        assert_eq!(config.session.notification_interval, Duration::from_millis(50));
        assert_eq!(config.session.default_container, "app");
        assert!(config.session.case_insensitive);
    }

    #[test]
    fn test_bad_type_is_an_error() {
        assert!(Config::parse("[session]\ncapacity = \"lots\"").is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/definitely/not/here.toml"))).is_err());
        assert!(Config::load(None).is_ok());
    }
}
