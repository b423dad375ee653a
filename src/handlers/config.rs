//! Per-handler configuration descriptor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::HandlerError;

/// Configuration of one handler, read once at startup.
///
/// Keys not listed here are kept in `extra` and handed to the backend
/// constructor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub active: bool,

    /// Dispatch order, lowest first.
    #[serde(default = "lowest_priority")]
    pub priority: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    /// Per-call timeout for remote requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(flatten)]
    pub extra: toml::Table,
}

fn lowest_priority() -> i64 {
    i64::MAX
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            active: false,
            priority: lowest_priority(),
            url: None,
            workspace_dir: None,
            timeout_secs: default_timeout_secs(),
            extra: toml::Table::new(),
        }
    }
}

impl HandlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// String value of a backend-specific key.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(toml::Value::as_str)
    }

    pub fn require_url(&self, handler: &str) -> Result<&str, HandlerError> {
        self.url
            .as_deref()
            .ok_or_else(|| HandlerError::missing(handler, "url"))
    }

    pub fn require_workspace_dir(&self, handler: &str) -> Result<PathBuf, HandlerError> {
        self.workspace_dir
            .clone()
            .ok_or_else(|| HandlerError::missing(handler, "workspace_dir"))
    }

    /// A backend-specific key holding a path.
    pub fn require_path(&self, handler: &str, key: &'static str) -> Result<PathBuf, HandlerError> {
        self.extra_str(key)
            .map(PathBuf::from)
            .ok_or_else(|| HandlerError::missing(handler, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_passthrough() {
        let config: HandlerConfig = toml::from_str(
            r#"
url = "http://thredds:8080"
catalog_prefix = "birdhouse"
"#,
        )
        .unwrap();

        assert!(!config.active);
        assert_eq!(config.priority, i64::MAX);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.extra_str("catalog_prefix"), Some("birdhouse"));
        assert_eq!(config.require_url("Thredds").unwrap(), "http://thredds:8080");
    }

    #[test]
    fn test_missing_required_params() {
        let config = HandlerConfig::default();
        let err = config.require_workspace_dir("Geoserver").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Handler Geoserver is missing required parameter 'workspace_dir'"
        );
        assert!(config.require_path("FileSystem", "wps_outputs_dir").is_err());
    }
}
