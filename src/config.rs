//! Configuration for the sync service.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `STACKSYNC_` and use double
//! underscores to separate nested levels:
//! - `STACKSYNC_TASKS__MAX_ATTEMPTS=4` sets `tasks.max_attempts`
//! - `STACKSYNC_MONITORING__STORE_PATH=/var/lib/stacksync/monitors.json`
//!
//! `STACKSYNC_CONFIG` selects the settings file itself.
//!
//! Handler definitions are not part of [`Settings`]: they live in one or more
//! TOML fragments (see [`load_handler_fragments`]) so that their declaration
//! order survives loading.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::handlers::HandlerConfig;
use crate::tasks::RetryPolicy;

/// Environment variable naming the settings file.
pub const CONFIG_ENV_VAR: &str = "STACKSYNC_CONFIG";

/// Default settings file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".stacksync/settings.toml";

/// One `[handlers]` table, in declaration order.
pub type HandlersFragment = IndexMap<String, HandlerConfig>;

/// Errors from loading handler fragments.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read handler configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid handler configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// File or directory holding `[handlers]` fragments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handlers_config: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Watch persistence and reconciliation
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Task pipeline workers and retry schedule
    #[serde(default)]
    pub tasks: TaskConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level applied to every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `"stacksync::tasks" = "debug"`
    #[serde(default)]
    pub modules: IndexMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitoringConfig {
    /// JSON file persisting watch descriptors
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// How often degraded watches are retried, in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskConfig {
    /// Maximum number of chain steps executing at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempt ceiling for retryable step failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomize backoff delays
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_version() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from(".stacksync/monitors.json")
}
fn default_reconcile_interval() -> u64 {
    60
}
fn default_workers() -> usize {
    num_cpus::get()
}
fn default_max_attempts() -> u32 {
    8
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    120_000
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            handlers_config: None,
            logging: LoggingConfig::default(),
            monitoring: MonitoringConfig::default(),
            tasks: TaskConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: IndexMap::new(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

impl MonitoringConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl TaskConfig {
    /// Exponential retry policy shared by every chain step.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STACKSYNC_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Read every handler fragment referenced by `handlers_config`.
    pub fn handler_fragments(&self) -> Result<Vec<HandlersFragment>, ConfigError> {
        match &self.handlers_config {
            Some(path) => load_handler_fragments(path),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FragmentFile {
    #[serde(default)]
    handlers: HandlersFragment,
}

/// Load `[handlers]` tables from a TOML file or a directory of TOML files.
///
/// Directories are read in file-name order. A missing path yields no
/// fragments; a file without a `[handlers]` table yields an empty one.
pub fn load_handler_fragments(path: &Path) -> Result<Vec<HandlersFragment>, ConfigError> {
    if !path.exists() {
        tracing::warn!(
            "[config] handler configuration {} does not exist",
            path.display()
        );
        return Ok(Vec::new());
    }

    let files = if path.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    files.iter().map(|file| load_fragment_file(file)).collect()
}

fn load_fragment_file(path: &Path) -> Result<HandlersFragment, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: FragmentFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    crate::debug_event!(
        "config",
        "loaded fragment",
        "{} ({} handlers)",
        path.display(),
        parsed.handlers.len()
    );
    Ok(parsed.handlers)
}
