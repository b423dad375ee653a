//! Error types for watches and the watch registry.

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::StoreError;

/// Errors from a single watch.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot monitor {path}: no such file or directory")]
    PathMissing { path: PathBuf },

    #[error("Watch [path={path}, callback={callback}] is already started")]
    AlreadyRunning { path: PathBuf, callback: String },

    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Failed to spawn delivery thread for {path}: {source}")]
    DeliveryThread {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// A callback reference could not be turned into a live callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackResolutionError {
    #[error("Malformed callback identifier '{0}': expected <module-path>.<TypeName>")]
    Malformed(String),

    #[error("Unknown callback '{0}'")]
    Unknown(String),

    #[error("Callback '{0}' has no live instance")]
    Unavailable(String),

    #[error("Callback '{requested}' resolved to an instance of '{resolved}'")]
    Mismatch { requested: String, resolved: String },
}

/// Errors surfaced by registry operations.
///
/// Watch start failures are not part of this type: they are logged and the
/// registration yields no watch.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Resolution(#[from] CallbackResolutionError),

    #[error("Monitor store error: {0}")]
    Store(#[from] StoreError),
}
