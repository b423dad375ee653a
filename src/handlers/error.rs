//! Error types for handlers.

use std::path::PathBuf;
use thiserror::Error;

use crate::watcher::RegistryError;

/// Failure of the synchronous part of a handler operation.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Handler {handler} is missing required parameter '{param}'")]
    MissingParam {
        handler: String,
        param: &'static str,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid layout at {path}: {reason}")]
    Layout { path: PathBuf, reason: String },

    #[error("Failed to build HTTP client for {handler}: {source}")]
    Client {
        handler: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Monitoring error: {0}")]
    Registry(#[from] RegistryError),
}

impl HandlerError {
    pub fn missing(handler: &str, param: &'static str) -> Self {
        HandlerError::MissingParam {
            handler: handler.to_string(),
            param,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HandlerError::Io {
            path: path.into(),
            source,
        }
    }
}
