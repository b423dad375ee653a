//! Failure classification for chain steps.

use thiserror::Error;

/// A backend definitively rejected an operation.
///
/// Retrying will not change the answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} rejected: {detail}")]
pub struct BackendError {
    pub operation: String,
    pub detail: String,
}

impl BackendError {
    pub fn new(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Errors a chain step can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Timeout, refused connection or any other failure to reach the backend.
    #[error("{operation}: transport failure: {reason}")]
    Transport { operation: String, reason: String },

    /// Something the step depends on is not there yet.
    #[error("{operation}: precondition not met: {reason}")]
    Precondition { operation: String, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl TaskError {
    pub fn transport(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TaskError::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn precondition(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::Precondition {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether backing off and trying again can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Transport { .. } | TaskError::Precondition { .. } => true,
            TaskError::Backend(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TaskError::transport("create_workspace", "connection refused").is_retryable());
        assert!(TaskError::precondition("validate_shapefile", "missing roads.dbf").is_retryable());

        let rejected: TaskError = BackendError::new("publish_shapefile", "datastore not found").into();
        assert!(!rejected.is_retryable());
        assert_eq!(
            rejected.to_string(),
            "publish_shapefile rejected: datastore not found"
        );
    }
}
