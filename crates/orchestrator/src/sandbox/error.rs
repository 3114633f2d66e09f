//! Sandbox errors.

use std::time::Duration;

use thiserror::Error;

use super::edit::EditError;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors from sandbox lifecycle and data operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("edit of {path} failed: {source}")]
    Edit {
        path: String,
        #[source]
        source: EditError,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid search pattern: {0}")]
    InvalidPattern(String),

    #[error("sandbox for project {project_id} unavailable: {reason}")]
    Unavailable { project_id: String, reason: String },

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),
}

impl SandboxError {
    /// Create an unavailable error.
    pub fn unavailable(project_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            project_id: project_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a runtime error.
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime(reason.into())
    }

    /// Create an edit error for a path.
    pub fn edit(path: impl Into<String>, source: EditError) -> Self {
        Self::Edit {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SandboxError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Io(format!("blocking task failed: {e}"))
    }
}
