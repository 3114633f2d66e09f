//! Core error types for Orchid.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type shared by the store, configuration, and plan loading.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("failed to create directory '{path}': {reason}")]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a not found error for an entity of the given kind.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a directory creation error.
    pub fn directory_creation_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DirectoryCreationFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error means the entity does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonParseFailed {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_render_not_found_with_kind_and_id() {
        let err = Error::not_found("goal", "g-1");
        assert_eq!(err.to_string(), "goal not found: g-1");
        assert!(err.is_not_found());
    }

    #[test]
    fn should_name_the_file_that_could_not_be_read() {
        let err = Error::file_read_failed("/etc/orchid.toml", "permission denied");
        assert_eq!(
            err.to_string(),
            "failed to read file '/etc/orchid.toml': permission denied"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn should_convert_json_errors() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err = parse.map_err(Error::from).err();
        assert!(matches!(err, Some(Error::JsonParseFailed { .. })));
    }
}
