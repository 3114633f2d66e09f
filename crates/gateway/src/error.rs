//! Error types for the gateway crate.
//!
//! The set is closed: every provider failure is reported as an API error with
//! its status and body, as the transient empty-response marker, or as `Other`.

use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// HTTP statuses treated as transient by the retry policy.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Errors reported by an LLM gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider answered with a non-success status.
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// The provider answered successfully but with nothing usable in it.
    #[error("empty response from provider")]
    EmptyResponse,

    /// Anything else: transport, decoding, bridge process failures.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Create an API error.
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create an untyped error.
    pub fn other(reason: impl Into<String>) -> Self {
        Self::Other(reason.into())
    }

    /// Check if this error is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => TRANSIENT_STATUSES.contains(status),
            Self::EmptyResponse => true,
            Self::Other(_) => false,
        }
    }

    /// Short code shown in agent status while retrying.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Api { status, .. } => status.to_string(),
            Self::EmptyResponse => "empty_response".to_string(),
            Self::Other(_) => "error".to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Other(format!("HTTP error: {e}"))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Other(format!("JSON error: {e}"))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Other(format!("I/O error: {e}"))
    }
}
