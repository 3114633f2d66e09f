//! Errors for agent and watcher operations.
//!
//! These are business errors returned to callers and in RPC replies; an
//! actor that returns one keeps running.

use std::time::Duration;

use orchid_gateway::GatewayError;
use thiserror::Error;

/// Errors returned by agent operations.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// No live actor answers to this id.
    #[error("Agent not found: {0}")]
    NotFound(String),

    /// The actor stopped before replying.
    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    /// A blocking call gave up waiting.
    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),

    /// The run failed with a terminal gateway error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The agent was stopped while the caller waited.
    #[error("Agent stopped: {0}")]
    Stopped(String),

    /// Failed to spawn the actor.
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    /// Storage failure while preparing or finishing a run.
    #[error("Store error: {0}")]
    Store(String),
}

impl AgentError {
    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an unavailable error.
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self::Unavailable(id.into())
    }

    /// Create a stopped error.
    pub fn stopped(reason: impl Into<String>) -> Self {
        Self::Stopped(reason.into())
    }

    /// Create a spawn error.
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed(reason.into())
    }
}

impl From<orchid_core::Error> for AgentError {
    fn from(e: orchid_core::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Errors returned by watcher queries.
#[derive(Debug, Clone, Error)]
pub enum WatcherError {
    /// The watcher actor is not running.
    #[error("Watcher unavailable")]
    Unavailable,

    /// The watcher did not answer in time.
    #[error("Watcher call timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to spawn the watcher.
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
}
