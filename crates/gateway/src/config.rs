//! Configuration for the gateway clients.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GatewayError, Result};
use crate::retry::RetryPolicy;

/// Used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/";

/// Configuration for [`crate::HttpGateway`] and [`crate::BridgeGateway`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible server.
    #[serde(default)]
    pub base_url: Option<Url>,

    /// Path of the chat completions endpoint, relative to `base_url`.
    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    /// Bearer token, if the server wants one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for one request.
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Command line of the subprocess bridge, program first.
    #[serde(default = "default_bridge_command")]
    pub bridge_command: Vec<String>,

    /// Turn limit passed to the bridge with each query.
    #[serde(default = "default_bridge_max_turns")]
    pub bridge_max_turns: u32,

    /// Backoff for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            chat_path: default_chat_path(),
            api_key: None,
            timeout: default_timeout(),
            bridge_command: default_bridge_command(),
            bridge_max_turns: default_bridge_max_turns(),
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a config pointing at a server.
    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url: Some(base_url),
            ..Self::default()
        }
    }

    /// Set the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolved endpoint for chat completions.
    pub fn chat_url(&self) -> Result<Url> {
        let base = match &self.base_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_BASE_URL)
                .map_err(|e| GatewayError::other(format!("Invalid base URL: {e}")))?,
        };
        base.join(&self.chat_path)
            .map_err(|e| GatewayError::other(format!("Invalid chat URL: {e}")))
    }

    /// Apply `ORCHID_GATEWAY_URL` and `ORCHID_API_KEY` when set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("ORCHID_GATEWAY_URL") {
            if let Ok(parsed) = url.parse() {
                self.base_url = Some(parsed);
            }
        }

        if let Ok(key) = std::env::var("ORCHID_API_KEY") {
            self.api_key = Some(key);
        }

        self
    }

    /// Load configuration from a TOML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        if path.extension().is_some_and(|e| e == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            toml::from_str(&content)
                .map_err(|e| GatewayError::other(format!("Failed to parse config: {e}")))
        }
    }
}

fn default_chat_path() -> String {
    "v1/chat/completions".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_bridge_command() -> Vec<String> {
    vec!["python3".to_string(), "bridge/agent_bridge.py".to_string()]
}

const fn default_bridge_max_turns() -> u32 {
    10
}

/// Serialization helper for Duration as seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.chat_url().unwrap().as_str(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            base_url = "http://gw:8080/api/"
            timeout = 12

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(
            config.chat_url().unwrap().as_str(),
            "http://gw:8080/api/v1/chat/completions"
        );
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert_eq!(config.bridge_max_turns, 10);
    }

    #[test]
    fn test_from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, r#"{"api_key": "sk-test", "chat_path": "chat"}"#).unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.chat_path, "chat");
    }
}
