//! Exponential backoff around gateway calls.
//!
//! Transient failures (see [`crate::GatewayError::is_retryable`]) are retried with
//! delays of `min(base * 2^k, max)`; anything else propagates immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::LlmGateway;
use crate::error::Result;
use crate::types::{ChatContext, ChatResponse, ModelConfig};

/// Calculate exponential backoff duration.
#[must_use]
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

/// Retry settings for gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts: 1,
        }
    }

    /// Delay after the `k`-th consecutive failure (zero-based).
    #[must_use]
    pub fn delay_for(&self, k: u32) -> Duration {
        calculate_backoff(k, self.base_delay_ms, self.max_delay_ms)
    }
}

const fn default_base_delay_ms() -> u64 {
    2_000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_max_attempts() -> u32 {
    10
}

/// Reported before each backoff sleep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub max_attempts: u32,
    /// Status code or marker of the failure.
    pub code: String,
    pub delay: Duration,
}

/// Request the next assistant turn, retrying transient failures.
///
/// When `on_chunk` is given the streaming endpoint is used. `on_retry` fires
/// once per backoff, before sleeping.
pub async fn chat_with_retry<F>(
    gateway: &dyn LlmGateway,
    config: &ModelConfig,
    context: &ChatContext,
    policy: &RetryPolicy,
    on_chunk: Option<&(dyn for<'a> Fn(&'a str) + Send + Sync)>,
    mut on_retry: F,
) -> Result<ChatResponse>
where
    F: FnMut(&RetryNotice) + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        let outcome = match on_chunk {
            Some(callback) => gateway.chat_stream(config, context, callback).await,
            None => gateway.chat(config, context).await,
        };

        let error = match outcome {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let attempt = failures.saturating_add(1);
        if !error.is_retryable() {
            warn!(model = %config.model, error = %error, "Gateway call failed (not retryable)");
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!(
                model = %config.model,
                attempts = attempt,
                error = %error,
                "Gateway call failed, retries exhausted"
            );
            return Err(error);
        }

        let delay = policy.delay_for(failures);
        let notice = RetryNotice {
            attempt,
            max_attempts,
            code: error.code(),
            delay,
        };
        info!(
            model = %config.model,
            attempt,
            max_attempts,
            code = %notice.code,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying gateway call after transient error"
        );
        on_retry(&notice);
        tokio::time::sleep(delay).await;
        failures = attempt;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::GatewayError;
    use crate::scripted::ScriptedGateway;

    #[test]
    fn should_double_delay_until_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6)
            .map(|k| u64::try_from(policy.delay_for(k).as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn should_never_overflow_on_large_attempts() {
        assert_eq!(calculate_backoff(200, 2_000, 30_000), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn given_transient_failures_when_chatting_then_backs_off_and_succeeds() {
        let gateway = ScriptedGateway::new();
        gateway.push_error(GatewayError::api(429, "slow down"));
        gateway.push_error(GatewayError::api(503, "busy"));
        gateway.push_error(GatewayError::EmptyResponse);
        gateway.push_text("done");

        let mut notices = Vec::new();
        let response = chat_with_retry(
            &gateway,
            &ModelConfig::new(crate::Provider::OpenAi, "m"),
            &ChatContext::default(),
            &RetryPolicy::default(),
            None,
            |n| notices.push(n.clone()),
        )
        .await
        .unwrap();

        assert_eq!(response.content, "done");
        let delays: Vec<Duration> = notices.iter().map(|n| n.delay).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(notices[0].code, "429");
        assert_eq!(notices[2].code, "empty_response");
    }

    #[tokio::test(start_paused = true)]
    async fn given_only_transient_failures_when_chatting_then_stops_at_attempt_cap() {
        let gateway = ScriptedGateway::new();
        for _ in 0..20 {
            gateway.push_error(GatewayError::api(500, "down"));
        }

        let policy = RetryPolicy {
            max_attempts: 4,
            ..RetryPolicy::default()
        };
        let mut notices = 0;
        let result = chat_with_retry(
            &gateway,
            &ModelConfig::new(crate::Provider::OpenAi, "m"),
            &ChatContext::default(),
            &policy,
            None,
            |_| notices += 1,
        )
        .await;

        assert_eq!(result, Err(GatewayError::api(500, "down")));
        assert_eq!(notices, 3);
        assert_eq!(gateway.request_count(), 4);
    }

    #[tokio::test]
    async fn given_terminal_error_when_chatting_then_propagates_immediately() {
        let gateway = ScriptedGateway::new();
        gateway.push_error(GatewayError::api(401, "bad key"));
        gateway.push_text("never reached");

        let result = chat_with_retry(
            &gateway,
            &ModelConfig::new(crate::Provider::OpenAi, "m"),
            &ChatContext::default(),
            &RetryPolicy::default(),
            None,
            |_| {},
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Api { status: 401, .. })));
        assert_eq!(gateway.request_count(), 1);
    }
}
