//! The gateway seam and its OpenAI-compatible HTTP implementation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::sse::StreamAccumulator;
use crate::types::{ChatContext, ChatResponse, ModelConfig};
use crate::wire;

/// Stateless chat interface over a provider-agnostic schema.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Request the next assistant turn.
    async fn chat(&self, config: &ModelConfig, context: &ChatContext) -> Result<ChatResponse>;

    /// Request the next assistant turn, reporting content as it arrives.
    ///
    /// The default implementation delivers the whole content as one chunk.
    async fn chat_stream(
        &self,
        config: &ModelConfig,
        context: &ChatContext,
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ChatResponse> {
        let response = self.chat(config, context).await?;
        if !response.content.is_empty() {
            on_chunk(&response.content);
        }
        Ok(response)
    }
}

/// Gateway for OpenAI-compatible chat completion servers (including Ollama).
#[derive(Debug, Clone)]
pub struct HttpGateway {
    config: Arc<GatewayConfig>,
    endpoint: Url,
    http: reqwest::Client,
}

impl HttpGateway {
    /// Create a gateway with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(GatewayConfig::default())
    }

    /// Create a gateway with custom configuration.
    pub fn with_config(config: GatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::other(format!("Failed to build HTTP client: {e}")))?;
        let endpoint = config.chat_url()?;

        Ok(Self {
            config: Arc::new(config),
            endpoint,
            http,
        })
    }

    /// The resolved chat completions endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut request = self.http.post(self.endpoint.as_ref()).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::api(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn chat(&self, config: &ModelConfig, context: &ChatContext) -> Result<ChatResponse> {
        let start = Instant::now();
        let body = wire::build_request(config, context, false);
        debug!(
            model = %config.model,
            messages = context.messages.len(),
            "Sending chat request"
        );

        let response = self.post(&body).await?;
        let text = response.text().await?;
        let parsed = wire::decode_response(&text)?;

        info!(
            model = %config.model,
            tool_calls = parsed.calls().len(),
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Chat request complete"
        );
        Ok(parsed)
    }

    async fn chat_stream(
        &self,
        config: &ModelConfig,
        context: &ChatContext,
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ChatResponse> {
        let body = wire::build_request(config, context, true);
        debug!(model = %config.model, "Starting streamed chat request");

        let response = self.post(&body).await?;
        let mut stream = response.bytes_stream();
        let mut accumulator = StreamAccumulator::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            for delta in accumulator.push(&bytes)? {
                on_chunk(&delta);
            }
            if accumulator.is_done() {
                break;
            }
        }

        accumulator.finish()
    }
}
