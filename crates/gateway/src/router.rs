//! Dispatch by provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bridge::BridgeGateway;
use crate::client::{HttpGateway, LlmGateway};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::types::{ChatContext, ChatResponse, ModelConfig, Provider};

/// Routes each request to the gateway registered for its provider.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    routes: HashMap<Provider, Arc<dyn LlmGateway>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway for a provider, replacing any previous one.
    #[must_use]
    pub fn route(mut self, provider: Provider, gateway: Arc<dyn LlmGateway>) -> Self {
        self.routes.insert(provider, gateway);
        self
    }

    /// Standard routing: HTTP for OpenAI-compatible servers, subprocess for the bridge.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let http: Arc<dyn LlmGateway> = Arc::new(HttpGateway::with_config(config.clone())?);
        let bridge: Arc<dyn LlmGateway> = Arc::new(BridgeGateway::new(config.clone()));

        Ok(Self::new()
            .route(Provider::OpenAi, Arc::clone(&http))
            .route(Provider::Ollama, http)
            .route(Provider::Bridge, bridge))
    }

    fn gateway_for(&self, provider: Provider) -> Result<&Arc<dyn LlmGateway>> {
        self.routes
            .get(&provider)
            .ok_or_else(|| GatewayError::other(format!("No gateway registered for provider {provider}")))
    }
}

#[async_trait]
impl LlmGateway for ProviderRouter {
    async fn chat(&self, config: &ModelConfig, context: &ChatContext) -> Result<ChatResponse> {
        self.gateway_for(config.provider)?.chat(config, context).await
    }

    async fn chat_stream(
        &self,
        config: &ModelConfig,
        context: &ChatContext,
        on_chunk: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<ChatResponse> {
        self.gateway_for(config.provider)?
            .chat_stream(config, context, on_chunk)
            .await
    }
}
