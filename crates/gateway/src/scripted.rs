//! Scripted gateway for tests.
//!
//! Responses are served from a queue first, then from an optional handler
//! that sees the request. Every request is recorded.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::client::LlmGateway;
use crate::error::{GatewayError, Result};
use crate::types::{ChatContext, ChatResponse, ModelConfig, ToolCall};

type Handler = Box<dyn Fn(&ModelConfig, &ChatContext) -> Result<ChatResponse> + Send + Sync>;

/// In-memory gateway that replays queued responses.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ChatResponse>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<(ModelConfig, ChatContext)>>,
}

impl std::fmt::Debug for ScriptedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedGateway")
            .field("queued", &lock(&self.script).len())
            .field("requests", &lock(&self.requests).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedGateway {
    /// Create a gateway with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests the queue cannot serve with `handler`.
    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ModelConfig, &ChatContext) -> Result<ChatResponse> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Answer requests the queue cannot serve with a fixed text.
    #[must_use]
    pub fn with_fallback(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.with_handler(move |_, _| Ok(ChatResponse::text(text.clone())))
    }

    /// Queue a plain text response.
    pub fn push_text(&self, text: impl Into<String>) {
        lock(&self.script).push_back(Ok(ChatResponse::text(text)));
    }

    /// Queue a response naming tool calls.
    pub fn push_tool_calls(&self, content: impl Into<String>, calls: Vec<ToolCall>) {
        lock(&self.script).push_back(Ok(ChatResponse::with_tool_calls(content, calls)));
    }

    /// Queue an error.
    pub fn push_error(&self, error: GatewayError) {
        lock(&self.script).push_back(Err(error));
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<(ModelConfig, ChatContext)> {
        lock(&self.requests).clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn chat(&self, config: &ModelConfig, context: &ChatContext) -> Result<ChatResponse> {
        lock(&self.requests).push((config.clone(), context.clone()));

        let queued = lock(&self.script).pop_front();
        match (queued, &self.handler) {
            (Some(outcome), _) => outcome,
            (None, Some(handler)) => handler(config, context),
            (None, None) => Err(GatewayError::other("Scripted gateway has no response left")),
        }
    }
}
