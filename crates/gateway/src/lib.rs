#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # orchid-gateway
//!
//! Provider-agnostic LLM gateway for Orchid.
//!
//! Agents talk to every model through [`LlmGateway`]: a single `chat` call
//! returning the next assistant turn, and `chat_stream` which also reports
//! content deltas as they arrive. Errors form a closed set
//! ([`GatewayError`]) so callers can decide on retries without knowing the
//! provider.
//!
//! ## Example
//!
//! ```ignore
//! use orchid_gateway::{ChatContext, ChatMessage, GatewayConfig, ModelConfig, Provider, ProviderRouter};
//!
//! let router = ProviderRouter::from_config(&GatewayConfig::default())?;
//! let context = ChatContext::new("You are a worker.", vec![ChatMessage::user("hello")]);
//! let reply = chat_with_retry(&router, &ModelConfig::new(Provider::Ollama, "qwen3"), &context,
//!     &RetryPolicy::default(), None, |_| {}).await?;
//! ```

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod retry;
pub mod router;
pub mod sse;
pub mod types;
mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod scripted;

pub use bridge::BridgeGateway;
pub use client::{HttpGateway, LlmGateway};
pub use config::{GatewayConfig, duration_secs};
pub use error::{GatewayError, Result, TRANSIENT_STATUSES};
pub use retry::{RetryNotice, RetryPolicy, calculate_backoff, chat_with_retry};
pub use router::ProviderRouter;
#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedGateway;
pub use types::{
    ChatContext, ChatMessage, ChatResponse, ModelConfig, Provider, Role, ToolCall, ToolSpec,
};
