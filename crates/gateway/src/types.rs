//! Provider-agnostic message and tool schema.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    /// Externally delivered notice folded into the conversation.
    Notification,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
            Self::Notification => write!(f, "notification"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Decoded JSON arguments.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For `Role::Tool` entries, the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant message with optional tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            tool_calls: tool_calls.filter(|calls| !calls.is_empty()),
            ..Self::new(Role::Assistant, content)
        }
    }

    /// The result of one tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// A notification delivered from outside the agent's own loop.
    pub fn notification(content: impl Into<String>) -> Self {
        Self::new(Role::Notification, content)
    }

    /// Whether this message names at least one tool call.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    /// Create a tool specification.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Which backend serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Any OpenAI-compatible chat completions endpoint.
    #[default]
    OpenAi,
    /// Ollama, through its OpenAI-compatible endpoint.
    Ollama,
    /// A local subprocess bridge speaking JSON lines.
    Bridge,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Ollama => write!(f, "ollama"),
            Self::Bridge => write!(f, "bridge"),
        }
    }
}

/// Model selection for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: Provider,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    /// Create a model config for a provider.
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Everything the model sees for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    pub system_prompt: String,
    /// Serialized text of the objects attached to the agent.
    #[serde(default)]
    pub attachments: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub memory: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl ChatContext {
    /// Create a context with a system prompt and a transcript.
    pub fn new(system_prompt: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            ..Self::default()
        }
    }

    /// System prompt with attachments and memory appended as sections.
    #[must_use]
    pub fn composed_system_prompt(&self) -> String {
        let mut prompt = self.system_prompt.clone();
        if !self.attachments.trim().is_empty() {
            prompt.push_str("\n\n## Attached objects\n\n");
            prompt.push_str(&self.attachments);
        }
        if !self.memory.is_empty() {
            prompt.push_str("\n\n## Memory\n\n");
            for (key, value) in &self.memory {
                let rendered = value
                    .as_str()
                    .map_or_else(|| value.to_string(), str::to_string);
                prompt.push_str(&format!("- {key}: {rendered}\n"));
            }
        }
        prompt
    }
}

/// The next assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatResponse {
    /// A plain text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: None,
        }
    }

    /// A response naming tool calls.
    pub fn with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Some(calls),
        }
    }

    /// Tool calls named by this turn, empty when terminal.
    #[must_use]
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Convert into a transcript entry.
    #[must_use]
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant(self.content, self.tool_calls)
    }
}
