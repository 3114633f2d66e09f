//! OpenAI-compatible chat completion wire format.
//!
//! Requests are built as JSON values; responses are decoded into the
//! provider-agnostic [`ChatResponse`].

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::types::{ChatContext, ChatMessage, ChatResponse, ModelConfig, Role, ToolCall};

/// Build the request body for one chat completion.
pub fn build_request(config: &ModelConfig, context: &ChatContext, stream: bool) -> Value {
    let mut messages = Vec::with_capacity(context.messages.len() + 1);

    let system = context.composed_system_prompt();
    if !system.trim().is_empty() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(context.messages.iter().map(encode_message));

    let mut body = json!({
        "model": config.model,
        "messages": messages,
        "stream": stream,
    });

    if !context.tools.is_empty() {
        body["tools"] = context
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    if let Some(temperature) = config.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = config.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    body
}

fn encode_message(message: &ChatMessage) -> Value {
    match message.role {
        Role::User => json!({ "role": "user", "content": message.content }),
        Role::Notification => json!({
            "role": "user",
            "content": format!("[notification] {}", message.content),
        }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        Role::Assistant => {
            let mut value = json!({ "role": "assistant", "content": message.content });
            if let Some(calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                value["tool_calls"] = calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            value
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Decode a non-streaming response body.
pub fn decode_response(body: &str) -> Result<ChatResponse> {
    let wire: WireResponse = serde_json::from_str(body)?;
    let Some(choice) = wire.choices.into_iter().next() else {
        return Err(GatewayError::EmptyResponse);
    };

    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            ToolCall::new(
                call.id.unwrap_or_else(|| format!("call_{index}")),
                call.function.name,
                decode_arguments(call.function.arguments),
            )
        })
        .collect();
    let content = choice.message.content.unwrap_or_default();

    finish_response(content, calls)
}

/// Reject turns with neither text nor tool calls.
pub fn finish_response(content: String, calls: Vec<ToolCall>) -> Result<ChatResponse> {
    if calls.is_empty() {
        if content.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        return Ok(ChatResponse::text(content));
    }
    Ok(ChatResponse::with_tool_calls(content, calls))
}

/// Arguments arrive as a JSON-encoded string (OpenAI) or as an object (Ollama).
pub fn decode_arguments(raw: Value) -> Value {
    match raw {
        Value::String(text) if text.trim().is_empty() => json!({}),
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Value::Null => json!({}),
        other => other,
    }
}
