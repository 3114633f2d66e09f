//! Server-Sent Events parsing for streamed chat completions.
//!
//! The accumulator is fed raw body bytes as they arrive. Complete `data:`
//! lines are decoded; content deltas are handed back to the caller and tool
//! call fragments are merged by index until the stream ends.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::types::{ChatResponse, ToolCall};
use crate::wire::{decode_arguments, finish_response};

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallFragment>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incrementally assembles a [`ChatResponse`] from an SSE body.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: Vec<u8>,
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    done: bool,
}

impl StreamAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of body bytes, returning the content deltas it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = self.process_line(line.trim_end())? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    /// Whether the `[DONE]` marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Content accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    fn process_line(&mut self, line: &str) -> Result<Option<String>> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() || self.done {
            return Ok(None);
        }

        let event: StreamEvent = serde_json::from_str(data)
            .map_err(|e| GatewayError::other(format!("Malformed stream event: {e}")))?;

        let mut delta_text = String::new();
        for choice in event.choices {
            if let Some(content) = choice.delta.content {
                delta_text.push_str(&content);
            }
            for fragment in choice.delta.tool_calls {
                self.merge_fragment(fragment);
            }
        }

        if delta_text.is_empty() {
            return Ok(None);
        }
        self.content.push_str(&delta_text);
        Ok(Some(delta_text))
    }

    fn merge_fragment(&mut self, fragment: ToolCallFragment) {
        let entry = self.tool_calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            entry.id = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                entry.name.push_str(&name);
            }
            match function.arguments {
                Some(Value::String(part)) => entry.arguments.push_str(&part),
                Some(Value::Null) | None => {}
                Some(other) => entry.arguments = other.to_string(),
            }
        }
    }

    /// Finish the stream and build the response.
    pub fn finish(mut self) -> Result<ChatResponse> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.process_line(line.trim_end())?;
        }
        if !self.done {
            debug!("Stream ended without [DONE] marker");
        }

        let calls = self
            .tool_calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, decode_arguments(Value::String(call.arguments)))
            })
            .collect();

        finish_response(self.content, calls)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn should_emit_content_deltas_across_split_chunks() {
        let mut acc = StreamAccumulator::new();
        let first = acc
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi")
            .unwrap();
        let second = acc
            .push(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n")
            .unwrap();

        assert_eq!(first, vec!["Hel".to_string()]);
        assert_eq!(second, vec!["lo".to_string()]);
        assert!(acc.is_done());
        assert_eq!(acc.finish().unwrap(), ChatResponse::text("Hello"));
    }

    #[test]
    fn should_merge_tool_call_fragments_by_index() {
        let mut acc = StreamAccumulator::new();
        let events = [
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read_file","arguments":"{\"pa"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a.rs\"}"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"name":"list_files","arguments":""}}]}}]}),
        ];
        for event in events {
            acc.push(format!("data: {event}\n").as_bytes()).unwrap();
        }

        let response = acc.finish().unwrap();
        let calls = response.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments, json!({"path": "a.rs"}));
        assert_eq!(calls[1].id, "call_1");
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn should_report_empty_stream_as_empty_response() {
        let mut acc = StreamAccumulator::new();
        acc.push(b": keep-alive\n\ndata: [DONE]\n").unwrap();
        assert_eq!(acc.finish(), Err(GatewayError::EmptyResponse));
    }

    #[test]
    fn should_reject_malformed_events() {
        let mut acc = StreamAccumulator::new();
        assert!(acc.push(b"data: {not json}\n").is_err());
    }
}
