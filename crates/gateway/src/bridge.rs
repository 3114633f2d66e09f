//! Gateway backed by a long-lived subprocess speaking JSON lines.
//!
//! Each query is one line on the bridge's stdin:
//! `{"action":"query","prompt":..,"system_prompt":..,"max_turns":..}`.
//! The bridge answers with `text`, `tool_use`, `result` and `error` lines and
//! ends with `done`. The bridge runs its own tools, so every bridge turn is
//! terminal from the caller's point of view.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::LlmGateway;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::types::{ChatContext, ChatResponse, ModelConfig, Role};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Text {
        #[serde(default)]
        content: String,
    },
    ToolUse {
        #[serde(default)]
        tool_use: serde_json::Value,
    },
    Result {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        turns: Option<u32>,
    },
    Error {
        #[serde(default)]
        content: String,
    },
    Pong,
    Done,
}

const fn default_success() -> bool {
    true
}

struct BridgeProcess {
    // Held so the child is reaped with the handle.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl BridgeProcess {
    fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| GatewayError::other("Bridge command is empty"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::other(format!("Failed to spawn bridge: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::other("Failed to capture bridge stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::other("Failed to capture bridge stdout"))?;

        info!(program = %program, "Started gateway bridge");
        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn send(&mut self, command: &serde_json::Value) -> Result<()> {
        let mut line = command.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<BridgeEvent> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| GatewayError::other("Bridge closed its output"))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BridgeEvent>(&line) {
                Ok(event) => return Ok(event),
                Err(e) => debug!(line = %line, error = %e, "Skipping unrecognised bridge line"),
            }
        }
    }
}

/// Gateway that forwards turns to a subprocess bridge.
///
/// Queries are serialized over the single process. A failed process is
/// dropped and respawned on the next call.
pub struct BridgeGateway {
    config: Arc<GatewayConfig>,
    process: Mutex<Option<BridgeProcess>>,
}

impl std::fmt::Debug for BridgeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeGateway")
            .field("command", &self.config.bridge_command)
            .finish_non_exhaustive()
    }
}

impl BridgeGateway {
    /// Create a bridge gateway. The process starts on first use.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            process: Mutex::new(None),
        }
    }

    /// Check the bridge answers a ping.
    pub async fn ping(&self) -> Result<()> {
        let mut guard = self.process.lock().await;
        let outcome = tokio::time::timeout(self.config.timeout, async {
            let process = ensure_process(&mut guard, &self.config.bridge_command)?;
            process.send(&json!({ "action": "ping" })).await?;
            match process.next_event().await? {
                BridgeEvent::Pong => Ok(()),
                other => Err(GatewayError::other(format!("Unexpected ping reply: {other:?}"))),
            }
        })
        .await
        .unwrap_or_else(|_| Err(GatewayError::other("Bridge ping timed out")));

        if outcome.is_err() {
            *guard = None;
        }
        outcome
    }

    async fn query(&self, context: &ChatContext) -> Result<ChatResponse> {
        let command = json!({
            "action": "query",
            "prompt": render_transcript(context),
            "system_prompt": context.composed_system_prompt(),
            "max_turns": self.config.bridge_max_turns,
        });

        let mut guard = self.process.lock().await;
        let outcome = tokio::time::timeout(self.config.timeout, async {
            let process = ensure_process(&mut guard, &self.config.bridge_command)?;
            process.send(&command).await?;
            collect_reply(process).await
        })
        .await
        .unwrap_or_else(|_| Err(GatewayError::other("Bridge query timed out")));

        // A process that failed mid-conversation may have unread output.
        if matches!(outcome, Err(GatewayError::Other(_))) {
            *guard = None;
        }
        outcome
    }
}

fn ensure_process<'a>(
    slot: &'a mut Option<BridgeProcess>,
    command: &[String],
) -> Result<&'a mut BridgeProcess> {
    if slot.is_none() {
        *slot = Some(BridgeProcess::spawn(command)?);
    }
    slot.as_mut()
        .ok_or_else(|| GatewayError::other("Bridge process unavailable"))
}

async fn collect_reply(process: &mut BridgeProcess) -> Result<ChatResponse> {
    let mut blocks: Vec<String> = Vec::new();
    let mut failed = false;
    let mut error: Option<String> = None;

    loop {
        match process.next_event().await? {
            BridgeEvent::Text { content } => blocks.push(content),
            BridgeEvent::ToolUse { tool_use } => {
                debug!(tool = %tool_use.get("name").and_then(|n| n.as_str()).unwrap_or("?"), "Bridge ran a tool");
            }
            BridgeEvent::Result { success, turns } => {
                debug!(success, turns = ?turns, "Bridge query finished");
                failed = !success;
            }
            BridgeEvent::Error { content } => error = Some(content),
            BridgeEvent::Pong => {}
            BridgeEvent::Done => break,
        }
        // Errors are terminal for the query; the bridge still writes no `done` after them.
        if error.is_some() {
            break;
        }
    }

    if let Some(reason) = error {
        warn!(reason = %reason, "Bridge reported an error");
        return Err(GatewayError::api(502, reason));
    }

    let content = blocks.join("\n");
    if failed {
        return Err(GatewayError::other(if content.is_empty() {
            "Bridge reported an unsuccessful result".to_string()
        } else {
            format!("Bridge reported an unsuccessful result: {content}")
        }));
    }
    if content.trim().is_empty() {
        return Err(GatewayError::EmptyResponse);
    }
    Ok(ChatResponse::text(content))
}

/// Flatten the transcript into the single prompt the bridge accepts.
fn render_transcript(context: &ChatContext) -> String {
    context
        .messages
        .iter()
        .map(|message| match message.role {
            Role::User => message.content.clone(),
            Role::Notification => format!("[notification] {}", message.content),
            Role::Assistant => format!("Assistant: {}", message.content),
            Role::Tool => format!("Tool result: {}", message.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl LlmGateway for BridgeGateway {
    async fn chat(&self, config: &ModelConfig, context: &ChatContext) -> Result<ChatResponse> {
        debug!(model = %config.model, "Forwarding turn to bridge");
        self.query(context).await
    }
}
