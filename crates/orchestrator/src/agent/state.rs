//! Agent status and the snapshot published to the side table.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchid_gateway::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::AgentConfig;

/// What an agent is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    ExecutingTool { names: Vec<String> },
    Retrying { attempt: u32, max: u32, code: String },
    Custom { label: String },
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Thinking => write!(f, "thinking"),
            Self::ExecutingTool { names } => write!(f, "executing_tool({})", names.join(", ")),
            Self::Retrying { attempt, max, code } => write!(f, "retrying({attempt}/{max}, {code})"),
            Self::Custom { label } => write!(f, "{label}"),
        }
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub tool: String,
    pub args: Value,
    pub result: String,
    pub ok: bool,
    pub timestamp: DateTime<Utc>,
}

/// Read-only copy of an agent's state.
///
/// Only the owning actor writes its row; collections are persistent so a
/// snapshot is cheap to take and to clone.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub id: String,
    pub config: Arc<AgentConfig>,
    pub status: AgentStatus,
    pub messages: im::Vector<ChatMessage>,
    pub tool_history: im::Vector<ToolRecord>,
    pub memory: im::OrdMap<String, Value>,
    pub attached: im::OrdSet<String>,
    /// Assistant content streamed so far in the current turn.
    pub partial: String,
    /// A run is in flight.
    pub running: bool,
    pub updated_at: DateTime<Utc>,
}

/// How the transcript ends, as seen by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastEntry {
    Empty,
    /// A user, tool or notification entry nobody has answered.
    Unanswered,
    /// An assistant entry with no text.
    EmptyOutput,
    /// The agent's own text output.
    Output(String),
}

impl AgentSnapshot {
    /// Idle with no run in flight.
    pub fn is_idle(&self) -> bool {
        !self.running && self.status == AgentStatus::Idle
    }

    pub fn project_id(&self) -> Option<&str> {
        self.config.project_id.as_deref()
    }

    /// Classify the final transcript entry.
    pub fn last_entry(&self) -> LastEntry {
        match self.messages.last() {
            None => LastEntry::Empty,
            Some(message) if message.role != Role::Assistant => LastEntry::Unanswered,
            Some(message) if message.content.trim().is_empty() => LastEntry::EmptyOutput,
            Some(message) => LastEntry::Output(message.content.clone()),
        }
    }

    /// Most recent assistant text, if any.
    pub fn last_output(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.clone())
    }
}
