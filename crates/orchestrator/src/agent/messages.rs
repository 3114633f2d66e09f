//! Messages for the agent actor.
//!
//! - Commands are fire-and-forget (`send_message`)
//! - Queries carry an `RpcReplyPort`
//! - Internal messages come back from the agent's own detached work and carry
//!   the run id they belong to; results for a stale run are dropped

use ractor::RpcReplyPort;
use serde_json::Value;

use super::state::{AgentSnapshot, AgentStatus};
use super::turn::IterationOutcome;
use crate::error::AgentError;
use crate::review::ReviewVerdict;

/// Reply to a blocking send: the run's final text.
pub type RunReply = RpcReplyPort<Result<String, AgentError>>;

/// Messages handled by the agent actor.
#[derive(Debug)]
pub enum AgentMessage {
    // COMMANDS
    /// Append user input and run the loop. With a reply port the caller waits
    /// for the run's outcome.
    Send {
        text: String,
        reply: Option<RunReply>,
    },

    /// Deliver an external notice. Folded into the transcript at the next
    /// iteration, or starts a run when idle.
    Notify { text: String },

    /// Attach a stored object so its text joins the system prompt.
    Attach { object_id: String },

    /// Detach a previously attached object.
    Detach { object_id: String },

    /// Write a memory entry.
    Remember { key: String, value: Value },

    /// Remove a memory entry.
    Forget { key: String },

    /// Run the loop again over the current transcript.
    Retry,

    /// Stop the agent.
    Stop { reason: Option<String> },

    // QUERIES
    /// Read a memory entry.
    Recall {
        key: String,
        reply: RpcReplyPort<Option<Value>>,
    },

    /// Current snapshot.
    GetSnapshot { reply: RpcReplyPort<AgentSnapshot> },

    // INTERNAL
    /// Streamed assistant content.
    Chunk { run_id: u64, text: String },

    /// Status change reported by the detached iteration.
    StatusUpdate { run_id: u64, status: AgentStatus },

    /// One iteration (gateway round trip plus tool calls) finished.
    IterationFinished {
        run_id: u64,
        outcome: IterationOutcome,
    },

    /// The review pass for a finished run returned.
    ReviewFinished {
        run_id: u64,
        goal_id: String,
        report: String,
        verdict: ReviewVerdict,
    },
}
