//! Agents: one actor per running agent, driven by a polymorphic config.

mod actor;
pub mod certify;
mod config;
mod messages;
mod state;
mod turn;

use std::sync::Arc;
use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};
use serde_json::Value;

pub use actor::{AgentActor, AgentArgs};
pub use config::{AgentConfig, ExecutionMode, ORCHESTRATOR_PROMPT, ToolPolicy, WORKER_PROMPT};
pub use messages::{AgentMessage, RunReply};
pub use state::{AgentSnapshot, AgentStatus, LastEntry, ToolRecord};
pub use turn::IterationOutcome;

use crate::error::AgentError;
use crate::registry::actor_name;
use crate::runtime::Runtime;

/// Limit for short queries (snapshot, recall).
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn an agent actor registered as `agent:<id>`.
pub async fn spawn(id: String, config: AgentConfig, runtime: Arc<Runtime>) -> Result<AgentHandle, AgentError> {
    let wait_timeout = runtime.config().agent.wait_timeout;
    let args = AgentArgs {
        id: id.clone(),
        config,
        runtime,
    };
    let (actor, _join) = Actor::spawn(Some(actor_name(&id)), AgentActor, args)
        .await
        .map_err(|e| AgentError::spawn_failed(e.to_string()))?;
    Ok(AgentHandle {
        id,
        actor,
        wait_timeout,
    })
}

/// Client-side handle to a running agent.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    id: String,
    actor: ActorRef<AgentMessage>,
    wait_timeout: Duration,
}

impl AgentHandle {
    /// Look up a live agent by id.
    pub fn find(runtime: &Runtime, id: &str) -> Option<Self> {
        runtime.registry().actor(id).map(|actor| Self {
            id: id.to_string(),
            actor,
            wait_timeout: runtime.config().agent.wait_timeout,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn actor(&self) -> &ActorRef<AgentMessage> {
        &self.actor
    }

    /// Override how long `send_and_wait` blocks.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    fn cast(&self, message: AgentMessage) -> Result<(), AgentError> {
        self.actor
            .send_message(message)
            .map_err(|_| AgentError::unavailable(&self.id))
    }

    /// Queue input without waiting.
    pub fn send(&self, text: impl Into<String>) -> Result<(), AgentError> {
        self.cast(AgentMessage::Send {
            text: text.into(),
            reply: None,
        })
    }

    /// Send input and block until the run finishes or the wait times out.
    pub async fn send_and_wait(&self, text: impl Into<String>) -> Result<String, AgentError> {
        let text = text.into();
        match self
            .actor
            .call(
                |reply| AgentMessage::Send {
                    text,
                    reply: Some(reply),
                },
                Some(self.wait_timeout),
            )
            .await
        {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => Err(AgentError::Timeout(self.wait_timeout)),
            Ok(CallResult::SenderError) | Err(_) => Err(AgentError::unavailable(&self.id)),
        }
    }

    pub fn notify(&self, text: impl Into<String>) -> Result<(), AgentError> {
        self.cast(AgentMessage::Notify { text: text.into() })
    }

    pub fn attach(&self, object_id: impl Into<String>) -> Result<(), AgentError> {
        self.cast(AgentMessage::Attach {
            object_id: object_id.into(),
        })
    }

    pub fn detach(&self, object_id: impl Into<String>) -> Result<(), AgentError> {
        self.cast(AgentMessage::Detach {
            object_id: object_id.into(),
        })
    }

    pub fn remember(&self, key: impl Into<String>, value: Value) -> Result<(), AgentError> {
        self.cast(AgentMessage::Remember {
            key: key.into(),
            value,
        })
    }

    pub fn forget(&self, key: impl Into<String>) -> Result<(), AgentError> {
        self.cast(AgentMessage::Forget { key: key.into() })
    }

    /// Re-run the loop over the current transcript.
    pub fn retry(&self) -> Result<(), AgentError> {
        self.cast(AgentMessage::Retry)
    }

    pub fn stop(&self, reason: Option<String>) -> Result<(), AgentError> {
        self.cast(AgentMessage::Stop { reason })
    }

    pub async fn recall(&self, key: impl Into<String>) -> Result<Option<Value>, AgentError> {
        let key = key.into();
        self.query(|reply| AgentMessage::Recall { key, reply }).await
    }

    /// Current state, straight from the actor.
    pub async fn snapshot(&self) -> Result<AgentSnapshot, AgentError> {
        self.query(|reply| AgentMessage::GetSnapshot { reply }).await
    }

    async fn query<T, F>(&self, msg: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(ractor::RpcReplyPort<T>) -> AgentMessage,
    {
        match self.actor.call(msg, Some(QUERY_TIMEOUT)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(AgentError::Timeout(QUERY_TIMEOUT)),
            Ok(CallResult::SenderError) | Err(_) => Err(AgentError::unavailable(&self.id)),
        }
    }
}
