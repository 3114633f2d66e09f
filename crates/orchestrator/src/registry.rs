//! Live agents: process lookup plus the status side table.
//!
//! Agents are found through the actor registry by name. Their latest
//! snapshot lives in a sharded map where each row is written only by the
//! owning actor, so readers never go through a mailbox.

use dashmap::DashMap;
use ractor::ActorRef;
use tracing::debug;

use crate::agent::{AgentMessage, AgentSnapshot};

/// Registry name of an agent actor.
pub fn actor_name(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    table: DashMap<String, AgentSnapshot>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The running actor for an agent id.
    pub fn actor(&self, agent_id: &str) -> Option<ActorRef<AgentMessage>> {
        ractor::registry::where_is(actor_name(agent_id)).map(ActorRef::from)
    }

    /// Whether an actor answers to this id.
    pub fn is_alive(&self, agent_id: &str) -> bool {
        self.actor(agent_id).is_some()
    }

    /// Replace an agent's row. Called only by the owning actor.
    pub fn publish(&self, snapshot: AgentSnapshot) {
        self.table.insert(snapshot.id.clone(), snapshot);
    }

    /// Latest snapshot of an agent.
    pub fn snapshot(&self, agent_id: &str) -> Option<AgentSnapshot> {
        self.table.get(agent_id).map(|row| row.clone())
    }

    /// Drop an agent's row.
    pub fn remove(&self, agent_id: &str) {
        self.table.remove(agent_id);
    }

    /// Snapshots of agents whose actor is still running.
    pub fn live_agents(&self) -> Vec<AgentSnapshot> {
        self.table
            .iter()
            .filter(|row| self.is_alive(row.key()))
            .map(|row| row.value().clone())
            .collect()
    }

    /// Live agents bound to a project.
    pub fn agents_for_project(&self, project_id: &str) -> Vec<AgentSnapshot> {
        self.live_agents()
            .into_iter()
            .filter(|s| s.project_id() == Some(project_id))
            .collect()
    }

    /// Queue user input for an agent. Returns false when it is not running.
    pub fn send(&self, agent_id: &str, text: String) -> bool {
        self.deliver(agent_id, AgentMessage::Send { text, reply: None })
    }

    /// Deliver a notification. Returns false when the agent is not running.
    pub fn notify(&self, agent_id: &str, text: String) -> bool {
        self.deliver(agent_id, AgentMessage::Notify { text })
    }

    fn deliver(&self, agent_id: &str, message: AgentMessage) -> bool {
        match self.actor(agent_id) {
            Some(actor) => actor.send_message(message).is_ok(),
            None => {
                debug!(agent_id = %agent_id, "No live agent to deliver to");
                false
            }
        }
    }
}
