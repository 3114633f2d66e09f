//! One polymorphic agent configuration interpreted by a single loop.

use std::collections::BTreeSet;
use std::path::PathBuf;

use orchid_gateway::{ModelConfig, Provider};
use serde::{Deserialize, Serialize};

use crate::tools::names;

/// Which tools an agent may call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tools", rename_all = "lowercase")]
pub enum ToolPolicy {
    /// File, shell and memory tools.
    Worker,
    /// Worker tools plus goal management and messaging.
    Orchestrator,
    /// An explicit allow-list.
    Custom(BTreeSet<String>),
}

impl ToolPolicy {
    /// Tool names this policy allows.
    pub fn allowed(&self) -> BTreeSet<String> {
        match self {
            Self::Worker => names::WORKER.iter().map(|n| (*n).to_string()).collect(),
            Self::Orchestrator => names::WORKER
                .iter()
                .chain(names::ORCHESTRATOR)
                .map(|n| (*n).to_string())
                .collect(),
            Self::Custom(names) => names.clone(),
        }
    }

    /// Whether `name` may be called.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::Worker => names::WORKER.contains(&name),
            Self::Orchestrator => names::WORKER.contains(&name) || names::ORCHESTRATOR.contains(&name),
            Self::Custom(names) => names.contains(name),
        }
    }

    /// Whether the policy can close goals through structured tools.
    pub fn can_complete_goals(&self) -> bool {
        self.allows(names::COMPLETE_GOAL)
    }
}

/// Where an agent's file and shell tools run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionMode {
    /// The project sandbox when one is active, else the project files.
    #[default]
    Sandbox,
    /// Directly in a host directory.
    Host { workdir: PathBuf },
}

/// Configuration of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Project this agent works in.
    #[serde(default)]
    pub project_id: Option<String>,
    pub tools: ToolPolicy,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Agent that receives this agent's termination notice.
    #[serde(default)]
    pub creator: Option<String>,
    /// Use the streaming endpoint.
    #[serde(default)]
    pub stream: bool,
}

const fn default_max_iterations() -> u32 {
    10
}

impl AgentConfig {
    /// A worker bound to a project.
    pub fn worker(project_id: impl Into<String>, model: ModelConfig) -> Self {
        Self {
            provider: model.provider,
            model: model.model,
            system_prompt: WORKER_PROMPT.to_string(),
            project_id: Some(project_id.into()),
            tools: ToolPolicy::Worker,
            execution: ExecutionMode::Sandbox,
            max_iterations: default_max_iterations(),
            creator: None,
            stream: false,
        }
    }

    /// An orchestrator for a project.
    pub fn orchestrator(
        project_id: impl Into<String>,
        model: ModelConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            tools: ToolPolicy::Orchestrator,
            ..Self::worker(project_id, model)
        }
    }

    /// Set the creator.
    #[must_use]
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the execution mode.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Enable or disable streaming.
    #[must_use]
    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Model selection for gateway calls.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.provider, self.model.clone())
    }

    /// A project-bound agent without goal-management tools. Workers stop
    /// after every run and cannot self-report completion.
    pub fn is_worker(&self) -> bool {
        self.project_id.is_some() && !self.tools.can_complete_goals()
    }
}

/// Default system prompt for workers.
pub const WORKER_PROMPT: &str = "You are a coding agent working on one goal in a project workspace. \
Use the tools to inspect and change files and to run builds and tests. \
Make the change, verify it, then answer with a short report of what you did.";

/// Default system prompt for orchestrators when no template is stored.
pub const ORCHESTRATOR_PROMPT: &str = "You coordinate work on a project. \
Break goals into sub-goals with create_goal, order them with add_dependency, \
hand them to workers with assign_goal and close them with complete_goal once their reports are satisfactory.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_restrict_workers_to_worker_tools() {
        let policy = ToolPolicy::Worker;
        assert!(policy.allows("shell"));
        assert!(policy.allows("edit_file"));
        assert!(!policy.allows("create_goal"));
        assert!(!policy.can_complete_goals());
    }

    #[test]
    fn should_give_orchestrators_goal_tools() {
        let policy = ToolPolicy::Orchestrator;
        assert!(policy.allows("complete_goal"));
        assert!(policy.allows("read_file"));
        assert_eq!(policy.allowed().len(), names::WORKER.len() + names::ORCHESTRATOR.len());
    }

    #[test]
    fn should_honour_custom_allow_lists() {
        let policy = ToolPolicy::Custom(BTreeSet::from(["read_file".to_string()]));
        assert!(policy.allows("read_file"));
        assert!(!policy.allows("shell"));
    }

    #[test]
    fn should_classify_workers() {
        let model = ModelConfig::new(Provider::Ollama, "m");
        assert!(AgentConfig::worker("p", model.clone()).is_worker());
        assert!(!AgentConfig::orchestrator("p", model.clone(), "x").is_worker());

        let mut unbound = AgentConfig::worker("p", model);
        unbound.project_id = None;
        assert!(!unbound.is_worker());
    }
}
