//! Shared services wired together once per process.
//!
//! Every actor holds an `Arc<Runtime>`: the store and its typed views, the
//! agent registry, the LLM gateway, the tool dispatcher, the sandbox manager
//! and the review passes.

use std::fmt;
use std::sync::Arc;

use orchid_core::{Error, Result, ResultExt};
use orchid_gateway::{LlmGateway, ModelConfig, ProviderRouter, RetryPolicy};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{self, AgentConfig, AgentHandle, ORCHESTRATOR_PROMPT};
use crate::config::OrchestratorConfig;
use crate::error::AgentError;
use crate::goals::GoalGraph;
use crate::projects::{Project, ProjectStore};
use crate::registry::AgentRegistry;
use crate::review::{Reviewer, Summarizer};
use crate::sandbox::{ContainerRuntime, SandboxManager, SandboxPaths};
use crate::store::{InMemoryStore, ObjectKind, ObjectStore};
use crate::tools::{BuiltinTools, ToolDispatcher};

pub struct Runtime {
    config: OrchestratorConfig,
    store: Arc<dyn ObjectStore>,
    goals: GoalGraph,
    projects: ProjectStore,
    registry: Arc<AgentRegistry>,
    gateway: Arc<dyn LlmGateway>,
    tools: Arc<dyn ToolDispatcher>,
    sandboxes: Option<Arc<SandboxManager>>,
    reviewer: Reviewer,
    summarizer: Summarizer,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("data_dir", &self.config.data_dir)
            .field("sandboxes", &self.sandboxes.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn builder(config: OrchestratorConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn goals(&self) -> &GoalGraph {
        &self.goals
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<dyn LlmGateway> {
        &self.gateway
    }

    pub fn tools(&self) -> &Arc<dyn ToolDispatcher> {
        &self.tools
    }

    /// `None` when sandboxes are disabled.
    pub fn sandboxes(&self) -> Option<&Arc<SandboxManager>> {
        self.sandboxes.as_ref()
    }

    pub fn reviewer(&self) -> &Reviewer {
        &self.reviewer
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    /// Model selection from the agent defaults.
    pub fn default_model(&self) -> ModelConfig {
        ModelConfig::new(self.config.agent.provider, self.config.agent.model.clone())
    }

    /// Apply the configured iteration cap and streaming flag.
    fn with_agent_defaults(&self, config: AgentConfig) -> AgentConfig {
        config
            .with_max_iterations(self.config.agent.max_iterations)
            .with_stream(self.config.agent.stream)
    }

    /// Spawn an agent under a fresh id.
    pub async fn spawn_agent(self: &Arc<Self>, config: AgentConfig) -> std::result::Result<AgentHandle, AgentError> {
        let id = Uuid::new_v4().to_string();
        agent::spawn(id, config, Arc::clone(self)).await
    }

    /// Spawn a worker and hand it one goal.
    ///
    /// `creator` receives the worker's termination notice.
    pub async fn spawn_worker(
        self: &Arc<Self>,
        project_id: &str,
        goal_id: &str,
        creator: Option<String>,
    ) -> std::result::Result<AgentHandle, AgentError> {
        let mut config = self.with_agent_defaults(AgentConfig::worker(project_id, self.default_model()));
        if let Some(creator) = creator {
            config = config.with_creator(creator);
        }

        let handle = self.spawn_agent(config).await?;
        if let Err(e) = self.goals.assign_to_agent(goal_id, handle.id()).await {
            let _ = handle.stop(Some("assignment failed".to_string()));
            return Err(e.into());
        }
        info!(project_id = %project_id, goal_id = %goal_id, agent_id = %handle.id(), "Worker spawned");
        Ok(handle)
    }

    /// Spawn one orchestrator holding `goal_ids`.
    ///
    /// Its system prompt is the stored template named by the watcher
    /// settings, or the built-in prompt when there is none.
    pub async fn spawn_orchestrator(
        self: &Arc<Self>,
        project_id: &str,
        goal_ids: &[String],
    ) -> std::result::Result<AgentHandle, AgentError> {
        let prompt = self.orchestrator_prompt().await;
        let config = self.with_agent_defaults(AgentConfig::orchestrator(
            project_id,
            self.default_model(),
            prompt,
        ));
        let handle = self.spawn_agent(config).await?;

        let mut text = String::from("You are responsible for these goals:\n");
        for goal_id in goal_ids {
            match self.goals.set_assignment(goal_id, handle.id()).await {
                Ok(goal) => text.push_str(&format!("- {} ({})\n", goal.name, goal.id)),
                Err(e) => warn!(goal_id = %goal_id, error = %e, "Failed to assign goal to orchestrator"),
            }
        }
        text.push_str("\nPlan the work, create sub-goals where useful, assign them to workers and complete each goal once its work is verified.");
        handle.send(text)?;

        info!(
            project_id = %project_id,
            agent_id = %handle.id(),
            goals = goal_ids.len(),
            "Orchestrator spawned"
        );
        Ok(handle)
    }

    async fn orchestrator_prompt(&self) -> String {
        let title = &self.config.watcher.orchestrator_template;
        self.store
            .list(ObjectKind::Template)
            .await
            .or_default_logged(Vec::new())
            .into_iter()
            .find(|t| &t.title == title)
            .map_or_else(|| ORCHESTRATOR_PROMPT.to_string(), |t| t.content)
    }

    /// Create a project and its files directory.
    pub async fn create_project(&self, name: &str) -> Result<Project> {
        let project = self.projects.create(name).await?;
        let files = SandboxPaths::project_files(&self.config.data_dir, &project.id);
        tokio::fs::create_dir_all(&files)
            .await
            .map_err(|e| Error::directory_creation_failed(&files, e.to_string()))?;
        Ok(project)
    }

    /// Stop the project's agents, then delete its goals, sandbox and record.
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        self.projects.get(project_id).await?;

        for snapshot in self.registry.agents_for_project(project_id) {
            if let Some(handle) = AgentHandle::find(self, &snapshot.id) {
                let _ = handle.stop(Some("project deleted".to_string()));
            }
        }

        for goal in self.goals.list(project_id).await? {
            match self.goals.delete(&goal.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if let Some(sandboxes) = &self.sandboxes {
            if let Err(e) = sandboxes.destroy(project_id).await {
                warn!(project_id = %project_id, error = %e, "Failed to destroy sandbox");
            }
        }

        self.projects.delete(project_id).await?;
        info!(project_id = %project_id, "Project deleted");
        Ok(())
    }

    /// Stop every agent and sandbox.
    pub async fn shutdown(&self) {
        for snapshot in self.registry.live_agents() {
            if let Some(handle) = AgentHandle::find(self, &snapshot.id) {
                let _ = handle.stop(Some("shutdown".to_string()));
            }
        }
        if let Some(sandboxes) = &self.sandboxes {
            sandboxes.stop_all().await;
        }
        info!("Runtime shut down");
    }
}

/// Builds a [`Runtime`], defaulting every collaborator from the config.
pub struct RuntimeBuilder {
    config: OrchestratorConfig,
    store: Option<Arc<dyn ObjectStore>>,
    gateway: Option<Arc<dyn LlmGateway>>,
    container_runtime: Option<Arc<dyn ContainerRuntime>>,
    tools: Option<Arc<dyn ToolDispatcher>>,
}

impl RuntimeBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            store: None,
            gateway: None,
            container_runtime: None,
            tools: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn with_container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.container_runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolDispatcher>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn build(self) -> Result<Arc<Runtime>> {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn ObjectStore>);
        let gateway: Arc<dyn LlmGateway> = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(
                ProviderRouter::from_config(&config.gateway)
                    .map_err(|e| Error::config(format!("gateway: {e}")))?,
            ),
        };

        let registry = Arc::new(AgentRegistry::new());
        let goals = GoalGraph::new(Arc::clone(&store), Arc::clone(&registry))
            .with_excerpt_chars(config.review.report_excerpt);

        let sandboxes = config.sandbox.enabled.then(|| {
            let manager = match self.container_runtime {
                Some(runtime) => SandboxManager::new(config.data_dir.clone(), config.sandbox.clone(), runtime),
                None => SandboxManager::from_settings(config.data_dir.clone(), config.sandbox.clone()),
            };
            Arc::new(manager)
        });

        let review_model = ModelConfig::new(
            config.agent.provider,
            config.review.model.clone().unwrap_or_else(|| config.agent.model.clone()),
        );
        let review_policy = RetryPolicy {
            max_attempts: config.review.max_attempts,
            ..config.gateway.retry
        };
        let reviewer = Reviewer::new(Arc::clone(&gateway), review_model.clone(), review_policy);
        let summarizer = Summarizer::new(Arc::clone(&gateway), review_model);

        info!(
            data_dir = %config.data_dir.display(),
            sandbox = config.sandbox.enabled,
            model = %config.agent.model,
            "Runtime ready"
        );

        Ok(Arc::new(Runtime {
            projects: ProjectStore::new(Arc::clone(&store)),
            tools: self
                .tools
                .unwrap_or_else(|| Arc::new(BuiltinTools) as Arc<dyn ToolDispatcher>),
            config,
            store,
            goals,
            registry,
            gateway,
            sandboxes,
            reviewer,
            summarizer,
        }))
    }
}
