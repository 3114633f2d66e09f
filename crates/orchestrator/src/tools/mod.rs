//! LLM-visible tools.
//!
//! A call outside the agent's allow-list is answered with an error result and
//! never executes. File and shell tools run against a [`Workspace`]: the
//! project sandbox when the agent is bound to one, else a host directory.
//! Tools never touch agent state directly; memory changes come back as
//! [`ToolEffect`]s for the actor to apply.

mod builtin;
mod specs;
mod workspace;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchid_gateway::{ToolCall, ToolSpec};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub use builtin::BuiltinTools;
pub use specs::{spec_for, specs_for};
pub use workspace::Workspace;

use crate::agent::{AgentConfig, ToolPolicy};
use crate::runtime::Runtime;
use crate::sandbox::SandboxError;

/// Tool names.
pub mod names {
    pub const SHELL: &str = "shell";
    pub const READ_FILE: &str = "read_file";
    pub const WRITE_FILE: &str = "write_file";
    pub const EDIT_FILE: &str = "edit_file";
    pub const LIST_FILES: &str = "list_files";
    pub const GREP_FILES: &str = "grep_files";
    pub const REMEMBER: &str = "remember";
    pub const RECALL: &str = "recall";
    pub const CREATE_GOAL: &str = "create_goal";
    pub const LIST_GOALS: &str = "list_goals";
    pub const ADD_DEPENDENCY: &str = "add_dependency";
    pub const ASSIGN_GOAL: &str = "assign_goal";
    pub const COMPLETE_GOAL: &str = "complete_goal";
    pub const SEND_MESSAGE: &str = "send_message";

    /// Redirected to the sandbox when one is active.
    pub const SANDBOXED: &[&str] = &[SHELL, READ_FILE, WRITE_FILE, EDIT_FILE, LIST_FILES, GREP_FILES];

    /// Tools every worker gets.
    pub const WORKER: &[&str] = &[
        SHELL, READ_FILE, WRITE_FILE, EDIT_FILE, LIST_FILES, GREP_FILES, REMEMBER, RECALL,
    ];

    /// Goal management and messaging.
    pub const ORCHESTRATOR: &[&str] = &[
        CREATE_GOAL,
        LIST_GOALS,
        ADD_DEPENDENCY,
        ASSIGN_GOAL,
        COMPLETE_GOAL,
        SEND_MESSAGE,
    ];

    /// Calls that count as a file change.
    pub const FILE_EDITS: &[&str] = &[WRITE_FILE, EDIT_FILE];
}

/// Why a tool call failed. Rendered into the tool result the model sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool {0} is not allowed for this agent")]
    NotAllowed(String),

    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl From<orchid_core::Error> for ToolError {
    fn from(e: orchid_core::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Agent state change requested by a tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    Remember { key: String, value: Value },
}

/// Successful tool result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub effects: Vec<ToolEffect>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            effects: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// What a tool sees of the calling agent.
#[derive(Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub config: Arc<AgentConfig>,
    /// Memory as of the start of the iteration.
    pub memory: im::OrdMap<String, Value>,
    pub runtime: Arc<Runtime>,
    pub timeout: Duration,
    workspace: OnceCell<Workspace>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent_id", &self.agent_id)
            .field("project_id", &self.config.project_id)
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    pub fn new(
        agent_id: impl Into<String>,
        config: Arc<AgentConfig>,
        memory: im::OrdMap<String, Value>,
        runtime: Arc<Runtime>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            memory,
            runtime,
            timeout,
            workspace: OnceCell::new(),
        }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.config.tools
    }

    pub fn project_id(&self) -> Result<&str, ToolError> {
        self.config
            .project_id
            .as_deref()
            .ok_or_else(|| ToolError::failed("agent is not bound to a project"))
    }

    /// Where file and shell tools run for this agent. Resolved once per context.
    pub async fn workspace(&self) -> Result<Workspace, ToolError> {
        let workspace = self
            .workspace
            .get_or_try_init(|| Workspace::resolve(&self.config, &self.runtime))
            .await?;
        Ok(workspace.clone())
    }

    /// Resolve the workspace and wait until it can take commands.
    async fn prepare_workspace(&self) -> Result<(), ToolError> {
        self.workspace().await?.wait_ready().await?;
        Ok(())
    }
}

/// Executes tool calls by name.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Schemas of the tools a policy allows.
    fn specs(&self, policy: &ToolPolicy) -> Vec<ToolSpec>;

    /// Run one call. The allow-list has already been checked.
    async fn execute(&self, name: &str, args: &Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Outcome of one call as folded into the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub result: String,
    pub ok: bool,
    pub effects: Vec<ToolEffect>,
}

/// Slack for the tool to clean up after its own limit fires.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

async fn run_allowed(
    dispatcher: &dyn ToolDispatcher,
    call: &ToolCall,
    ctx: &ToolContext,
) -> Result<ToolOutput, ToolError> {
    if !ctx.policy().allows(&call.name) {
        return Err(ToolError::NotAllowed(call.name.clone()));
    }
    if names::SANDBOXED.contains(&call.name.as_str()) {
        ctx.prepare_workspace().await?;
    }
    tokio::time::timeout(
        ctx.timeout + TIMEOUT_GRACE,
        dispatcher.execute(&call.name, &call.arguments, ctx),
    )
    .await
    .map_err(|_| ToolError::Timeout(ctx.timeout))?
}

/// Check the allow-list, run the call under the wall-clock limit and render
/// the result.
///
/// Provisioning the workspace is not part of a call's time budget.
pub async fn dispatch(dispatcher: &dyn ToolDispatcher, call: &ToolCall, ctx: &ToolContext) -> ToolExecution {
    let outcome = run_allowed(dispatcher, call, ctx).await;

    match outcome {
        Ok(output) => {
            debug!(agent_id = %ctx.agent_id, tool = %call.name, "Tool call succeeded");
            ToolExecution {
                call: call.clone(),
                result: output.content,
                ok: true,
                effects: output.effects,
            }
        }
        Err(e) => {
            warn!(agent_id = %ctx.agent_id, tool = %call.name, error = %e, "Tool call failed");
            ToolExecution {
                call: call.clone(),
                result: format!("Error: {e}"),
                ok: false,
                effects: Vec::new(),
            }
        }
    }
}

/// Decode tool arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: &Value) -> Result<T, ToolError> {
    let value = match args {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| ToolError::invalid(tool, e.to_string()))
}
