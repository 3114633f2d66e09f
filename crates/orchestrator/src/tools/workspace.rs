//! Where file and shell tools run.

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::{AgentConfig, ExecutionMode};
use crate::runtime::Runtime;
use crate::sandbox::{ExecOutput, LayeredView, Result, SandboxHandle, SandboxPaths, run_process};

/// A project sandbox or a plain host directory.
#[derive(Debug, Clone)]
pub enum Workspace {
    Sandbox(SandboxHandle),
    Host(LayeredView),
}

impl Workspace {
    /// Pick the workspace for an agent, provisioning its sandbox on first need.
    pub async fn resolve(config: &AgentConfig, runtime: &Runtime) -> Result<Self> {
        match (&config.execution, config.project_id.as_deref(), runtime.sandboxes()) {
            (ExecutionMode::Host { workdir }, _, _) => Ok(Self::host(workdir.clone())),
            (ExecutionMode::Sandbox, Some(project_id), Some(manager)) => {
                Ok(Self::Sandbox(manager.ensure(project_id).await?))
            }
            (ExecutionMode::Sandbox, Some(project_id), None) => {
                let dir = SandboxPaths::project_files(&runtime.config().data_dir, project_id);
                tokio::fs::create_dir_all(&dir).await?;
                Ok(Self::host(dir))
            }
            (ExecutionMode::Sandbox, None, _) => {
                Ok(Self::host(std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))))
            }
        }
    }

    /// Wait until commands can run. Host directories are always ready.
    pub async fn wait_ready(&self) -> Result<()> {
        match self {
            Self::Sandbox(handle) => handle.wait_ready().await,
            Self::Host(_) => Ok(()),
        }
    }

    /// A single-layer view of `dir`.
    pub const fn host(dir: PathBuf) -> Self {
        Self::Host(LayeredView::single(dir))
    }

    pub async fn exec(&self, command: &str, limit: Duration) -> Result<ExecOutput> {
        match self {
            Self::Sandbox(handle) => handle.exec(command, Some(limit)).await,
            Self::Host(view) => {
                let args = vec!["-c".to_string(), command.to_string()];
                run_process("sh", &args, Some(view.upper()), None, limit).await
            }
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        match self {
            Self::Sandbox(handle) => handle.read_file(path).await,
            Self::Host(view) => view.read(path).await,
        }
    }

    pub async fn write_file(&self, path: &str, content: String) -> Result<()> {
        match self {
            Self::Sandbox(handle) => handle.write_file(path, content).await,
            Self::Host(view) => view.write(path, content).await,
        }
    }

    pub async fn edit_file(&self, path: &str, anchor: String, replacement: String) -> Result<()> {
        match self {
            Self::Sandbox(handle) => handle.edit_file(path, anchor, replacement).await,
            Self::Host(view) => view.edit(path, anchor, replacement).await,
        }
    }

    pub async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        match self {
            Self::Sandbox(handle) => handle.list_files(dir).await,
            Self::Host(view) => view.list(dir).await,
        }
    }

    pub async fn grep_files(&self, pattern: &str, dir: &str) -> Result<Vec<String>> {
        match self {
            Self::Sandbox(handle) => handle.grep_files(pattern, dir).await,
            Self::Host(view) => view.grep(pattern, dir).await,
        }
    }

    /// Files the reviewer is shown: the sandbox's upper layer, or every file
    /// of a host directory.
    pub async fn changed_files(&self) -> Result<Vec<String>> {
        match self {
            Self::Sandbox(handle) => handle.changed_files().await,
            Self::Host(view) => view.list("").await,
        }
    }
}
