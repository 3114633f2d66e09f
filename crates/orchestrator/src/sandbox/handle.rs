//! Data operations on a project sandbox.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ractor::ActorRef;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::container::ContainerRuntime;
use super::edit::apply_edit;
use super::lifecycle::SandboxMessage;
use super::overlay::relative_path;
use super::process::run_process;
use super::{
    ExecOutput, MAX_GREP_MATCHES, MAX_LIST_ENTRIES, Result, SandboxError, SandboxMode,
    SandboxPaths, shell_quote,
};

/// How long a data operation waits for a starting sandbox.
const START_WAIT: Duration = Duration::from_secs(180);

/// Cloneable access to one project's sandbox.
///
/// Data operations run on the caller's task, so a long command never blocks
/// another agent or the lifecycle actor.
#[derive(Clone)]
pub struct SandboxHandle {
    project_id: String,
    container: String,
    paths: Arc<SandboxPaths>,
    mode: watch::Receiver<SandboxMode>,
    runtime: Arc<dyn ContainerRuntime>,
    exec_timeout: Duration,
    lifecycle: ActorRef<SandboxMessage>,
}

impl fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("project_id", &self.project_id)
            .field("container", &self.container)
            .field("mode", &*self.mode.borrow())
            .finish_non_exhaustive()
    }
}

impl SandboxHandle {
    pub(crate) fn new(
        project_id: String,
        container: String,
        paths: Arc<SandboxPaths>,
        mode: watch::Receiver<SandboxMode>,
        runtime: Arc<dyn ContainerRuntime>,
        exec_timeout: Duration,
        lifecycle: ActorRef<SandboxMessage>,
    ) -> Self {
        Self {
            project_id,
            container,
            paths,
            mode,
            runtime,
            exec_timeout,
            lifecycle,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn paths(&self) -> &SandboxPaths {
        &self.paths
    }

    /// Current mode.
    pub fn mode(&self) -> SandboxMode {
        self.mode.borrow().clone()
    }

    pub(crate) fn lifecycle(&self) -> &ActorRef<SandboxMessage> {
        &self.lifecycle
    }

    /// Wait out `Starting` and return the active strategy.
    async fn active(&self) -> Result<SandboxMode> {
        let mut rx = self.mode.clone();
        let settled = tokio::time::timeout(
            START_WAIT,
            rx.wait_for(|mode| *mode != SandboxMode::Starting),
        )
        .await
        .map_err(|_| SandboxError::unavailable(&self.project_id, "still starting"))?
        .map_err(|_| SandboxError::unavailable(&self.project_id, "lifecycle actor is gone"))?
        .clone();

        match settled {
            mode @ (SandboxMode::Privileged | SandboxMode::Fallback) => Ok(mode),
            SandboxMode::Error { reason } => Err(SandboxError::unavailable(&self.project_id, reason)),
            other => Err(SandboxError::unavailable(&self.project_id, other.to_string())),
        }
    }

    /// Resolve once the sandbox has left `Starting` and can take commands.
    pub async fn wait_ready(&self) -> Result<()> {
        self.active().await.map(|_| ())
    }

    /// Run a shell command in the workspace.
    pub async fn exec(&self, command: &str, limit: Option<Duration>) -> Result<ExecOutput> {
        let limit = limit.unwrap_or(self.exec_timeout);
        match self.active().await? {
            SandboxMode::Privileged => {
                self.runtime
                    .exec(&self.container, command, None, limit)
                    .await
            }
            _ => self.exec_fallback(command, limit).await,
        }
    }

    /// Run a command in a scratch copy of the union and absorb its changes.
    async fn exec_fallback(&self, command: &str, limit: Duration) -> Result<ExecOutput> {
        let view = self.paths.view();
        let scratch = self.paths.merged.join(format!("exec-{}", Uuid::new_v4()));
        let baseline = view.materialize(scratch.clone()).await?;

        let args = vec!["-c".to_string(), command.to_string()];
        let result = run_process("sh", &args, Some(&scratch), None, limit).await;

        match view.absorb(scratch.clone(), baseline).await {
            Ok(absorbed) => debug!(
                project_id = %self.project_id,
                written = absorbed.written.len(),
                removed = absorbed.removed.len(),
                "Fallback exec absorbed"
            ),
            Err(e) => warn!(project_id = %self.project_id, error = %e, "Failed to absorb fallback exec changes"),
        }
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(project_id = %self.project_id, error = %e, "Failed to remove scratch directory");
        }
        result
    }

    async fn run_in_container(&self, command: &str, stdin: Option<String>) -> Result<ExecOutput> {
        self.runtime
            .exec(&self.container, command, stdin, self.exec_timeout)
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        match self.active().await? {
            SandboxMode::Privileged => {
                let rel = quoted_path(path)?;
                let out = self.run_in_container(&format!("cat -- {rel}"), None).await?;
                if out.success() {
                    Ok(out.stdout)
                } else {
                    Err(SandboxError::FileNotFound(path.to_string()))
                }
            }
            _ => self.paths.view().read(path).await,
        }
    }

    pub async fn write_file(&self, path: &str, content: String) -> Result<()> {
        match self.active().await? {
            SandboxMode::Privileged => {
                let rel = quoted_path(path)?;
                let command = format!("mkdir -p \"$(dirname -- {rel})\" && cat > {rel}");
                let out = self.run_in_container(&command, Some(content)).await?;
                if out.success() {
                    Ok(())
                } else {
                    Err(SandboxError::runtime(format!("write {path} failed: {}", out.stderr.trim())))
                }
            }
            _ => self.paths.view().write(path, content).await,
        }
    }

    /// Replace the unique `anchor` in a file; the file is untouched on error.
    pub async fn edit_file(&self, path: &str, anchor: String, replacement: String) -> Result<()> {
        match self.active().await? {
            SandboxMode::Privileged => {
                let content = self.read_file(path).await?;
                let edited = apply_edit(&content, &anchor, &replacement)
                    .map_err(|e| SandboxError::edit(path, e))?;
                self.write_file(path, edited).await
            }
            _ => self.paths.view().edit(path, anchor, replacement).await,
        }
    }

    pub async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        match self.active().await? {
            SandboxMode::Privileged => {
                let rel = quoted_dir(dir)?;
                let command = format!(
                    "find {rel} -type f -not -path '*/.git/*' | sort | head -n {MAX_LIST_ENTRIES}"
                );
                let out = self.run_in_container(&command, None).await?;
                Ok(strip_dot_prefix(&out.stdout))
            }
            _ => self.paths.view().list(dir).await,
        }
    }

    pub async fn grep_files(&self, pattern: &str, dir: &str) -> Result<Vec<String>> {
        match self.active().await? {
            SandboxMode::Privileged => {
                let rel = quoted_dir(dir)?;
                let command = format!(
                    "grep -rnIE --exclude-dir=.git -- {} {rel} | head -n {MAX_GREP_MATCHES}",
                    shell_quote(pattern)
                );
                let out = self.run_in_container(&command, None).await?;
                Ok(strip_dot_prefix(&out.stdout))
            }
            _ => self.paths.view().grep(pattern, dir).await,
        }
    }

    /// Files written by agents, read from the upper layer on the host.
    pub async fn changed_files(&self) -> Result<Vec<String>> {
        self.paths.view().changed_files().await
    }
}

fn quoted_path(path: &str) -> Result<String> {
    let rel = relative_path(path)?;
    if rel.as_os_str().is_empty() {
        return Err(SandboxError::InvalidPath(path.to_string()));
    }
    Ok(shell_quote(&rel.to_string_lossy()))
}

fn quoted_dir(dir: &str) -> Result<String> {
    let rel = relative_path(dir)?;
    if rel.as_os_str().is_empty() {
        Ok(".".to_string())
    } else {
        Ok(shell_quote(&rel.to_string_lossy()))
    }
}

fn strip_dot_prefix(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.strip_prefix("./").unwrap_or(line).to_string())
        .collect()
}
