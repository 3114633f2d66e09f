//! One isolated execution environment per project.
//!
//! The primary strategy runs a privileged container that overlay-mounts the
//! project files (read-only lower layer) under a writable upper layer. When the
//! container fails its liveness check the sandbox falls back to a union view
//! emulated on the host over the same two directories.
//!
//! Lifecycle transitions go through a per-project actor; data operations run
//! directly on a cloned [`SandboxHandle`].

mod container;
mod edit;
mod error;
mod handle;
mod lifecycle;
mod manager;
mod overlay;
mod process;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use container::{CliRuntime, ContainerRuntime, ContainerSpec};
pub use edit::{EditError, apply_edit};
pub use error::{Result, SandboxError};
pub use handle::SandboxHandle;
pub use lifecycle::{SandboxActor, SandboxArgs, SandboxMessage};
pub use manager::SandboxManager;
pub use overlay::{Absorbed, Baseline, LayeredView};
pub use process::run_process;

/// Mount point of the union view inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Cap on entries returned by `list_files`.
pub const MAX_LIST_ENTRIES: usize = 1_000;

/// Cap on lines returned by `grep_files`.
pub const MAX_GREP_MATCHES: usize = 200;

/// Execution strategy a sandbox is currently using.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SandboxMode {
    Starting,
    /// Container with a kernel overlay mount.
    Privileged,
    /// Union view emulated on the host.
    Fallback,
    /// Both strategies failed; sandboxed calls fail fast.
    Error { reason: String },
    Stopped,
}

impl SandboxMode {
    /// Whether data operations can run.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Privileged | Self::Fallback)
    }
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Privileged => write!(f, "privileged"),
            Self::Fallback => write!(f, "fallback"),
            Self::Error { reason } => write!(f, "error: {reason}"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Output of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text shown to the model as a tool result.
    pub fn render(&self) -> String {
        let mut out = format!("exit code: {}", self.exit_code);
        if !self.stdout.is_empty() {
            out.push_str("\n--- stdout ---\n");
            out.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            out.push_str("\n--- stderr ---\n");
            out.push_str(&self.stderr);
        }
        out
    }
}

/// On-disk layout of one project's sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPaths {
    /// Committed project files, the read-only lower layer.
    pub lower: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    pub merged: PathBuf,
}

impl SandboxPaths {
    /// Layout under `data_dir`: `projects/<p>/files` and `sandboxes/<p>/{upper,work,merged}`.
    pub fn new(data_dir: &Path, project_id: &str) -> Self {
        let root = Self::root(data_dir, project_id);
        Self {
            lower: Self::project_files(data_dir, project_id),
            upper: root.join("upper"),
            work: root.join("work"),
            merged: root.join("merged"),
        }
    }

    /// Committed files of a project.
    pub fn project_files(data_dir: &Path, project_id: &str) -> PathBuf {
        data_dir.join("projects").join(project_id).join("files")
    }

    /// Root of a project's sandbox scratch state.
    pub fn root(data_dir: &Path, project_id: &str) -> PathBuf {
        data_dir.join("sandboxes").join(project_id)
    }

    /// Create every directory of the layout.
    pub async fn ensure(&self) -> Result<()> {
        for dir in [&self.lower, &self.upper, &self.work, &self.merged] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// The union view over this layout.
    pub fn view(&self) -> LayeredView {
        LayeredView::layered(self.upper.clone(), self.lower.clone())
    }
}

/// Quote a string for `sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
