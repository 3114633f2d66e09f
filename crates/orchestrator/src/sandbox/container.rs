//! Compute-environment command surface.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::process::run_process;
use super::{CONTAINER_WORKDIR, ExecOutput, Result, SandboxError};

/// Limit for lifecycle commands (create, inspect, remove).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(120);

/// What to create for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub lower: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
}

impl ContainerSpec {
    /// Entry command: overlay-mount the layers at the workdir, then idle.
    pub fn entry_command(&self) -> String {
        format!(
            "mkdir -p {dir} && mount -t overlay overlay -o lowerdir=/lower,upperdir=/upper,workdir=/work {dir} && exec sleep infinity",
            dir = CONTAINER_WORKDIR
        )
    }
}

/// A container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container for `spec`.
    async fn create(&self, spec: &ContainerSpec) -> Result<()>;

    /// Whether the named container is running.
    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Run `command` through `sh -c` in the workdir of the named container.
    async fn exec(
        &self,
        name: &str,
        command: &str,
        stdin: Option<String>,
        limit: Duration,
    ) -> Result<ExecOutput>;

    /// Forcefully remove the named container. Missing containers are not an error.
    async fn remove(&self, name: &str) -> Result<()>;
}

/// `docker`/`podman` driven through their command line.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: Vec<String>, stdin: Option<String>, limit: Duration) -> Result<ExecOutput> {
        run_process(&self.binary, &args, None, stdin, limit).await
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

fn mount(host: &std::path::Path, target: &str, read_only: bool) -> String {
    let suffix = if read_only { ":ro" } else { "" };
    format!("{}:{target}{suffix}", host.display())
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        // A stale container with the same name blocks `run`.
        self.remove(&spec.name).await?;

        let entry = spec.entry_command();
        let mut argv = args(["run", "-d", "--privileged", "--name", &spec.name]);
        argv.extend([
            "-v".to_string(),
            mount(&spec.lower, "/lower", true),
            "-v".to_string(),
            mount(&spec.upper, "/upper", false),
            "-v".to_string(),
            mount(&spec.work, "/work", false),
            spec.image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            entry,
        ]);

        let out = self.run(argv, None, CONTROL_TIMEOUT).await?;
        if !out.success() {
            return Err(SandboxError::runtime(format!(
                "{} run failed ({}): {}",
                self.binary,
                out.exit_code,
                out.stderr.trim()
            )));
        }
        info!(container = %spec.name, image = %spec.image, "Container created");
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let out = self
            .run(
                args(["inspect", "-f", "{{.State.Running}}", name]),
                None,
                CONTROL_TIMEOUT,
            )
            .await?;
        Ok(out.success() && out.stdout.trim() == "true")
    }

    async fn exec(
        &self,
        name: &str,
        command: &str,
        stdin: Option<String>,
        limit: Duration,
    ) -> Result<ExecOutput> {
        let argv = args(["exec", "-i", "-w", CONTAINER_WORKDIR, name, "sh", "-c", command]);
        self.run(argv, stdin, limit).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let out = self.run(args(["rm", "-f", name]), None, CONTROL_TIMEOUT).await?;
        debug!(container = %name, exit_code = out.exit_code, "Container removed");
        Ok(())
    }
}
