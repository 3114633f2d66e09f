//! Owns the sandboxes of every project.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};
use tokio::sync::{OnceCell, watch};
use tracing::{info, warn};

use super::container::{CliRuntime, ContainerRuntime};
use super::handle::SandboxHandle;
use super::lifecycle::{SandboxActor, SandboxArgs, SandboxMessage};
use super::{Result, SandboxError, SandboxMode, SandboxPaths};
use crate::config::SandboxSettings;

/// Upper bound on one provisioning attempt.
const START_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on a stop or reset request.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(120);

/// Registry name of a project's lifecycle actor.
pub fn actor_name(project_id: &str) -> String {
    format!("sandbox:{project_id}")
}

/// Container name for a project.
pub fn container_name(project_id: &str) -> String {
    let safe: String = project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    format!("orchid-{safe}")
}

/// Creates sandboxes on first need and routes lifecycle requests.
pub struct SandboxManager {
    data_dir: PathBuf,
    settings: SandboxSettings,
    runtime: Arc<dyn ContainerRuntime>,
    sandboxes: DashMap<String, Arc<OnceCell<SandboxHandle>>>,
}

impl fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxManager")
            .field("data_dir", &self.data_dir)
            .field("sandboxes", &self.sandboxes.len())
            .finish_non_exhaustive()
    }
}

impl SandboxManager {
    pub fn new(data_dir: PathBuf, settings: SandboxSettings, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            data_dir,
            settings,
            runtime,
            sandboxes: DashMap::new(),
        }
    }

    /// Manager driving the configured container CLI.
    pub fn from_settings(data_dir: PathBuf, settings: SandboxSettings) -> Self {
        let runtime = Arc::new(CliRuntime::new(settings.runtime.clone()));
        Self::new(data_dir, settings, runtime)
    }

    /// The project's sandbox, provisioning it when there is none.
    pub async fn ensure(&self, project_id: &str) -> Result<SandboxHandle> {
        let cell = self.cell(project_id);
        let handle = cell
            .get_or_try_init(|| self.start(project_id))
            .await?
            .clone();

        if handle.mode() != SandboxMode::Stopped {
            return Ok(handle);
        }

        // The lifecycle actor went away; start over once.
        self.sandboxes
            .remove_if(project_id, |_, existing| Arc::ptr_eq(existing, &cell));
        let cell = self.cell(project_id);
        Ok(cell
            .get_or_try_init(|| self.start(project_id))
            .await?
            .clone())
    }

    fn cell(&self, project_id: &str) -> Arc<OnceCell<SandboxHandle>> {
        self.sandboxes
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    async fn start(&self, project_id: &str) -> Result<SandboxHandle> {
        let name = actor_name(project_id);
        if let Some(stale) = ractor::registry::where_is(name.clone()) {
            warn!(project_id = %project_id, "Replacing stale sandbox actor");
            let _ = stale.stop_and_wait(None, Some(CONTROL_TIMEOUT)).await;
        }

        let paths = Arc::new(SandboxPaths::new(&self.data_dir, project_id));
        let container = container_name(project_id);
        let (mode_tx, mode_rx) = watch::channel(SandboxMode::Starting);

        let args = SandboxArgs {
            project_id: project_id.to_string(),
            container: container.clone(),
            paths: Arc::clone(&paths),
            runtime: Arc::clone(&self.runtime),
            settings: self.settings.clone(),
            mode: mode_tx,
        };
        let (actor, _join) = Actor::spawn(Some(name), SandboxActor, args)
            .await
            .map_err(|e| SandboxError::runtime(format!("failed to spawn sandbox actor: {e}")))?;

        match actor
            .call(|reply| SandboxMessage::Start { reply }, Some(START_TIMEOUT))
            .await
        {
            Ok(CallResult::Success(mode)) => {
                info!(project_id = %project_id, mode = %mode, "Sandbox ready");
            }
            Ok(CallResult::Timeout) => {
                warn!(project_id = %project_id, "Sandbox start is taking long");
            }
            Ok(CallResult::SenderError) | Err(_) => {
                return Err(SandboxError::unavailable(project_id, "sandbox actor stopped while starting"));
            }
        }

        Ok(SandboxHandle::new(
            project_id.to_string(),
            container,
            paths,
            mode_rx,
            Arc::clone(&self.runtime),
            self.settings.exec_timeout,
            actor,
        ))
    }

    /// The project's sandbox if one was provisioned.
    pub fn get(&self, project_id: &str) -> Option<SandboxHandle> {
        self.sandboxes
            .get(project_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Recreate the compute environment, keeping the upper layer.
    pub async fn reset(&self, project_id: &str) -> Result<SandboxMode> {
        let handle = self
            .get(project_id)
            .ok_or_else(|| SandboxError::unavailable(project_id, "no sandbox"))?;
        call_lifecycle(handle.lifecycle(), project_id, |reply| SandboxMessage::Reset {
            reply: Some(reply),
        })
        .await
    }

    /// Stop the project's sandbox. Layers stay on disk.
    pub async fn stop(&self, project_id: &str) -> Result<()> {
        let Some((_, cell)) = self.sandboxes.remove(project_id) else {
            return Ok(());
        };
        let Some(handle) = cell.get() else {
            return Ok(());
        };
        call_lifecycle(handle.lifecycle(), project_id, |reply| SandboxMessage::Stop {
            reply: Some(reply),
        })
        .await
    }

    /// Stop the sandbox and delete its scratch tree.
    pub async fn destroy(&self, project_id: &str) -> Result<()> {
        self.stop(project_id).await?;
        let root = SandboxPaths::root(&self.data_dir, project_id);
        if tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&root).await?;
        }
        info!(project_id = %project_id, "Sandbox destroyed");
        Ok(())
    }

    /// Stop every sandbox.
    pub async fn stop_all(&self) {
        let projects: Vec<String> = self.sandboxes.iter().map(|e| e.key().clone()).collect();
        for project_id in projects {
            if let Err(e) = self.stop(&project_id).await {
                warn!(project_id = %project_id, error = %e, "Failed to stop sandbox");
            }
        }
    }
}

async fn call_lifecycle<T, F>(actor: &ActorRef<SandboxMessage>, project_id: &str, msg: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(ractor::RpcReplyPort<T>) -> SandboxMessage,
{
    match actor.call(msg, Some(CONTROL_TIMEOUT)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(SandboxError::Timeout(CONTROL_TIMEOUT)),
        Ok(CallResult::SenderError) | Err(_) => {
            Err(SandboxError::unavailable(project_id, "sandbox actor is gone"))
        }
    }
}
