//! Per-project lifecycle actor.
//!
//! Start, reset, stop and the periodic health probe are serialized here. The
//! current mode is published on a watch channel read by every handle.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::container::{ContainerRuntime, ContainerSpec};
use super::{SandboxMode, SandboxPaths};
use crate::config::SandboxSettings;

/// Messages handled by the lifecycle actor.
#[derive(Debug)]
pub enum SandboxMessage {
    /// Provision the sandbox unless it is already active.
    Start { reply: RpcReplyPort<SandboxMode> },
    /// Recreate the compute environment. The upper layer is kept.
    Reset {
        reply: Option<RpcReplyPort<SandboxMode>>,
    },
    /// Remove the compute environment and stop the actor.
    Stop { reply: Option<RpcReplyPort<()>> },
    /// Periodic liveness probe.
    HealthCheck,
}

/// Everything the actor needs to provision one sandbox.
pub struct SandboxArgs {
    pub project_id: String,
    pub container: String,
    pub paths: Arc<SandboxPaths>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub settings: SandboxSettings,
    pub mode: watch::Sender<SandboxMode>,
}

pub struct SandboxState {
    args: SandboxArgs,
    health: Option<HealthHandle>,
}

impl SandboxState {
    fn mode(&self) -> SandboxMode {
        self.args.mode.borrow().clone()
    }

    fn set_mode(&self, mode: SandboxMode) {
        info!(project_id = %self.args.project_id, mode = %mode, "Sandbox mode changed");
        self.args.mode.send_replace(mode);
    }

    fn spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.args.container.clone(),
            image: self.args.settings.image.clone(),
            lower: self.args.paths.lower.clone(),
            upper: self.args.paths.upper.clone(),
            work: self.args.paths.work.clone(),
        }
    }

    fn stop_health(&mut self) {
        if let Some(handle) = self.health.take() {
            handle.stop();
        }
    }
}

#[derive(Clone, Default)]
pub struct SandboxActor;

impl Actor for SandboxActor {
    type Msg = SandboxMessage;
    type State = SandboxState;
    type Arguments = SandboxArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!(project_id = %args.project_id, container = %args.container, "Sandbox actor starting");
        Ok(SandboxState { args, health: None })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SandboxMessage::Start { reply } => {
                let mode = if state.mode().is_active() {
                    state.mode()
                } else {
                    provision(&myself, state).await
                };
                let _ = reply.send(mode);
            }
            SandboxMessage::Reset { reply } => {
                info!(project_id = %state.args.project_id, "Resetting sandbox");
                teardown(state).await;
                let mode = provision(&myself, state).await;
                if let Some(reply) = reply {
                    let _ = reply.send(mode);
                }
            }
            SandboxMessage::Stop { reply } => {
                teardown(state).await;
                state.set_mode(SandboxMode::Stopped);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                myself.stop(Some("stopped".to_string()));
            }
            SandboxMessage::HealthCheck => {
                if state.mode() != SandboxMode::Privileged {
                    return Ok(());
                }
                let running = state
                    .args
                    .runtime
                    .is_running(&state.args.container)
                    .await
                    .unwrap_or(false);
                if !running {
                    warn!(
                        project_id = %state.args.project_id,
                        container = %state.args.container,
                        "Sandbox container is not running, resetting"
                    );
                    teardown(state).await;
                    provision(&myself, state).await;
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if state.mode() != SandboxMode::Stopped {
            teardown(state).await;
            state.set_mode(SandboxMode::Stopped);
        }
        state.stop_health();
        Ok(())
    }
}

/// Try the privileged strategy, then the fallback.
async fn provision(myself: &ActorRef<SandboxMessage>, state: &mut SandboxState) -> SandboxMode {
    state.set_mode(SandboxMode::Starting);
    let project_id = state.args.project_id.clone();

    if let Err(e) = state.args.paths.ensure().await {
        error!(project_id = %project_id, error = %e, "Failed to create sandbox directories");
        let mode = SandboxMode::Error {
            reason: e.to_string(),
        };
        state.set_mode(mode.clone());
        return mode;
    }

    let mode = match state.args.runtime.create(&state.spec()).await {
        Ok(()) => {
            if wait_until_live(state).await {
                SandboxMode::Privileged
            } else {
                warn!(project_id = %project_id, "Container failed its liveness check, using fallback");
                if let Err(e) = state.args.runtime.remove(&state.args.container).await {
                    debug!(project_id = %project_id, error = %e, "Failed to remove dead container");
                }
                fallback(state).await
            }
        }
        Err(e) => {
            warn!(project_id = %project_id, error = %e, "Container creation failed, using fallback");
            fallback(state).await
        }
    };

    if mode == SandboxMode::Privileged {
        state.stop_health();
        state.health = Some(HealthTimer::start(
            myself.clone(),
            state.args.settings.health_interval,
        ));
    }
    state.set_mode(mode.clone());
    mode
}

/// Bounded liveness check.
async fn wait_until_live(state: &SandboxState) -> bool {
    let retries = state.args.settings.liveness_retries.max(1);
    for attempt in 1..=retries {
        match state.args.runtime.is_running(&state.args.container).await {
            Ok(true) => return true,
            Ok(false) => debug!(attempt, retries, "Container not running yet"),
            Err(e) => debug!(attempt, retries, error = %e, "Liveness probe failed"),
        }
        if attempt < retries {
            tokio::time::sleep(state.args.settings.liveness_interval).await;
        }
    }
    false
}

/// The fallback needs only a writable scratch area on the host.
async fn fallback(state: &SandboxState) -> SandboxMode {
    let probe = state.args.paths.work.join(".orchid-probe");
    let result = match tokio::fs::write(&probe, b"probe").await {
        Ok(()) => tokio::fs::remove_file(&probe).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => SandboxMode::Fallback,
        Err(e) => {
            error!(project_id = %state.args.project_id, error = %e, "Fallback sandbox unavailable");
            SandboxMode::Error {
                reason: format!("fallback failed: {e}"),
            }
        }
    }
}

/// Remove the compute environment, keeping every layer on disk.
async fn teardown(state: &mut SandboxState) {
    state.stop_health();
    if state.mode() == SandboxMode::Privileged {
        if let Err(e) = state.args.runtime.remove(&state.args.container).await {
            warn!(project_id = %state.args.project_id, error = %e, "Failed to remove container");
        }
    }
}

/// Handle for stopping a health timer.
pub struct HealthHandle {
    stop_tx: watch::Sender<bool>,
}

impl HealthHandle {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Sends `HealthCheck` at a fixed interval.
struct HealthTimer;

/// Shortest period between health checks.
const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(1);

impl HealthTimer {
    fn start(target: ActorRef<SandboxMessage>, interval: Duration) -> HealthHandle {
        let interval = interval.max(MIN_HEALTH_INTERVAL);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if target.send_message(SandboxMessage::HealthCheck).is_err() {
                            break;
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        HealthHandle { stop_tx }
    }
}
