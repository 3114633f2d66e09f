//! Reconciliation loop.
//!
//! Notifications and completion cascades only cut latency; the periodic sweep
//! is what guarantees progress. It clears orphaned assignments, spawns agents
//! for ready work and nudges idle agents that still hold pending goals.

mod actor;
mod log;
mod planner;

use std::sync::Arc;
use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};

pub use actor::{SweepReport, WatcherActor, WatcherArgs, WatcherMessage, WatcherStats, rekick_text};
pub use log::{DecisionLog, Outcome};
pub use planner::{AgentView, ProjectView, WatcherAction, plan_project};

use crate::error::WatcherError;
use crate::runtime::Runtime;

/// Registry name of the process-wide watcher.
pub const WATCHER_NAME: &str = "watcher";

/// How long a `SweepNow` caller waits.
const SWEEP_TIMEOUT: Duration = Duration::from_secs(120);

/// Spawn the watcher under `name`.
///
/// With `periodic` set the first sweep runs one interval after start.
pub async fn spawn(runtime: Arc<Runtime>, name: &str, periodic: bool) -> Result<WatcherHandle, WatcherError> {
    let (actor, _join) = Actor::spawn(
        Some(name.to_string()),
        WatcherActor,
        WatcherArgs { runtime, periodic },
    )
    .await
    .map_err(|e| WatcherError::SpawnFailed(e.to_string()))?;
    Ok(WatcherHandle { actor })
}

#[derive(Debug, Clone)]
pub struct WatcherHandle {
    actor: ActorRef<WatcherMessage>,
}

impl WatcherHandle {
    /// Look up a running watcher by registry name.
    pub fn find(name: &str) -> Option<Self> {
        ractor::registry::where_is(name.to_string()).map(|cell| Self {
            actor: ActorRef::from(cell),
        })
    }

    /// Run a sweep now, queued behind any sweep in progress.
    pub async fn sweep_now(&self) -> Result<SweepReport, WatcherError> {
        match self
            .actor
            .call(|reply| WatcherMessage::SweepNow { reply }, Some(SWEEP_TIMEOUT))
            .await
        {
            Ok(CallResult::Success(report)) => Ok(report),
            Ok(CallResult::Timeout) => Err(WatcherError::Timeout(SWEEP_TIMEOUT)),
            Ok(CallResult::SenderError) | Err(_) => Err(WatcherError::Unavailable),
        }
    }

    pub async fn stats(&self) -> Result<WatcherStats, WatcherError> {
        let limit = Duration::from_secs(5);
        match self
            .actor
            .call(|reply| WatcherMessage::Stats { reply }, Some(limit))
            .await
        {
            Ok(CallResult::Success(stats)) => Ok(stats),
            Ok(CallResult::Timeout) => Err(WatcherError::Timeout(limit)),
            Ok(CallResult::SenderError) | Err(_) => Err(WatcherError::Unavailable),
        }
    }

    /// Stop the watcher and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self
            .actor
            .stop_and_wait(Some("shutdown".to_string()), Some(Duration::from_secs(10)))
            .await;
    }
}
