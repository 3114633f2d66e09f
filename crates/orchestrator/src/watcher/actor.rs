//! The watcher actor: periodic sweeps over every active project.
//!
//! Each sweep observes goals and live agents, asks the planner for actions and
//! applies them. The sweep body runs under `catch_unwind`, both as a whole and
//! per project, so a failure is logged and the next sweep still happens.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::log::{DecisionLog, Outcome};
use super::planner::{AgentView, ProjectView, WatcherAction, plan_project};
use crate::agent::AgentHandle;
use crate::goals::Goal;
use crate::projects::Project;
use crate::review::Classification;
use crate::runtime::Runtime;

/// Messages handled by the watcher.
#[derive(Debug)]
pub enum WatcherMessage {
    /// Scheduled sweep. Reschedules itself.
    Tick,
    /// Sweep immediately and report what happened.
    SweepNow { reply: RpcReplyPort<SweepReport> },
    /// Counters since start.
    Stats { reply: RpcReplyPort<WatcherStats> },
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active projects examined.
    pub projects: usize,
    /// Applied actions, with their project id.
    pub taken: Vec<(String, WatcherAction)>,
    /// Actions that failed, with their project id and reason.
    pub failed: Vec<(String, WatcherAction, String)>,
    /// Projects or sweeps that could not be examined.
    pub errors: Vec<String>,
}

impl SweepReport {
    /// Nothing left to do and nothing went wrong.
    pub fn converged(&self) -> bool {
        self.taken.is_empty() && self.failed.is_empty() && self.errors.is_empty()
    }

    /// Applied actions for one project.
    pub fn taken_for<'a>(&'a self, project_id: &'a str) -> impl Iterator<Item = &'a WatcherAction> + 'a {
        self.taken
            .iter()
            .filter(move |(p, _)| p == project_id)
            .map(|(_, action)| action)
    }
}

/// Running totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub sweeps: u64,
    pub actions_taken: u64,
    pub actions_failed: u64,
    /// Sweeps or projects whose body failed or panicked.
    pub sweep_failures: u64,
    pub last_sweep: Option<DateTime<Utc>>,
}

pub struct WatcherArgs {
    pub runtime: Arc<Runtime>,
    /// Schedule periodic sweeps. When false only `SweepNow` sweeps.
    pub periodic: bool,
}

pub struct WatcherState {
    runtime: Arc<Runtime>,
    log: DecisionLog,
    periodic: bool,
    /// Last nudge per agent, for the re-kick cooldown.
    nudged: HashMap<String, Instant>,
    stats: WatcherStats,
    next_tick: Option<JoinHandle<()>>,
}

impl WatcherState {
    fn schedule_tick(&mut self, myself: &ActorRef<WatcherMessage>) {
        if !self.periodic {
            return;
        }
        let interval = self.runtime.config().watcher.interval;
        let target = myself.clone();
        self.next_tick = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = target.send_message(WatcherMessage::Tick);
        }));
    }

    async fn sweep(&mut self) -> SweepReport {
        let started = Utc::now();
        let report = match AssertUnwindSafe(self.sweep_projects()).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                error!("Watcher sweep panicked");
                SweepReport {
                    errors: vec!["sweep panicked".to_string()],
                    ..SweepReport::default()
                }
            }
        };

        self.stats.sweeps += 1;
        self.stats.actions_taken += report.taken.len() as u64;
        self.stats.actions_failed += report.failed.len() as u64;
        self.stats.sweep_failures += report.errors.len() as u64;
        self.stats.last_sweep = Some(started);

        if report.converged() {
            debug!(projects = report.projects, "Sweep converged");
        } else {
            info!(
                projects = report.projects,
                taken = report.taken.len(),
                failed = report.failed.len(),
                errors = report.errors.len(),
                "Sweep finished"
            );
        }
        report
    }

    async fn sweep_projects(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        let projects = match self.runtime.projects().list().await {
            Ok(projects) => projects,
            Err(e) => {
                warn!(error = %e, "Failed to list projects");
                report.errors.push(format!("list projects: {e}"));
                return report;
            }
        };

        for project in projects.into_iter().filter(Project::is_active) {
            report.projects += 1;
            match AssertUnwindSafe(self.sweep_project(&project.id)).catch_unwind().await {
                Ok(Ok((taken, failed))) => {
                    report.taken.extend(taken.into_iter().map(|a| (project.id.clone(), a)));
                    report
                        .failed
                        .extend(failed.into_iter().map(|(a, e)| (project.id.clone(), a, e)));
                }
                Ok(Err(e)) => {
                    warn!(project_id = %project.id, error = %e, "Project sweep failed");
                    report.errors.push(format!("{}: {e}", project.id));
                }
                Err(_) => {
                    error!(project_id = %project.id, "Project sweep panicked");
                    report.errors.push(format!("{}: panicked", project.id));
                }
            }
        }

        let live: HashSet<String> = self
            .runtime
            .registry()
            .live_agents()
            .into_iter()
            .map(|s| s.id)
            .collect();
        self.nudged.retain(|agent_id, _| live.contains(agent_id));
        report
    }

    /// Plan and apply one project. Returns (taken, failed).
    async fn sweep_project(
        &mut self,
        project_id: &str,
    ) -> orchid_core::Result<(Vec<WatcherAction>, Vec<(WatcherAction, String)>)> {
        let goals = self.runtime.goals().list(project_id).await?;
        let agents = self
            .runtime
            .registry()
            .agents_for_project(project_id)
            .into_iter()
            .map(|s| AgentView {
                idle: s.is_idle(),
                last_entry: s.last_entry(),
                id: s.id,
            })
            .collect();
        let view = ProjectView {
            project_id: project_id.to_string(),
            goals,
            agents,
        };

        let now = Instant::now();
        let actions = plan_project(&view, &self.nudged, now, &self.runtime.config().watcher);

        let mut taken = Vec::new();
        let mut failed = Vec::new();
        for action in actions {
            let decision = action.to_string();
            match self.apply(project_id, &view.goals, &action).await {
                Ok(()) => {
                    info!(project_id = %project_id, action = %decision, "Watcher action taken");
                    self.log.record(project_id, &decision, Outcome::Taken, None).await;
                    if let Some(agent_id) = action.nudged_agent() {
                        self.nudged.insert(agent_id.to_string(), now);
                    }
                    taken.push(action);
                }
                Err(reason) => {
                    warn!(project_id = %project_id, action = %decision, error = %reason, "Watcher action failed");
                    self.log.record(project_id, &decision, Outcome::Failed, Some(&reason)).await;
                    failed.push((action, reason));
                }
            }
        }
        Ok((taken, failed))
    }

    async fn apply(&self, project_id: &str, goals: &[Goal], action: &WatcherAction) -> Result<(), String> {
        let runtime = &self.runtime;
        match action {
            WatcherAction::ClearAssignment { goal_id, .. } => runtime
                .goals()
                .clear_assignment(goal_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            WatcherAction::SpawnWorker { goal_id } => runtime
                .spawn_worker(project_id, goal_id, None)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            WatcherAction::SpawnOrchestrator { goal_ids } => runtime
                .spawn_orchestrator(project_id, goal_ids)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            WatcherAction::Retry { agent_id } => AgentHandle::find(runtime, agent_id)
                .ok_or_else(|| format!("agent {agent_id} is not running"))?
                .retry()
                .map_err(|e| e.to_string()),
            WatcherAction::Rekick {
                agent_id,
                goal_ids,
                last_output,
            } => {
                let classification = match last_output {
                    Some(text) if runtime.config().watcher.summarize_before_rekick => {
                        Some(runtime.summarizer().classify(text).await)
                    }
                    _ => None,
                };
                let held: Vec<&Goal> = goals.iter().filter(|g| goal_ids.contains(&g.id)).collect();
                AgentHandle::find(runtime, agent_id)
                    .ok_or_else(|| format!("agent {agent_id} is not running"))?
                    .send(rekick_text(&held, classification))
                    .map_err(|e| e.to_string())
            }
        }
    }
}

/// The nudge sent to an idle agent that still holds pending goals.
pub fn rekick_text(goals: &[&Goal], classification: Option<Classification>) -> String {
    let mut text = String::from("You still have unfinished goals:\n");
    for goal in goals {
        text.push_str(&format!("- {} ({})\n", goal.name, goal.id));
    }
    text.push('\n');
    text.push_str(match classification {
        Some(Classification::Completed) => {
            "Your last message reads as finished. If the work is done and verified, reply with your final report."
        }
        Some(Classification::Error) => {
            "Your last message reports an error. Investigate it, fix the cause and continue."
        }
        Some(Classification::InProgress) => "Your last message reads as work in progress. Continue where you left off.",
        Some(Classification::Unknown) | None => "Continue working on them and reply with a report when you are done.",
    });
    text
}

#[derive(Clone, Default)]
pub struct WatcherActor;

impl Actor for WatcherActor {
    type Msg = WatcherMessage;
    type State = WatcherState;
    type Arguments = WatcherArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let log = DecisionLog::new(args.runtime.config().decision_log_path());
        info!(
            interval_secs = args.runtime.config().watcher.interval.as_secs(),
            spawn_mode = %args.runtime.config().watcher.spawn_mode,
            log = %log.path().display(),
            "Watcher starting"
        );
        let mut state = WatcherState {
            runtime: args.runtime,
            log,
            periodic: args.periodic,
            nudged: HashMap::new(),
            stats: WatcherStats::default(),
            next_tick: None,
        };
        state.schedule_tick(&myself);
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WatcherMessage::Tick => {
                state.sweep().await;
                state.schedule_tick(&myself);
            }
            WatcherMessage::SweepNow { reply } => {
                let report = state.sweep().await;
                let _ = reply.send(report);
            }
            WatcherMessage::Stats { reply } => {
                let _ = reply.send(state.stats.clone());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(tick) = state.next_tick.take() {
            tick.abort();
        }
        info!(sweeps = state.stats.sweeps, "Watcher stopped");
        Ok(())
    }
}
