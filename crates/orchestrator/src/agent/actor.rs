//! The agent actor.
//!
//! The actor is the only writer of its transcript, tool history, memory and
//! status. Gateway calls and tool execution run as detached iterations that
//! report back through the mailbox, so queries and notifications are served
//! while a run is in flight. After every change the actor publishes a
//! snapshot to the registry's side table.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use orchid_gateway::ChatMessage;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};

use super::certify::{EVIDENCE_NUDGE, has_evidence, looks_like_implementation};
use super::config::AgentConfig;
use super::messages::{AgentMessage, RunReply};
use super::state::{AgentSnapshot, AgentStatus, ToolRecord};
use super::turn::{IterationInput, IterationOutcome, spawn_iteration};
use crate::error::AgentError;
use crate::goals::{Goal, excerpt};
use crate::review::ReviewVerdict;
use crate::runtime::Runtime;
use crate::tools::{ToolEffect, Workspace};

/// Corrective retries granted after a negative review.
const MAX_REVIEW_RETRIES: u32 = 1;

#[derive(Clone, Default)]
pub struct AgentActor;

/// Spawn arguments.
pub struct AgentArgs {
    pub id: String,
    pub config: AgentConfig,
    pub runtime: Arc<Runtime>,
}

/// Input waiting for the current run to finish.
struct Queued {
    text: String,
    reply: Option<RunReply>,
}

/// The run in flight.
struct Run {
    id: u64,
    iterations_left: u32,
    /// Tool history length when the run started.
    history_start: usize,
    waiters: Vec<RunReply>,
}

/// Why the actor is stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StopKind {
    /// A worker finished its goals.
    Clean,
    Failed(String),
    /// A failure already reported to the orchestrator above each goal.
    FailureReported(String),
    Requested(String),
}

impl StopKind {
    fn reason(&self) -> String {
        match self {
            Self::Clean => "completed".to_string(),
            Self::Failed(reason) | Self::FailureReported(reason) | Self::Requested(reason) => reason.clone(),
        }
    }

    /// Whether the creator or parent still needs to hear about the stop.
    fn needs_notice(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Requested(_))
    }
}

pub struct AgentState {
    id: String,
    config: Arc<AgentConfig>,
    runtime: Arc<Runtime>,
    status: AgentStatus,
    messages: im::Vector<ChatMessage>,
    tool_history: im::Vector<ToolRecord>,
    memory: im::OrdMap<String, Value>,
    attached: im::OrdSet<String>,
    partial: String,
    notifications: Vec<String>,
    inbox: VecDeque<Queued>,
    run: Option<Run>,
    /// Run id whose report is under review.
    review: Option<u64>,
    next_run_id: u64,
    stop: Option<StopKind>,
}

impl AgentState {
    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            config: Arc::clone(&self.config),
            status: self.status.clone(),
            messages: self.messages.clone(),
            tool_history: self.tool_history.clone(),
            memory: self.memory.clone(),
            attached: self.attached.clone(),
            partial: self.partial.clone(),
            running: self.busy(),
            updated_at: Utc::now(),
        }
    }

    fn publish(&self) {
        self.runtime.registry().publish(self.snapshot());
    }

    fn busy(&self) -> bool {
        self.run.is_some() || self.review.is_some()
    }

    fn current_run(&self) -> Option<u64> {
        self.run.as_ref().map(|run| run.id)
    }

    fn push_user(&mut self, text: String) {
        self.messages.push_back(ChatMessage::user(text));
    }

    /// Fold pending notifications into one transcript entry.
    fn fold_notifications(&mut self) -> bool {
        if self.notifications.is_empty() {
            return false;
        }
        let text = std::mem::take(&mut self.notifications).join("\n\n");
        self.messages.push_back(ChatMessage::notification(text));
        true
    }

    fn start_run(&mut self, myself: &ActorRef<AgentMessage>, reply: Option<RunReply>) {
        self.next_run_id += 1;
        self.run = Some(Run {
            id: self.next_run_id,
            iterations_left: self.config.max_iterations.max(1),
            history_start: self.tool_history.len(),
            waiters: reply.into_iter().collect(),
        });
        self.status = AgentStatus::Thinking;
        self.partial.clear();
        self.publish();
        debug!(agent_id = %self.id, run_id = self.next_run_id, "Run started");
        self.launch_iteration(myself);
    }

    fn launch_iteration(&self, myself: &ActorRef<AgentMessage>) {
        let Some(run_id) = self.current_run() else {
            return;
        };
        let input = IterationInput {
            run_id,
            agent_id: self.id.clone(),
            config: Arc::clone(&self.config),
            messages: self.messages.iter().cloned().collect(),
            memory: self.memory.clone(),
            attached: self.attached.iter().cloned().collect(),
            runtime: Arc::clone(&self.runtime),
        };
        spawn_iteration(input, myself.clone());
    }

    /// Start the next queued input, or a run over pending notifications.
    fn start_next(&mut self, myself: &ActorRef<AgentMessage>) {
        if self.stop.is_some() || self.busy() {
            return;
        }
        if let Some(queued) = self.inbox.pop_front() {
            self.fold_notifications();
            self.push_user(queued.text);
            self.start_run(myself, queued.reply);
        } else if self.fold_notifications() {
            self.start_run(myself, None);
        }
    }

    fn stop_with(&mut self, myself: &ActorRef<AgentMessage>, kind: StopKind) {
        let reason = kind.reason();
        self.stop = Some(kind);
        myself.stop(Some(reason));
    }

    fn apply_effect(&mut self, effect: ToolEffect) {
        match effect {
            ToolEffect::Remember { key, value } => {
                self.memory.insert(key, value);
            }
        }
    }

    async fn pending_assigned(&self) -> Vec<Goal> {
        match self.runtime.goals().assigned_to(&self.id).await {
            Ok(goals) => goals.into_iter().filter(Goal::is_pending).collect(),
            Err(e) => {
                warn!(agent_id = %self.id, error = %e, "Failed to load assigned goals");
                Vec::new()
            }
        }
    }

    /// Explicit creator, else the orchestrator above the first assigned goal.
    async fn notice_target(&self) -> Option<String> {
        if let Some(creator) = &self.config.creator {
            return Some(creator.clone());
        }
        let goals = self.runtime.goals().assigned_to(&self.id).await.ok()?;
        for goal in goals {
            if let Ok(Some(parent)) = self.runtime.goals().find_parent_orchestrator(&goal.id).await {
                if parent != self.id {
                    return Some(parent);
                }
            }
        }
        None
    }
}

impl Actor for AgentActor {
    type Msg = AgentMessage;
    type State = AgentState;
    type Arguments = AgentArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(
            agent_id = %args.id,
            model = %args.config.model,
            project_id = ?args.config.project_id,
            "Agent starting"
        );
        let state = AgentState {
            id: args.id,
            config: Arc::new(args.config),
            runtime: args.runtime,
            status: AgentStatus::Idle,
            messages: im::Vector::new(),
            tool_history: im::Vector::new(),
            memory: im::OrdMap::new(),
            attached: im::OrdSet::new(),
            partial: String::new(),
            notifications: Vec::new(),
            inbox: VecDeque::new(),
            run: None,
            review: None,
            next_run_id: 0,
            stop: None,
        };
        state.publish();
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AgentMessage::Send { text, reply } => {
                if state.stop.is_some() {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(AgentError::stopped(&state.id)));
                    }
                } else if state.busy() {
                    state.inbox.push_back(Queued { text, reply });
                } else {
                    state.fold_notifications();
                    state.push_user(text);
                    state.start_run(&myself, reply);
                }
            }
            AgentMessage::Notify { text } => {
                debug!(agent_id = %state.id, "Notification received");
                state.notifications.push(text);
                state.start_next(&myself);
            }
            AgentMessage::Retry => {
                if state.busy() || state.stop.is_some() {
                    debug!(agent_id = %state.id, "Retry ignored, agent is busy");
                } else {
                    state.fold_notifications();
                    state.start_run(&myself, None);
                }
            }
            AgentMessage::Attach { object_id } => {
                state.attached.insert(object_id);
                state.publish();
            }
            AgentMessage::Detach { object_id } => {
                state.attached.remove(&object_id);
                state.publish();
            }
            AgentMessage::Remember { key, value } => {
                state.memory.insert(key, value);
                state.publish();
            }
            AgentMessage::Forget { key } => {
                state.memory.remove(&key);
                state.publish();
            }
            AgentMessage::Stop { reason } => {
                let reason = reason.unwrap_or_else(|| "stop requested".to_string());
                info!(agent_id = %state.id, reason = %reason, "Agent stop requested");
                state.stop_with(&myself, StopKind::Requested(reason));
            }
            AgentMessage::Recall { key, reply } => {
                let _ = reply.send(state.memory.get(&key).cloned());
            }
            AgentMessage::GetSnapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
            AgentMessage::Chunk { run_id, text } => {
                if state.current_run() == Some(run_id) {
                    state.partial.push_str(&text);
                    state.publish();
                }
            }
            AgentMessage::StatusUpdate { run_id, status } => {
                if state.current_run() == Some(run_id) {
                    state.status = status;
                    state.publish();
                }
            }
            AgentMessage::IterationFinished { run_id, outcome } => {
                on_iteration(&myself, state, run_id, outcome).await;
            }
            AgentMessage::ReviewFinished {
                run_id,
                goal_id,
                report,
                verdict,
            } => {
                on_review(&myself, state, run_id, &goal_id, report, verdict).await;
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let kind = state
            .stop
            .clone()
            .unwrap_or_else(|| StopKind::Requested("stopped".to_string()));
        let reason = kind.reason();
        if let Some(run) = state.run.take() {
            for waiter in run.waiters {
                let _ = waiter.send(Err(AgentError::stopped(reason.clone())));
            }
        }
        for queued in state.inbox.drain(..) {
            if let Some(reply) = queued.reply {
                let _ = reply.send(Err(AgentError::stopped(reason.clone())));
            }
        }

        if kind.needs_notice() {
            if let Some(target) = state.notice_target().await {
                let notice = format!("Agent {} stopped: {reason}", state.id);
                if !state.runtime.registry().notify(&target, notice) {
                    debug!(agent_id = %state.id, target = %target, "Termination notice not delivered");
                }
            }
        }

        state.runtime.registry().remove(&state.id);
        info!(agent_id = %state.id, reason = %reason, "Agent stopped");
        Ok(())
    }
}

async fn on_iteration(
    myself: &ActorRef<AgentMessage>,
    state: &mut AgentState,
    run_id: u64,
    outcome: IterationOutcome,
) {
    if state.current_run() != Some(run_id) {
        debug!(agent_id = %state.id, run_id, "Dropping result of a stale run");
        return;
    }
    state.partial.clear();

    match outcome {
        IterationOutcome::Failed { error } => {
            finish_run(myself, state, Err(AgentError::Gateway(error))).await;
        }
        IterationOutcome::Terminal { response } => {
            let text = response.content.clone();
            state.messages.push_back(response.into_message());
            finish_run(myself, state, Ok(text)).await;
        }
        IterationOutcome::ToolsExecuted {
            response,
            executions,
        } => {
            state.messages.push_back(response.into_message());
            for execution in executions {
                state.messages.push_back(ChatMessage::tool_result(
                    execution.call.id.clone(),
                    execution.result.clone(),
                ));
                state.tool_history.push_back(ToolRecord {
                    id: execution.call.id,
                    tool: execution.call.name,
                    args: execution.call.arguments,
                    result: execution.result,
                    ok: execution.ok,
                    timestamp: Utc::now(),
                });
                for effect in execution.effects {
                    state.apply_effect(effect);
                }
            }
            state.fold_notifications();

            let exhausted = match state.run.as_mut() {
                Some(run) => {
                    run.iterations_left = run.iterations_left.saturating_sub(1);
                    run.iterations_left == 0
                }
                None => true,
            };
            if exhausted {
                warn!(agent_id = %state.id, run_id, "Iteration budget exhausted");
                let text = state.snapshot().last_output().unwrap_or_default();
                finish_run(myself, state, Ok(text)).await;
            } else {
                state.status = AgentStatus::Thinking;
                state.publish();
                state.launch_iteration(myself);
            }
        }
    }
}

async fn finish_run(myself: &ActorRef<AgentMessage>, state: &mut AgentState, result: Result<String, AgentError>) {
    let Some(run) = state.run.take() else {
        return;
    };
    state.status = AgentStatus::Idle;
    state.partial.clear();
    state.publish();

    match &result {
        Ok(text) => info!(agent_id = %state.id, run_id = run.id, chars = text.len(), "Run finished"),
        Err(e) => warn!(agent_id = %state.id, run_id = run.id, error = %e, "Run failed"),
    }
    for waiter in run.waiters {
        let _ = waiter.send(result.clone());
    }

    if state.config.is_worker() {
        after_worker_run(myself, state, run.id, run.history_start, result).await;
    }
    state.start_next(myself);
}

/// Workers stop after every run unless goals remain, and their reports go
/// through evidence and review checks before a goal is closed.
async fn after_worker_run(
    myself: &ActorRef<AgentMessage>,
    state: &mut AgentState,
    run_id: u64,
    history_start: usize,
    result: Result<String, AgentError>,
) {
    let assigned = state.pending_assigned().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            let reason = e.to_string();
            let mut reported = false;
            for goal in &assigned {
                if let Err(e) = state.runtime.goals().record_failure(&goal.id, &reason).await {
                    warn!(goal_id = %goal.id, error = %e, "Failed to record goal failure");
                }
                match state.runtime.goals().find_parent_orchestrator(&goal.id).await {
                    Ok(Some(parent)) if parent != state.id => {
                        let text = format!(
                            "Worker {} failed on goal {} ({}): {reason}",
                            state.id, goal.id, goal.name
                        );
                        reported |= state.runtime.registry().notify(&parent, text);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(goal_id = %goal.id, error = %e, "Parent lookup failed"),
                }
            }
            let kind = if reported {
                StopKind::FailureReported(reason)
            } else {
                StopKind::Failed(reason)
            };
            state.stop_with(myself, kind);
            return;
        }
    };

    let Some(goal) = assigned.into_iter().next() else {
        state.stop_with(myself, StopKind::Clean);
        return;
    };

    let this_run = state.tool_history.iter().skip(history_start);
    if looks_like_implementation(&goal) && !has_evidence(this_run) && !goal.evidence_nudged {
        info!(agent_id = %state.id, goal_id = %goal.id, "No implementation evidence, nudging once");
        if let Err(e) = state.runtime.goals().mark_evidence_nudged(&goal.id).await {
            warn!(goal_id = %goal.id, error = %e, "Failed to record evidence nudge");
        }
        state.push_user(EVIDENCE_NUDGE.to_string());
        state.start_run(myself, None);
        return;
    }

    start_review(myself, state, run_id, goal, report);
}

fn start_review(myself: &ActorRef<AgentMessage>, state: &mut AgentState, run_id: u64, goal: Goal, report: String) {
    state.review = Some(run_id);
    state.status = AgentStatus::Custom {
        label: "reviewing".to_string(),
    };
    state.publish();

    let runtime = Arc::clone(&state.runtime);
    let config = Arc::clone(&state.config);
    let target = myself.clone();
    let span = info_span!("review", agent_id = %state.id, goal_id = %goal.id);
    tokio::spawn(
        async move {
            let changed = match Workspace::resolve(&config, &runtime).await {
                Ok(workspace) => workspace.changed_files().await.unwrap_or_default(),
                Err(e) => {
                    debug!(error = %e, "No workspace to list for review");
                    Vec::new()
                }
            };
            let verdict = runtime.reviewer().review(&goal, &report, &changed).await;
            let _ = target.send_message(AgentMessage::ReviewFinished {
                run_id,
                goal_id: goal.id,
                report,
                verdict,
            });
        }
        .instrument(span),
    );
}

async fn on_review(
    myself: &ActorRef<AgentMessage>,
    state: &mut AgentState,
    run_id: u64,
    goal_id: &str,
    report: String,
    verdict: ReviewVerdict,
) {
    if state.review != Some(run_id) {
        debug!(agent_id = %state.id, run_id, "Dropping stale review");
        return;
    }
    state.review = None;
    state.status = AgentStatus::Idle;
    state.publish();
    let goals = state.runtime.goals().clone();

    if verdict.completed {
        info!(agent_id = %state.id, goal_id = %goal_id, "Review accepted the work");
        if let Err(e) = goals.complete(goal_id, &report, Some(verdict.summary)).await {
            warn!(goal_id = %goal_id, error = %e, "Failed to complete goal");
        }
        match state.pending_assigned().await.into_iter().next() {
            Some(next) => {
                state.push_user(next.assignment_text());
                state.start_run(myself, None);
            }
            None => state.stop_with(myself, StopKind::Clean),
        }
        return;
    }

    let summary = verdict.summary.clone();
    let error = verdict.error.clone();
    match goals.get(goal_id).await {
        Ok(goal) if goal.review_retries < MAX_REVIEW_RETRIES => {
            info!(agent_id = %state.id, goal_id = %goal_id, "Review rejected the work, retrying once");
            if let Err(e) = goals.record_review(goal_id, &report, &summary, error.clone(), true).await {
                warn!(goal_id = %goal_id, error = %e, "Failed to record review");
            }
            let mut text = format!("A review found the goal is not complete yet: {summary}");
            if let Some(error) = error {
                text.push_str(&format!("\nMissing: {}", excerpt(&error, 1_000)));
            }
            text.push_str("\nFix this, verify it, then report again.");
            state.push_user(text);
            state.start_run(myself, None);
        }
        Ok(_) => {
            if let Err(e) = goals.record_review(goal_id, &report, &summary, error, false).await {
                warn!(goal_id = %goal_id, error = %e, "Failed to record review");
            }
            state.stop_with(
                myself,
                StopKind::Failed(format!("review rejected goal {goal_id} after a corrective retry")),
            );
        }
        Err(e) => {
            warn!(goal_id = %goal_id, error = %e, "Reviewed goal is gone");
            state.stop_with(myself, StopKind::Failed(e.to_string()));
        }
    }
}
