//! Pure sweep planning: observed project state in, actions out.
//!
//! The planner never touches actors or storage, so every decision the watcher
//! makes can be checked with plain values.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tokio::time::Instant;

use crate::agent::LastEntry;
use crate::config::{SpawnMode, WatcherSettings};
use crate::goals::{Goal, ready_roots};

/// What the planner knows about one live agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentView {
    pub id: String,
    pub idle: bool,
    pub last_entry: LastEntry,
}

/// Observed state of one project.
#[derive(Debug, Clone, Default)]
pub struct ProjectView {
    pub project_id: String,
    pub goals: Vec<Goal>,
    pub agents: Vec<AgentView>,
}

/// One corrective step for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherAction {
    /// Drop an assignment whose agent is gone.
    ClearAssignment { goal_id: String, agent_id: String },
    /// Spawn a worker for a ready root goal.
    SpawnWorker { goal_id: String },
    /// Spawn one orchestrator holding these goals.
    SpawnOrchestrator { goal_ids: Vec<String> },
    /// Re-run an idle agent on its unanswered transcript.
    Retry { agent_id: String },
    /// Nudge an idle agent about its unfinished goals.
    Rekick {
        agent_id: String,
        goal_ids: Vec<String>,
        last_output: Option<String>,
    },
}

impl WatcherAction {
    /// Agent whose cooldown this action consumes.
    pub fn nudged_agent(&self) -> Option<&str> {
        match self {
            Self::Retry { agent_id } | Self::Rekick { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

impl fmt::Display for WatcherAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClearAssignment { goal_id, agent_id } => {
                write!(f, "clear_assignment goal={goal_id} agent={agent_id}")
            }
            Self::SpawnWorker { goal_id } => write!(f, "spawn_worker goal={goal_id}"),
            Self::SpawnOrchestrator { goal_ids } => {
                write!(f, "spawn_orchestrator goals={}", goal_ids.join(","))
            }
            Self::Retry { agent_id } => write!(f, "retry agent={agent_id}"),
            Self::Rekick { agent_id, goal_ids, .. } => {
                write!(f, "rekick agent={agent_id} goals={}", goal_ids.join(","))
            }
        }
    }
}

/// Whether `agent_id` was nudged less than one cooldown window ago.
fn cooling_down(
    agent_id: &str,
    nudged: &HashMap<String, Instant>,
    now: Instant,
    settings: &WatcherSettings,
) -> bool {
    nudged
        .get(agent_id)
        .is_some_and(|at| now.saturating_duration_since(*at) < settings.rekick_cooldown)
}

/// Plan the actions that move one project toward progress.
///
/// Orphaned assignments are cleared first and the cleared goals count as
/// unassigned for the rest of the plan. Spawning only happens while the
/// project is below its agent budget; idle agents holding pending goals are
/// nudged at most once per cooldown window.
pub fn plan_project(
    view: &ProjectView,
    nudged: &HashMap<String, Instant>,
    now: Instant,
    settings: &WatcherSettings,
) -> Vec<WatcherAction> {
    if !view.goals.iter().any(Goal::is_pending) {
        return Vec::new();
    }

    let live: HashSet<&str> = view.agents.iter().map(|a| a.id.as_str()).collect();
    let mut actions = Vec::new();

    let goals: Vec<Goal> = view
        .goals
        .iter()
        .map(|goal| match goal.agent_id.as_deref() {
            Some(agent_id) if goal.is_pending() && !live.contains(agent_id) => {
                actions.push(WatcherAction::ClearAssignment {
                    goal_id: goal.id.clone(),
                    agent_id: agent_id.to_string(),
                });
                Goal {
                    agent_id: None,
                    ..goal.clone()
                }
            }
            _ => goal.clone(),
        })
        .collect();

    match settings.spawn_mode {
        SpawnMode::Worker => {
            let slots = settings.max_parallel_workers.max(1).saturating_sub(view.agents.len());
            actions.extend(
                ready_roots(&goals)
                    .into_iter()
                    .filter(|g| g.agent_id.is_none())
                    .take(slots)
                    .map(|g| WatcherAction::SpawnWorker {
                        goal_id: g.id.clone(),
                    }),
            );
        }
        SpawnMode::Orchestrator if view.agents.is_empty() => {
            let goal_ids: Vec<String> = goals
                .iter()
                .filter(|g| g.is_pending() && g.agent_id.is_none())
                .map(|g| g.id.clone())
                .collect();
            if !goal_ids.is_empty() {
                actions.push(WatcherAction::SpawnOrchestrator { goal_ids });
            }
        }
        SpawnMode::Orchestrator => {}
    }

    for agent in view.agents.iter().filter(|a| a.idle) {
        let held: Vec<String> = goals
            .iter()
            .filter(|g| g.is_pending() && g.agent_id.as_deref() == Some(agent.id.as_str()))
            .map(|g| g.id.clone())
            .collect();
        if held.is_empty() || cooling_down(&agent.id, nudged, now, settings) {
            continue;
        }

        let action = match &agent.last_entry {
            LastEntry::Unanswered | LastEntry::EmptyOutput => WatcherAction::Retry {
                agent_id: agent.id.clone(),
            },
            LastEntry::Output(text) => WatcherAction::Rekick {
                agent_id: agent.id.clone(),
                goal_ids: held,
                last_output: Some(text.clone()),
            },
            LastEntry::Empty => WatcherAction::Rekick {
                agent_id: agent.id.clone(),
                goal_ids: held,
                last_output: None,
            },
        };
        actions.push(action);
    }

    actions
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::goals::GoalStatus;

    fn goal(id: &str, deps: &[&str]) -> Goal {
        Goal {
            id: id.to_string(),
            project_id: "p".to_string(),
            name: id.to_string(),
            description: String::new(),
            status: GoalStatus::Pending,
            depends_on: deps.iter().map(ToString::to_string).collect(),
            parent_goal_id: None,
            agent_id: None,
            report: None,
            summary: None,
            error: None,
            evidence_nudged: false,
            review_retries: 0,
        }
    }

    fn assigned(mut g: Goal, agent: &str) -> Goal {
        g.agent_id = Some(agent.to_string());
        g
    }

    fn agent(id: &str, idle: bool, last_entry: LastEntry) -> AgentView {
        AgentView {
            id: id.to_string(),
            idle,
            last_entry,
        }
    }

    fn view(goals: Vec<Goal>, agents: Vec<AgentView>) -> ProjectView {
        ProjectView {
            project_id: "p".to_string(),
            goals,
            agents,
        }
    }

    #[test]
    fn given_no_pending_goals_when_planning_then_does_nothing() {
        let mut done = goal("a", &[]);
        done.status = GoalStatus::Completed;
        let actions = plan_project(
            &view(vec![done], vec![]),
            &HashMap::new(),
            Instant::now(),
            &WatcherSettings::default(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn given_orphaned_assignment_when_planning_then_clears_it_and_spawns_one_worker() {
        let goals = vec![assigned(goal("a", &[]), "ghost"), goal("b", &[])];
        let actions = plan_project(
            &view(goals, vec![]),
            &HashMap::new(),
            Instant::now(),
            &WatcherSettings::default(),
        );
        assert_eq!(
            actions,
            vec![
                WatcherAction::ClearAssignment {
                    goal_id: "a".to_string(),
                    agent_id: "ghost".to_string()
                },
                WatcherAction::SpawnWorker {
                    goal_id: "a".to_string()
                },
            ]
        );
    }

    #[test]
    fn given_blocked_goal_when_planning_then_spawns_for_ready_root_only() {
        let goals = vec![goal("b", &["a"]), goal("a", &[])];
        let actions = plan_project(
            &view(goals, vec![]),
            &HashMap::new(),
            Instant::now(),
            &WatcherSettings::default(),
        );
        assert_eq!(
            actions,
            vec![WatcherAction::SpawnWorker {
                goal_id: "a".to_string()
            }]
        );
    }

    #[test]
    fn given_parallel_budget_when_planning_then_fills_free_slots() {
        let settings = WatcherSettings {
            max_parallel_workers: 3,
            ..WatcherSettings::default()
        };
        let goals = vec![
            assigned(goal("a", &[]), "w1"),
            goal("b", &[]),
            goal("c", &[]),
            goal("d", &[]),
        ];
        let actions = plan_project(
            &view(goals, vec![agent("w1", false, LastEntry::Empty)]),
            &HashMap::new(),
            Instant::now(),
            &settings,
        );
        assert_eq!(
            actions,
            vec![
                WatcherAction::SpawnWorker {
                    goal_id: "b".to_string()
                },
                WatcherAction::SpawnWorker {
                    goal_id: "c".to_string()
                },
            ]
        );
    }

    #[test]
    fn given_orchestrator_mode_when_planning_then_one_agent_takes_every_unassigned_goal() {
        let settings = WatcherSettings {
            spawn_mode: SpawnMode::Orchestrator,
            ..WatcherSettings::default()
        };
        let goals = vec![goal("a", &[]), goal("b", &["a"])];
        let actions = plan_project(&view(goals, vec![]), &HashMap::new(), Instant::now(), &settings);
        assert_eq!(
            actions,
            vec![WatcherAction::SpawnOrchestrator {
                goal_ids: vec!["a".to_string(), "b".to_string()]
            }]
        );
    }

    #[test]
    fn given_idle_agent_with_unanswered_entry_when_planning_then_retries() {
        let goals = vec![assigned(goal("a", &[]), "w1")];
        let actions = plan_project(
            &view(goals, vec![agent("w1", true, LastEntry::Unanswered)]),
            &HashMap::new(),
            Instant::now(),
            &WatcherSettings::default(),
        );
        assert_eq!(
            actions,
            vec![WatcherAction::Retry {
                agent_id: "w1".to_string()
            }]
        );
    }

    #[test]
    fn given_idle_agent_with_output_when_planning_then_rekicks_with_that_output() {
        let goals = vec![assigned(goal("a", &[]), "w1")];
        let actions = plan_project(
            &view(goals, vec![agent("w1", true, LastEntry::Output("halfway".to_string()))]),
            &HashMap::new(),
            Instant::now(),
            &WatcherSettings::default(),
        );
        assert_eq!(
            actions,
            vec![WatcherAction::Rekick {
                agent_id: "w1".to_string(),
                goal_ids: vec!["a".to_string()],
                last_output: Some("halfway".to_string()),
            }]
        );
    }

    #[test]
    fn given_busy_agent_when_planning_then_leaves_it_alone() {
        let goals = vec![assigned(goal("a", &[]), "w1")];
        let actions = plan_project(
            &view(goals, vec![agent("w1", false, LastEntry::Unanswered)]),
            &HashMap::new(),
            Instant::now(),
            &WatcherSettings::default(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn given_recent_nudge_when_planning_then_waits_out_the_cooldown() {
        let settings = WatcherSettings::default();
        let goals = vec![assigned(goal("a", &[]), "w1")];
        let agents = vec![agent("w1", true, LastEntry::Unanswered)];
        let start = Instant::now();
        let nudged = HashMap::from([("w1".to_string(), start)]);

        let during = plan_project(
            &view(goals.clone(), agents.clone()),
            &nudged,
            start + Duration::from_secs(60),
            &settings,
        );
        assert!(during.is_empty());

        let after = plan_project(
            &view(goals, agents),
            &nudged,
            start + settings.rekick_cooldown,
            &settings,
        );
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn should_name_the_nudged_agent() {
        let retry = WatcherAction::Retry {
            agent_id: "w1".to_string(),
        };
        assert_eq!(retry.nudged_agent(), Some("w1"));
        assert_eq!(
            WatcherAction::SpawnWorker {
                goal_id: "a".to_string()
            }
            .nudged_agent(),
            None
        );
        assert_eq!(retry.to_string(), "retry agent=w1");
    }
}
