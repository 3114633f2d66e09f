//! BDD integration tests for the reconciliation sweep.
//!
//! Each test wires a real runtime (in-memory store, scripted gateway, host
//! workspaces) and drives the watcher with `SweepNow` instead of its timer.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use common::{approving_gateway, eventually, runtime, unique_name};
use orchestrator::watcher::{self, WatcherAction};
use orchestrator::{GoalStatus, NewGoal, ProjectStatus, Runtime};

async fn is_completed(rt: Arc<Runtime>, goal_id: String) -> bool {
    rt.goals().get(&goal_id).await.unwrap().status == GoalStatus::Completed
}

fn no_live_agents(rt: &Runtime, project_id: &str) -> std::future::Ready<bool> {
    std::future::ready(rt.registry().agents_for_project(project_id).is_empty())
}

/// **Given** goal B depends on goal A
/// **When** the watcher sweeps twice, once after A completes
/// **Then** the first sweep staffs A and the second staffs B
#[tokio::test]
async fn given_dependent_goals_when_sweeping_then_workers_follow_the_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path(), approving_gateway("Outline written and checked."));
    let project = rt.create_project("docs").await.unwrap();
    let a = rt
        .goals()
        .create(NewGoal::new(&project.id, "Outline the plan", ""))
        .await
        .unwrap();
    let b = rt
        .goals()
        .create(NewGoal::new(&project.id, "Draft the release notes", "").depends_on(&a.id))
        .await
        .unwrap();
    let watcher = watcher::spawn(Arc::clone(&rt), &unique_name("watcher"), false)
        .await
        .unwrap();

    // Sweep 1: only A is ready.
    let first = watcher.sweep_now().await.unwrap();
    let taken: Vec<&WatcherAction> = first.taken_for(&project.id).collect();
    assert_eq!(
        taken,
        vec![&WatcherAction::SpawnWorker {
            goal_id: a.id.clone()
        }]
    );

    eventually("goal A completed", || is_completed(Arc::clone(&rt), a.id.clone())).await;
    eventually("first worker stopped", || no_live_agents(&rt, &project.id)).await;

    // Sweep 2: B is ready now.
    let second = watcher.sweep_now().await.unwrap();
    let taken: Vec<&WatcherAction> = second.taken_for(&project.id).collect();
    assert_eq!(
        taken,
        vec![&WatcherAction::SpawnWorker {
            goal_id: b.id.clone()
        }]
    );

    eventually("goal B completed", || is_completed(Arc::clone(&rt), b.id.clone())).await;
    let a = rt.goals().get(&a.id).await.unwrap();
    assert_eq!(a.summary.as_deref(), Some("The work is done."));
    assert_eq!(a.report.as_deref(), Some("Outline written and checked."));

    eventually("second worker stopped", || no_live_agents(&rt, &project.id)).await;
    let idle = watcher.sweep_now().await.unwrap();
    assert!(idle.converged());

    let stats = watcher.stats().await.unwrap();
    assert_eq!(stats.sweeps, 3);
    assert_eq!(stats.actions_taken, 2);

    let log = std::fs::read_to_string(rt.config().decision_log_path()).unwrap();
    assert_eq!(log.lines().filter(|l| l.contains("spawn_worker")).count(), 2);

    watcher.stop().await;
    rt.shutdown().await;
}

/// **Given** a pending goal assigned to an agent that no longer exists
/// **When** the watcher sweeps
/// **Then** the assignment is cleared and exactly one new worker is spawned
#[tokio::test]
async fn given_orphaned_goal_when_sweeping_then_it_is_reassigned_within_one_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path(), approving_gateway("Summary prepared."));
    let project = rt.create_project("orphans").await.unwrap();
    let goal = rt
        .goals()
        .create(NewGoal::new(&project.id, "Summarize the meeting", ""))
        .await
        .unwrap();
    rt.goals().set_assignment(&goal.id, "ghost-agent").await.unwrap();
    let watcher = watcher::spawn(Arc::clone(&rt), &unique_name("watcher"), false)
        .await
        .unwrap();

    let report = watcher.sweep_now().await.unwrap();

    let taken: Vec<&WatcherAction> = report.taken_for(&project.id).collect();
    assert_eq!(taken.len(), 2);
    assert_eq!(
        taken[0],
        &WatcherAction::ClearAssignment {
            goal_id: goal.id.clone(),
            agent_id: "ghost-agent".to_string()
        }
    );
    assert_eq!(
        taken[1],
        &WatcherAction::SpawnWorker {
            goal_id: goal.id.clone()
        }
    );

    let reassigned = rt.goals().get(&goal.id).await.unwrap();
    assert!(reassigned.agent_id.is_some());
    assert_ne!(reassigned.agent_id.as_deref(), Some("ghost-agent"));

    watcher.stop().await;
    rt.shutdown().await;
}

/// **Given** an idle orchestrator still holding a pending goal
/// **When** the watcher sweeps twice within the cooldown window
/// **Then** the agent is nudged once
#[tokio::test]
async fn given_idle_agent_when_sweeping_repeatedly_then_it_is_nudged_once_per_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path(), approving_gateway("Still planning."));
    let project = rt.create_project("cooldown").await.unwrap();
    let goal = rt
        .goals()
        .create(NewGoal::new(&project.id, "Plan the quarter", ""))
        .await
        .unwrap();

    let lead = rt.spawn_orchestrator(&project.id, &[goal.id.clone()]).await.unwrap();
    let lead_id = lead.id().to_string();
    eventually("orchestrator answered", || {
        std::future::ready(
            rt.registry()
                .snapshot(&lead_id)
                .is_some_and(|s| s.is_idle() && s.messages.len() == 2),
        )
    })
    .await;

    let watcher = watcher::spawn(Arc::clone(&rt), &unique_name("watcher"), false)
        .await
        .unwrap();

    let first = watcher.sweep_now().await.unwrap();
    let taken: Vec<&WatcherAction> = first.taken_for(&project.id).collect();
    assert_eq!(taken.len(), 1);
    assert!(matches!(
        taken[0],
        WatcherAction::Rekick { agent_id, last_output: Some(output), .. }
            if agent_id == &lead_id && output == "Still planning."
    ));

    eventually("orchestrator answered the nudge", || {
        std::future::ready(
            rt.registry()
                .snapshot(&lead_id)
                .is_some_and(|s| s.is_idle() && s.messages.len() == 4),
        )
    })
    .await;
    let nudge = &rt.registry().snapshot(&lead_id).unwrap().messages[2];
    assert!(nudge.content.contains("Plan the quarter"));
    assert!(nudge.content.contains("work in progress"));

    let second = watcher.sweep_now().await.unwrap();
    assert_eq!(second.taken_for(&project.id).count(), 0);

    watcher.stop().await;
    rt.shutdown().await;
}

/// **Given** a paused project with ready work
/// **When** the watcher sweeps
/// **Then** the project is skipped
#[tokio::test]
async fn given_paused_project_when_sweeping_then_nothing_is_spawned() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path(), approving_gateway("unused"));
    let project = rt.create_project("paused").await.unwrap();
    rt.goals()
        .create(NewGoal::new(&project.id, "Outline the plan", ""))
        .await
        .unwrap();
    rt.projects()
        .set_status(&project.id, ProjectStatus::Paused)
        .await
        .unwrap();
    let watcher = watcher::spawn(Arc::clone(&rt), &unique_name("watcher"), false)
        .await
        .unwrap();

    let report = watcher.sweep_now().await.unwrap();

    assert_eq!(report.taken_for(&project.id).count(), 0);
    assert!(rt.registry().agents_for_project(&project.id).is_empty());

    watcher.stop().await;
    rt.shutdown().await;
}
