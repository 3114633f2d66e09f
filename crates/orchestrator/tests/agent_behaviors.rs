//! BDD integration tests for agent actors running against a scripted gateway.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{approving_gateway, eventually, runtime, test_config};
use orchestrator::agent::WORKER_PROMPT;
use orchestrator::agent::certify::EVIDENCE_NUDGE;
use orchestrator::review::REVIEW_PROMPT;
use orchestrator::{AgentConfig, AgentError, ExecutionMode, GoalStatus, NewGoal, Runtime, ToolPolicy};
use orchid_gateway::{ChatResponse, GatewayError, ModelConfig, Provider, ScriptedGateway, ToolCall};
use serde_json::json;

fn host_agent(dir: &std::path::Path, tools: ToolPolicy) -> AgentConfig {
    let mut config = AgentConfig::worker("unused", ModelConfig::new(Provider::Ollama, "m"))
        .with_execution(ExecutionMode::Host {
            workdir: dir.to_path_buf(),
        })
        .with_stream(false);
    config.project_id = None;
    config.tools = tools;
    config
}

/// **Given** a worker-policy agent
/// **When** the model calls an orchestrator-only tool
/// **Then** the call returns an error result and nothing is created
#[tokio::test]
async fn given_worker_policy_when_model_calls_create_goal_then_call_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::new();
    gateway.push_tool_calls(
        "",
        vec![ToolCall::new(
            "call-1",
            "create_goal",
            json!({"name": "Sneaky goal", "description": ""}),
        )],
    );
    gateway.push_text("I could not create the goal.");
    let rt = runtime(dir.path(), gateway);
    let project = rt.create_project("policy").await.unwrap();

    let agent = rt
        .spawn_agent(host_agent(dir.path(), ToolPolicy::Worker))
        .await
        .unwrap();
    let answer = agent.send_and_wait("Create a goal please.").await.unwrap();

    assert_eq!(answer, "I could not create the goal.");
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.tool_history.len(), 1);
    let record = &snapshot.tool_history[0];
    assert!(!record.ok);
    assert!(record.result.starts_with("Error:"));
    assert!(rt.goals().list(&project.id).await.unwrap().is_empty());

    rt.shutdown().await;
}

/// **Given** an agent working in a host directory
/// **When** the model writes and then reads a file
/// **Then** the file lands in that directory and the memory effect is applied
#[tokio::test]
async fn given_host_agent_when_model_uses_file_and_memory_tools_then_effects_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::new();
    gateway.push_tool_calls(
        "",
        vec![
            ToolCall::new(
                "call-1",
                "write_file",
                json!({"path": "notes/todo.txt", "content": "ship it\n"}),
            ),
            ToolCall::new(
                "call-2",
                "remember",
                json!({"key": "notes", "value": "notes/todo.txt"}),
            ),
        ],
    );
    gateway.push_tool_calls(
        "",
        vec![ToolCall::new("call-3", "read_file", json!({"path": "notes/todo.txt"}))],
    );
    gateway.push_text("Saved the notes.");
    let rt = runtime(dir.path(), gateway);

    let agent = rt
        .spawn_agent(host_agent(dir.path(), ToolPolicy::Worker))
        .await
        .unwrap();
    agent.send_and_wait("Write the notes.").await.unwrap();

    let written = std::fs::read_to_string(dir.path().join("notes/todo.txt")).unwrap();
    assert_eq!(written, "ship it\n");
    assert_eq!(
        agent.recall("notes").await.unwrap(),
        Some(json!("notes/todo.txt"))
    );
    let snapshot = agent.snapshot().await.unwrap();
    assert!(snapshot.tool_history.iter().all(|r| r.ok));
    assert_eq!(snapshot.tool_history[2].result, "ship it\n");

    rt.shutdown().await;
}

/// **Given** a sub-goal whose parent is held by an orchestrator
/// **When** the worker on the sub-goal hits a terminal gateway error
/// **Then** the sub-goal records the error, stays pending, and the
/// orchestrator is told
#[tokio::test]
async fn given_terminal_gateway_error_when_worker_runs_then_goal_and_parent_are_annotated() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::new().with_handler(|_, context| {
        if context.system_prompt == WORKER_PROMPT {
            Err(GatewayError::api(401, "invalid api key"))
        } else {
            Ok(ChatResponse::text("Noted."))
        }
    });
    let rt: Arc<Runtime> = runtime(dir.path(), gateway);
    let project = rt.create_project("failures").await.unwrap();
    let parent = rt
        .goals()
        .create(NewGoal::new(&project.id, "Ship the release", ""))
        .await
        .unwrap();
    let child = rt
        .goals()
        .create(NewGoal::new(&project.id, "Collect the changelog", "").with_parent(&parent.id))
        .await
        .unwrap();

    let lead = rt
        .spawn_agent(AgentConfig::orchestrator(
            &project.id,
            ModelConfig::new(Provider::Ollama, "m"),
            "You coordinate.",
        ))
        .await
        .unwrap();
    rt.goals().set_assignment(&parent.id, lead.id()).await.unwrap();

    let worker = rt.spawn_worker(&project.id, &child.id, None).await.unwrap();
    let worker_id = worker.id().to_string();

    eventually("worker stopped", || {
        std::future::ready(!rt.registry().is_alive(&worker_id))
    })
    .await;

    let child = rt.goals().get(&child.id).await.unwrap();
    assert_eq!(child.status, GoalStatus::Pending);
    assert!(child.error.as_deref().unwrap_or_default().contains("401"));

    let lead_id = lead.id().to_string();
    eventually("orchestrator notified", || {
        std::future::ready(rt.registry().snapshot(&lead_id).is_some_and(|s| {
            s.messages
                .iter()
                .any(|m| m.content.contains("failed on goal") && m.content.contains(&worker_id))
        }))
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    eventually("orchestrator idle", || {
        std::future::ready(rt.registry().snapshot(&lead_id).is_some_and(|s| !s.running))
    })
    .await;
    let snapshot = rt.registry().snapshot(&lead_id).unwrap();
    let mentions: usize = snapshot
        .messages
        .iter()
        .map(|m| m.content.matches(worker_id.as_str()).count())
        .sum();
    assert_eq!(mentions, 1, "the failure is reported once");

    rt.shutdown().await;
}

/// **Given** an agent blocked in a long shell command
/// **When** it is stopped while a caller waits
/// **Then** the waiter gets a stopped error instead of hanging
#[tokio::test]
async fn given_waiting_caller_when_agent_stops_then_wait_resolves_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::new();
    gateway.push_tool_calls(
        "",
        vec![ToolCall::new("call-1", "shell", json!({"command": "sleep 5"}))],
    );
    gateway.push_text("late");
    let rt = Runtime::builder(test_config(dir.path()))
        .with_gateway(Arc::new(gateway))
        .build()
        .unwrap();

    let agent = rt
        .spawn_agent(host_agent(dir.path(), ToolPolicy::Worker))
        .await
        .unwrap();
    let waiter = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.send_and_wait("Take your time.").await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    agent.stop(Some("operator".to_string())).unwrap();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(AgentError::Stopped(reason)) if reason == "operator"));

    rt.shutdown().await;
}

/// **Given** an agent whose model keeps calling tools
/// **When** the iteration budget runs out
/// **Then** the run ends with the last assistant text
#[tokio::test]
async fn given_tool_loop_when_iteration_budget_runs_out_then_last_text_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = ScriptedGateway::new();
    gateway.push_tool_calls(
        "Looking at the first file.",
        vec![ToolCall::new("call-1", "remember", json!({"key": "step", "value": 1}))],
    );
    gateway.push_tool_calls(
        "Looking at the second file.",
        vec![ToolCall::new("call-2", "remember", json!({"key": "step", "value": 2}))],
    );
    gateway.push_text("never requested");
    let rt = runtime(dir.path(), gateway);

    let agent = rt
        .spawn_agent(host_agent(dir.path(), ToolPolicy::Worker).with_max_iterations(2))
        .await
        .unwrap();
    let answer = agent.send_and_wait("Look around.").await.unwrap();

    assert_eq!(answer, "Looking at the second file.");
    let snapshot = agent.snapshot().await.unwrap();
    assert_eq!(snapshot.tool_history.len(), 2);
    assert_eq!(agent.recall("step").await.unwrap(), Some(json!(2)));

    rt.shutdown().await;
}

/// Counts worker requests and the ones answering the evidence reminder.
#[derive(Default)]
struct WorkerCalls {
    total: AtomicUsize,
    nudged: AtomicUsize,
}

/// **Given** a worker on an implementation goal that reports without edits
/// **When** its report reaches the evidence check twice
/// **Then** it is reminded once and the second report goes to review
#[tokio::test]
async fn given_report_without_evidence_when_worker_finishes_then_it_is_nudged_once() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(WorkerCalls::default());
    let seen = Arc::clone(&calls);
    let gateway = ScriptedGateway::new().with_handler(move |_, context| {
        if context.system_prompt == REVIEW_PROMPT {
            return Ok(ChatResponse::text(
                r#"{"completed": true, "summary": "Parser is in place.", "error": null}"#,
            ));
        }
        seen.total.fetch_add(1, Ordering::SeqCst);
        if context.messages.last().is_some_and(|m| m.content == EVIDENCE_NUDGE) {
            seen.nudged.fetch_add(1, Ordering::SeqCst);
        }
        Ok(ChatResponse::text("The parser is implemented."))
    });
    let rt = runtime(dir.path(), gateway);
    let project = rt.create_project("nudge").await.unwrap();
    let goal = rt
        .goals()
        .create(NewGoal::new(&project.id, "Implement the parser", ""))
        .await
        .unwrap();

    let worker = rt.spawn_worker(&project.id, &goal.id, None).await.unwrap();
    let worker_id = worker.id().to_string();
    eventually("worker stopped", || {
        std::future::ready(!rt.registry().is_alive(&worker_id))
    })
    .await;

    let goal = rt.goals().get(&goal.id).await.unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert!(goal.evidence_nudged);
    assert_eq!(calls.total.load(Ordering::SeqCst), 2);
    assert_eq!(calls.nudged.load(Ordering::SeqCst), 1);

    rt.shutdown().await;
}

/// **Given** a worker whose evidence came from an earlier run
/// **When** a later run on the same goal reports without edits
/// **Then** the earlier run's tool calls do not count and it is nudged
#[tokio::test]
async fn given_evidence_from_earlier_run_when_worker_reports_again_then_it_is_nudged() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(WorkerCalls::default());
    let reviews = Arc::new(AtomicUsize::new(0));
    let (seen, reviewed) = (Arc::clone(&calls), Arc::clone(&reviews));
    let gateway = ScriptedGateway::new().with_handler(move |_, context| {
        if context.system_prompt == REVIEW_PROMPT {
            let verdict = if reviewed.fetch_add(1, Ordering::SeqCst) == 0 {
                r#"{"completed": false, "summary": "Tests are missing.", "error": "no tests"}"#
            } else {
                r#"{"completed": true, "summary": "Done.", "error": null}"#
            };
            return Ok(ChatResponse::text(verdict));
        }
        if context.messages.last().is_some_and(|m| m.content == EVIDENCE_NUDGE) {
            seen.nudged.fetch_add(1, Ordering::SeqCst);
        }
        if seen.total.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(ChatResponse::with_tool_calls(
                "",
                vec![
                    ToolCall::new(
                        "call-1",
                        "write_file",
                        json!({"path": "src/parser.rs", "content": "pub fn parse() {}\n"}),
                    ),
                    ToolCall::new("call-2", "shell", json!({"command": "make test"})),
                ],
            ));
        }
        Ok(ChatResponse::text("The parser is implemented."))
    });
    let rt = runtime(dir.path(), gateway);
    let project = rt.create_project("evidence").await.unwrap();
    let goal = rt
        .goals()
        .create(NewGoal::new(&project.id, "Implement the parser", ""))
        .await
        .unwrap();

    let worker = rt.spawn_worker(&project.id, &goal.id, None).await.unwrap();
    let worker_id = worker.id().to_string();
    eventually("worker stopped", || {
        std::future::ready(!rt.registry().is_alive(&worker_id))
    })
    .await;

    let goal = rt.goals().get(&goal.id).await.unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert!(goal.evidence_nudged);
    assert_eq!(calls.nudged.load(Ordering::SeqCst), 1);
    assert_eq!(reviews.load(Ordering::SeqCst), 2);

    rt.shutdown().await;
}

/// **Given** a worker whose reports keep failing review
/// **When** the first rejection arrives
/// **Then** it gets exactly one corrective retry and then stops
#[tokio::test]
async fn given_rejecting_review_when_worker_reports_then_one_retry_then_stop() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(WorkerCalls::default());
    let reviews = Arc::new(AtomicUsize::new(0));
    let (seen, reviewed) = (Arc::clone(&calls), Arc::clone(&reviews));
    let gateway = ScriptedGateway::new().with_handler(move |_, context| {
        if context.system_prompt == REVIEW_PROMPT {
            reviewed.fetch_add(1, Ordering::SeqCst);
            return Ok(ChatResponse::text(
                r#"{"completed": false, "summary": "Action items are missing.", "error": "no action items"}"#,
            ));
        }
        seen.total.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::text("Here is the summary of the meeting."))
    });
    let rt = runtime(dir.path(), gateway);
    let project = rt.create_project("review").await.unwrap();
    let goal = rt
        .goals()
        .create(NewGoal::new(&project.id, "Summarize the meeting", ""))
        .await
        .unwrap();

    let worker = rt.spawn_worker(&project.id, &goal.id, None).await.unwrap();
    let worker_id = worker.id().to_string();
    eventually("worker stopped", || {
        std::future::ready(!rt.registry().is_alive(&worker_id))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.total.load(Ordering::SeqCst), 2);
    assert_eq!(reviews.load(Ordering::SeqCst), 2);
    let goal = rt.goals().get(&goal.id).await.unwrap();
    assert_eq!(goal.status, GoalStatus::Pending);
    assert_eq!(goal.review_retries, 1);
    assert!(goal.error.as_deref().unwrap_or_default().contains("no action items"));

    rt.shutdown().await;
}

/// **Given** a parent goal held by an orchestrator
/// **When** one of its sub-goals is completed
/// **Then** the orchestrator is told with the sub-goal's report
#[tokio::test]
async fn given_parent_with_orchestrator_when_sub_goal_completes_then_orchestrator_is_told() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(dir.path(), approving_gateway("Noted."));
    let project = rt.create_project("cascade").await.unwrap();
    let parent = rt
        .goals()
        .create(NewGoal::new(&project.id, "Ship the release", ""))
        .await
        .unwrap();
    let child = rt
        .goals()
        .create(NewGoal::new(&project.id, "Collect the changelog", "").with_parent(&parent.id))
        .await
        .unwrap();
    let lead = rt
        .spawn_agent(AgentConfig::orchestrator(
            &project.id,
            ModelConfig::new(Provider::Ollama, "m"),
            "You coordinate.",
        ))
        .await
        .unwrap();
    rt.goals().set_assignment(&parent.id, lead.id()).await.unwrap();

    rt.goals()
        .complete(&child.id, "Changelog has twelve entries.", None)
        .await
        .unwrap();

    let lead_id = lead.id().to_string();
    eventually("orchestrator told about the sub-goal", || {
        std::future::ready(rt.registry().snapshot(&lead_id).is_some_and(|s| {
            s.messages.iter().any(|m| {
                m.content.contains("Sub-goal \"Collect the changelog\"")
                    && m.content.contains("twelve entries")
            })
        }))
    })
    .await;

    rt.shutdown().await;
}
