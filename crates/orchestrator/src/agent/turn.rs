//! One detached iteration: a gateway round trip plus the tool calls it names.
//!
//! The iteration runs on its own task and reports back to the owning actor
//! with messages; it never touches actor state. If the actor has stopped in
//! the meantime the final message goes nowhere.

use std::sync::Arc;

use orchid_gateway::{ChatContext, ChatMessage, ChatResponse, GatewayError, chat_with_retry};
use ractor::ActorRef;
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

use super::config::AgentConfig;
use super::messages::AgentMessage;
use super::state::AgentStatus;
use crate::runtime::Runtime;
use crate::tools::{ToolContext, ToolExecution, dispatch};

/// Result of one iteration.
#[derive(Debug)]
pub enum IterationOutcome {
    /// No tool calls: the run is over.
    Terminal { response: ChatResponse },
    /// Tool calls ran; the loop continues.
    ToolsExecuted {
        response: ChatResponse,
        executions: Vec<ToolExecution>,
    },
    /// Terminal gateway error, after retries.
    Failed { error: GatewayError },
}

/// Everything an iteration needs, copied out of actor state.
pub struct IterationInput {
    pub run_id: u64,
    pub agent_id: String,
    pub config: Arc<AgentConfig>,
    pub messages: Vec<ChatMessage>,
    pub memory: im::OrdMap<String, Value>,
    pub attached: Vec<String>,
    pub runtime: Arc<Runtime>,
}

/// Run an iteration on a new task.
pub fn spawn_iteration(input: IterationInput, myself: ActorRef<AgentMessage>) {
    let span = info_span!("agent_run", agent_id = %input.agent_id, run_id = input.run_id);
    tokio::spawn(
        async move {
            let run_id = input.run_id;
            let outcome = run_iteration(input, &myself).await;
            if myself
                .send_message(AgentMessage::IterationFinished { run_id, outcome })
                .is_err()
            {
                debug!("Agent stopped before the iteration finished");
            }
        }
        .instrument(span),
    );
}

async fn run_iteration(input: IterationInput, myself: &ActorRef<AgentMessage>) -> IterationOutcome {
    let run_id = input.run_id;
    let status = |status: AgentStatus| {
        let _ = myself.send_message(AgentMessage::StatusUpdate { run_id, status });
    };
    status(AgentStatus::Thinking);

    let context = build_context(&input).await;
    let model = input.config.model_config();
    let settings = input.runtime.config();

    let chunk_target = myself.clone();
    let on_chunk = move |text: &str| {
        let _ = chunk_target.send_message(AgentMessage::Chunk {
            run_id,
            text: text.to_string(),
        });
    };
    let stream: Option<&(dyn for<'a> Fn(&'a str) + Send + Sync)> = if input.config.stream {
        Some(&on_chunk)
    } else {
        None
    };

    let response = chat_with_retry(
        input.runtime.gateway().as_ref(),
        &model,
        &context,
        &settings.gateway.retry,
        stream,
        |notice| {
            status(AgentStatus::Retrying {
                attempt: notice.attempt,
                max: notice.max_attempts,
                code: notice.code.clone(),
            });
        },
    )
    .await;

    let response = match response {
        Ok(response) => response,
        Err(error) => return IterationOutcome::Failed { error },
    };
    if response.calls().is_empty() {
        return IterationOutcome::Terminal { response };
    }

    status(AgentStatus::ExecutingTool {
        names: response.calls().iter().map(|c| c.name.clone()).collect(),
    });

    let ctx = ToolContext::new(
        input.agent_id.clone(),
        Arc::clone(&input.config),
        input.memory.clone(),
        Arc::clone(&input.runtime),
        settings.agent.tool_timeout,
    );
    let tools = input.runtime.tools();
    let mut executions = Vec::with_capacity(response.calls().len());
    for call in response.calls() {
        executions.push(dispatch(tools.as_ref(), call, &ctx).await);
    }

    IterationOutcome::ToolsExecuted {
        response,
        executions,
    }
}

/// System prompt, attached objects, transcript, memory and tool schemas.
async fn build_context(input: &IterationInput) -> ChatContext {
    let mut context = ChatContext::new(input.config.system_prompt.clone(), input.messages.clone());
    context.memory = input
        .memory
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    context.tools = input.runtime.tools().specs(&input.config.tools);

    let mut sections = Vec::new();
    for object_id in &input.attached {
        match input.runtime.store().get(object_id).await {
            Ok(object) => sections.push(format!("### {} ({})\n\n{}", object.title, object.kind, object.content)),
            Err(e) => warn!(object_id = %object_id, error = %e, "Attached object is gone"),
        }
    }
    context.attachments = sections.join("\n\n");
    context
}
