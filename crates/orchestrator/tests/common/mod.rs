//! Shared fixtures for the orchestrator integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use orchestrator::review::{REVIEW_PROMPT, SUMMARY_PROMPT};
use orchestrator::{OrchestratorConfig, Runtime};
use orchid_gateway::{ChatResponse, ScriptedGateway};

/// Config for tests: no containers, streaming off, data under `dir`.
pub fn test_config(dir: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.data_dir = dir.to_path_buf();
    config.sandbox.enabled = false;
    config.agent.stream = false;
    config.gateway.retry = orchid_gateway::RetryPolicy::none();
    config.review.max_attempts = 1;
    config
}

/// A gateway that approves every review, classifies output as in progress
/// and answers agents with `reply`.
pub fn approving_gateway(reply: &'static str) -> ScriptedGateway {
    ScriptedGateway::new().with_handler(move |_, context| {
        let text = if context.system_prompt == REVIEW_PROMPT {
            r#"{"completed": true, "summary": "The work is done.", "error": null}"#
        } else if context.system_prompt == SUMMARY_PROMPT {
            "in_progress"
        } else {
            reply
        };
        Ok(ChatResponse::text(text))
    })
}

pub fn runtime(dir: &Path, gateway: ScriptedGateway) -> Arc<Runtime> {
    Runtime::builder(test_config(dir))
        .with_gateway(Arc::new(gateway))
        .build()
        .unwrap()
}

/// A registry name no other test uses.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {what}");
}
