//! Low-cost model passes: reviewing a worker's report and classifying an
//! idle agent's last output.
//!
//! Neither pass can fail its caller. Gateway errors and malformed output
//! degrade to a not-completed verdict or an unknown classification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use orchid_gateway::{ChatContext, ChatMessage, LlmGateway, ModelConfig, RetryPolicy, chat_with_retry};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::goals::{Goal, excerpt};

/// System prompt of the review pass.
pub const REVIEW_PROMPT: &str = "You review a coding agent's work on a goal. \
Given the goal, the agent's final report and the files it changed, decide whether the goal is done. \
Answer with one JSON object and nothing else: \
{\"completed\": true|false, \"summary\": \"one or two sentences\", \"error\": \"what is missing, or null\"}";

/// System prompt of the classification pass.
pub const SUMMARY_PROMPT: &str = "Classify the state of a coding agent from its last message. \
Answer with exactly one word: completed, error, in_progress or unknown.";

/// Files listed in a review request.
const MAX_LISTED_FILES: usize = 100;

/// Characters of agent output sent to the classifier.
const CLASSIFY_CHARS: usize = 4_000;

/// Wall-clock limit for one classification call.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a review pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub completed: bool,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReviewVerdict {
    /// Verdict used when the review itself failed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            completed: false,
            summary: "review failed".to_string(),
            error: Some(error.into()),
        }
    }
}

/// Reviews a finished run against its goal.
#[derive(Clone)]
pub struct Reviewer {
    gateway: Arc<dyn LlmGateway>,
    model: ModelConfig,
    policy: RetryPolicy,
    excerpt_chars: usize,
}

impl fmt::Debug for Reviewer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reviewer").field("model", &self.model).finish_non_exhaustive()
    }
}

impl Reviewer {
    pub fn new(gateway: Arc<dyn LlmGateway>, model: ModelConfig, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            model,
            policy,
            excerpt_chars: 4_000,
        }
    }

    /// Judge `report` against `goal`, given the files the run changed.
    pub async fn review(&self, goal: &Goal, report: &str, changed: &[String]) -> ReviewVerdict {
        let mut files: Vec<&str> = changed.iter().take(MAX_LISTED_FILES).map(String::as_str).collect();
        if files.is_empty() {
            files.push("(none)");
        }
        let request = format!(
            "Goal: {}\n\n{}\n\nReport:\n{}\n\nChanged files:\n{}",
            goal.name,
            goal.description,
            excerpt(report, self.excerpt_chars),
            files.join("\n")
        );
        let context = ChatContext::new(REVIEW_PROMPT, vec![ChatMessage::user(request)]);

        let response =
            match chat_with_retry(self.gateway.as_ref(), &self.model, &context, &self.policy, None, |_| {}).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(goal_id = %goal.id, error = %e, "Review pass failed");
                    return ReviewVerdict::failed(e.to_string());
                }
            };

        let verdict = parse_verdict(&response.content);
        debug!(goal_id = %goal.id, completed = verdict.completed, "Review verdict");
        verdict
    }
}

/// Extract the first JSON object in `text` as a verdict.
pub fn parse_verdict(text: &str) -> ReviewVerdict {
    let parsed = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str::<ReviewVerdict>(&text[start..=end]).ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| ReviewVerdict::failed(format!("malformed reviewer output: {}", excerpt(text, 200))))
}

/// State of an agent, judged from its last output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Completed,
    Error,
    InProgress,
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Parse a one-word classification.
pub fn parse_classification(text: &str) -> Classification {
    let word = text.trim().to_lowercase();
    if word.contains("in_progress") || word.contains("in progress") {
        Classification::InProgress
    } else if word.contains("completed") {
        Classification::Completed
    } else if word.contains("error") {
        Classification::Error
    } else {
        Classification::Unknown
    }
}

/// Classifies an idle agent's last output before a re-kick.
#[derive(Clone)]
pub struct Summarizer {
    gateway: Arc<dyn LlmGateway>,
    model: ModelConfig,
    timeout: Duration,
}

impl fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summarizer").field("model", &self.model).finish_non_exhaustive()
    }
}

impl Summarizer {
    pub fn new(gateway: Arc<dyn LlmGateway>, model: ModelConfig) -> Self {
        Self {
            gateway,
            model,
            timeout: CLASSIFY_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One gateway call, no retries. A failed or slow call is `Unknown`.
    pub async fn classify(&self, output: &str) -> Classification {
        let context = ChatContext::new(
            SUMMARY_PROMPT,
            vec![ChatMessage::user(excerpt(output, CLASSIFY_CHARS))],
        );
        match tokio::time::timeout(self.timeout, self.gateway.chat(&self.model, &context)).await {
            Ok(Ok(response)) => parse_classification(&response.content),
            Ok(Err(e)) => {
                debug!(error = %e, "Classification failed");
                Classification::Unknown
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Classification timed out");
                Classification::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use orchid_gateway::{ChatResponse, GatewayError, Provider, ScriptedGateway};

    use super::*;
    use crate::goals::GoalStatus;

    fn goal() -> Goal {
        Goal {
            id: "g1".to_string(),
            project_id: "p".to_string(),
            name: "Add a parser".to_string(),
            description: "Implement parse() in src/parser.rs".to_string(),
            status: GoalStatus::Pending,
            depends_on: Default::default(),
            parent_goal_id: None,
            agent_id: None,
            report: None,
            summary: None,
            error: None,
            evidence_nudged: false,
            review_retries: 0,
        }
    }

    fn model() -> ModelConfig {
        ModelConfig::new(Provider::Ollama, "small")
    }

    #[test]
    fn should_extract_verdict_from_surrounding_text() {
        let verdict = parse_verdict("Sure.\n```json\n{\"completed\": true, \"summary\": \"done\", \"error\": null}\n```");
        assert!(verdict.completed);
        assert_eq!(verdict.summary, "done");
        assert_eq!(verdict.error, None);
    }

    #[test]
    fn should_degrade_malformed_verdicts() {
        let verdict = parse_verdict("looks good to me");
        assert!(!verdict.completed);
        assert!(verdict.error.unwrap().starts_with("malformed reviewer output"));
    }

    #[test]
    fn should_parse_classifications() {
        assert_eq!(parse_classification("Completed."), Classification::Completed);
        assert_eq!(parse_classification(" in_progress "), Classification::InProgress);
        assert_eq!(parse_classification("ERROR"), Classification::Error);
        assert_eq!(parse_classification("maybe"), Classification::Unknown);
    }

    #[tokio::test]
    async fn given_gateway_error_when_reviewing_then_verdict_is_not_completed() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_error(GatewayError::api(401, "bad key"));
        let reviewer = Reviewer::new(gateway.clone(), model(), RetryPolicy::none());

        let verdict = reviewer.review(&goal(), "did it", &[]).await;

        assert!(!verdict.completed);
        assert!(verdict.error.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn given_changed_files_when_reviewing_then_request_lists_them() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_text("{\"completed\": true, \"summary\": \"parser added\"}");
        let reviewer = Reviewer::new(gateway.clone(), model(), RetryPolicy::none());

        let verdict = reviewer
            .review(&goal(), "added parse()", &["src/parser.rs".to_string()])
            .await;

        assert!(verdict.completed);
        let (_, context) = gateway.requests().pop().unwrap();
        assert_eq!(context.system_prompt, REVIEW_PROMPT);
        assert!(context.messages[0].content.contains("src/parser.rs"));
    }

    #[tokio::test]
    async fn given_gateway_error_when_classifying_then_unknown() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_error(GatewayError::EmptyResponse);
        let summarizer = Summarizer::new(gateway, model());
        assert_eq!(summarizer.classify("stuff").await, Classification::Unknown);
    }

    /// A gateway that never answers.
    struct Silent;

    #[async_trait::async_trait]
    impl LlmGateway for Silent {
        async fn chat(&self, _config: &ModelConfig, _context: &ChatContext) -> orchid_gateway::Result<ChatResponse> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn given_silent_gateway_when_classifying_then_unknown_after_timeout() {
        let summarizer = Summarizer::new(Arc::new(Silent), model()).with_timeout(Duration::from_millis(50));

        let classification = tokio::time::timeout(Duration::from_secs(5), summarizer.classify("stuff"))
            .await
            .unwrap();

        assert_eq!(classification, Classification::Unknown);
    }
}
