//! Orchestrator configuration.
//!
//! Loaded from TOML with per-field defaults, then overridden from the
//! environment. Durations are written in seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use orchid_core::{Error, Result};
use orchid_gateway::{GatewayConfig, Provider, duration_secs};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root for project files, sandbox layers and the decision log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub review: ReviewSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            agent: AgentSettings::default(),
            gateway: GatewayConfig::default(),
            watcher: WatcherSettings::default(),
            sandbox: SandboxSettings::default(),
            review: ReviewSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
    }

    /// Load from `path` when given, else defaults, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Apply `ORCHID_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("ORCHID_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(url) = lookup("ORCHID_GATEWAY_URL") {
            if let Ok(parsed) = url.parse() {
                self.gateway.base_url = Some(parsed);
            }
        }

        if let Some(key) = lookup("ORCHID_API_KEY") {
            self.gateway.api_key = Some(key);
        }

        if let Some(model) = lookup("ORCHID_MODEL") {
            self.agent.model = model;
        }

        if let Some(runtime) = lookup("ORCHID_CONTAINER_RUNTIME") {
            self.sandbox.runtime = runtime;
        }

        self
    }

    /// Path of the append-only watcher decision log.
    pub fn decision_log_path(&self) -> PathBuf {
        self.data_dir.join("watcher.log")
    }
}

/// Defaults for spawned agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub provider: Provider,

    #[serde(default = "default_model")]
    pub model: String,

    /// Think/act iterations per invocation.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock limit for one tool call.
    #[serde(with = "duration_secs", default = "default_tool_timeout")]
    pub tool_timeout: Duration,

    /// How long a blocking send waits for the run to finish.
    #[serde(with = "duration_secs", default = "default_wait_timeout")]
    pub wait_timeout: Duration,

    /// Use the streaming endpoint so partial output shows in snapshots.
    #[serde(default = "default_true")]
    pub stream: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: default_model(),
            max_iterations: default_max_iterations(),
            tool_timeout: default_tool_timeout(),
            wait_timeout: default_wait_timeout(),
            stream: true,
        }
    }
}

/// How the watcher staffs a project that has no live agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnMode {
    /// One worker per ready root goal.
    #[default]
    Worker,
    /// One orchestrator agent holding every unassigned pending goal.
    Orchestrator,
}

impl std::fmt::Display for SpawnMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Orchestrator => write!(f, "orchestrator"),
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherSettings {
    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,

    /// Minimum time between two nudges of the same agent.
    #[serde(with = "duration_secs", default = "default_rekick_cooldown")]
    pub rekick_cooldown: Duration,

    /// Upper bound on live workers per project.
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,

    #[serde(default)]
    pub spawn_mode: SpawnMode,

    /// Title of the stored template used as the orchestrator system prompt.
    #[serde(default = "default_orchestrator_template")]
    pub orchestrator_template: String,

    /// Classify an idle agent's last output before re-kicking it.
    #[serde(default = "default_true")]
    pub summarize_before_rekick: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            rekick_cooldown: default_rekick_cooldown(),
            max_parallel_workers: default_max_parallel_workers(),
            spawn_mode: SpawnMode::default(),
            orchestrator_template: default_orchestrator_template(),
            summarize_before_rekick: true,
        }
    }
}

/// Sandbox settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// When false, agents run tools directly in the project files directory.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Container CLI binary (`docker` or `podman`).
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_image")]
    pub image: String,

    /// Liveness probes before the container is trusted.
    #[serde(default = "default_liveness_retries")]
    pub liveness_retries: u32,

    #[serde(with = "duration_secs", default = "default_liveness_interval")]
    pub liveness_interval: Duration,

    /// Default limit for commands run in the sandbox.
    #[serde(with = "duration_secs", default = "default_exec_timeout")]
    pub exec_timeout: Duration,

    /// Period of the lifecycle actor's health probe.
    #[serde(with = "duration_secs", default = "default_health_interval")]
    pub health_interval: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime: default_runtime(),
            image: default_image(),
            liveness_retries: default_liveness_retries(),
            liveness_interval: default_liveness_interval(),
            exec_timeout: default_exec_timeout(),
            health_interval: default_health_interval(),
        }
    }
}

/// Settings for the reviewer and summarizer passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSettings {
    /// Model for review passes; the agent model when unset.
    #[serde(default)]
    pub model: Option<String>,

    /// Characters of a report quoted in notifications.
    #[serde(default = "default_report_excerpt")]
    pub report_excerpt: usize,

    /// Attempts for review calls, including the first.
    #[serde(default = "default_review_attempts")]
    pub max_attempts: u32,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            model: None,
            report_excerpt: default_report_excerpt(),
            max_attempts: default_review_attempts(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".orchid")
}

fn default_model() -> String {
    "qwen2.5-coder:14b".to_string()
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_tool_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_wait_timeout() -> Duration {
    Duration::from_secs(660)
}

const fn default_true() -> bool {
    true
}

const fn default_interval() -> Duration {
    Duration::from_secs(10)
}

const fn default_rekick_cooldown() -> Duration {
    Duration::from_secs(300)
}

const fn default_max_parallel_workers() -> usize {
    1
}

fn default_orchestrator_template() -> String {
    "orchestrator".to_string()
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "debian:bookworm-slim".to_string()
}

const fn default_liveness_retries() -> u32 {
    5
}

const fn default_liveness_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_exec_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_report_excerpt() -> usize {
    500
}

const fn default_review_attempts() -> u32 {
    3
}
