//! Append-only, human-readable record of watcher decisions.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Outcome column of a decision line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Taken,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DecisionLog {
    path: PathBuf,
}

impl DecisionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are logged and otherwise ignored.
    pub async fn record(&self, project_id: &str, decision: &str, outcome: Outcome, detail: Option<&str>) {
        let marker = match outcome {
            Outcome::Taken => "ok",
            Outcome::Failed => "FAILED",
        };
        let mut line = format!(
            "{} project={project_id} {marker} {decision}",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        );
        if let Some(detail) = detail {
            line.push_str(": ");
            line.push_str(&detail.replace('\n', " "));
        }
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write decision log");
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
