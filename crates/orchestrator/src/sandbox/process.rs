//! Run an external process with a wall-clock limit.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecOutput, Result, SandboxError};

/// Run `program args..`, feeding `stdin` when given.
///
/// The child is killed when the limit expires.
pub async fn run_process(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    stdin: Option<String>,
    limit: Duration,
) -> Result<ExecOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .map_err(|e| SandboxError::runtime(format!("failed to start {program}: {e}")))?;

    let feed = child.stdin.take().zip(stdin);
    let run = async move {
        let write = async {
            if let Some((mut pipe, input)) = feed {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        if let Err(e) = written {
            debug!(program, error = %e, "Child did not take all of stdin");
        }
        output
    };

    match tokio::time::timeout(limit, run).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(program, exit_code, "Process finished");
            Ok(ExecOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Ok(Err(e)) => Err(SandboxError::from(e)),
        Err(_) => {
            warn!(program, limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX), "Process timed out, killed");
            Err(SandboxError::Timeout(limit))
        }
    }
}
