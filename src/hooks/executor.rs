//! Shell execution for command hooks and command-backed stages.
//!
//! Commands run through `sh -c` in the change root, receive the JSON context
//! on stdin and are killed if they outlive their timeout.

use super::types::{HookCheck, HookContext, HookOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Everything needed to run one shell command.
pub struct ShellRequest<'a> {
    pub command: &'a str,
    pub working_dir: &'a Path,
    pub env: Vec<(&'static str, String)>,
    pub stdin: String,
    pub timeout: Duration,
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// The most useful text for a message: stderr if present, else stdout.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            self.stdout.trim().to_string()
        }
    }
}

/// Run a command, returning `None` if it timed out.
pub async fn run_shell(request: &ShellRequest<'_>) -> Result<Option<ShellOutput>> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(request.command)
        .current_dir(request.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &request.env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn command: {}", request.command))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A command that never reads stdin closes the pipe early; that is fine.
        let _ = stdin.write_all(request.stdin.as_bytes()).await;
    }

    let output = match timeout(request.timeout, child.wait_with_output()).await {
        Ok(result) => result.context("Failed to wait for command")?,
        Err(_) => return Ok(None),
    };

    Ok(Some(ShellOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }))
}

/// A hook check backed by a shell command.
///
/// Exit codes: 0 = success, 2 = warning, anything else = error.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    pub command: String,
    pub timeout: Duration,
    /// Relative paths resolve against the change root
    pub working_dir: Option<PathBuf>,
}

impl CommandCheck {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            working_dir: None,
        }
    }

    fn resolve_working_dir(&self, ctx: &HookContext) -> PathBuf {
        match &self.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => ctx.change_root.join(dir),
            None => ctx.change_root.clone(),
        }
    }
}

#[async_trait]
impl HookCheck for CommandCheck {
    async fn check(&self, ctx: &HookContext) -> Result<HookOutcome> {
        let working_dir = self.resolve_working_dir(ctx);
        let stdin =
            serde_json::to_string(ctx).context("Failed to serialize hook context to JSON")?;

        tracing::debug!(
            command = %self.command,
            stage = %ctx.stage,
            timeout_secs = self.timeout.as_secs(),
            "executing command hook"
        );

        let request = ShellRequest {
            command: &self.command,
            working_dir: &working_dir,
            env: vec![
                ("CHANGEFLOW_CHANGE", ctx.change_id.clone()),
                ("CHANGEFLOW_STAGE", ctx.stage.clone()),
                ("CHANGEFLOW_LANE", ctx.lane.to_string()),
            ],
            stdin,
            timeout: self.timeout,
        };

        let Some(output) = run_shell(&request).await? else {
            return Ok(HookOutcome::error(format!(
                "Hook timed out after {} seconds",
                self.timeout.as_secs()
            )));
        };

        let detail = output.detail();
        let outcome = match output.exit_code {
            0 => HookOutcome::success(),
            2 => HookOutcome::warning(if detail.is_empty() {
                "Hook returned a warning".to_string()
            } else {
                detail.clone()
            }),
            code => HookOutcome::error(if detail.is_empty() {
                format!("Hook exited with code {}", code)
            } else {
                detail.clone()
            }),
        };

        Ok(match outcome.message {
            None if !detail.is_empty() => outcome.with_message(detail),
            _ => outcome,
        })
    }
}
