//! Agent invocation.
//!
//! The [`AgentRunner`] trait decouples evaluation orchestration from the
//! actual agent backend (currently the `claude` CLI in headless mode). Tests
//! use scripted runners that return predetermined traces without spawning
//! processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::trace::ExecutionResult;
use crate::io::process::run_command_with_timeout;
use crate::io::settings::EvalSettings;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// Maximum time to wait for the agent to finish.
    pub timeout: Duration,
}

/// Why an agent run produced no usable trace.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to launch agent: {message}")]
    Launch { message: String },
    #[error("agent timed out after {timeout:?}")]
    TimedOut { timeout: Duration, stderr: String },
    #[error("agent exited with status {code:?}\nstderr: {stderr}\nstdout: {stdout}")]
    Exited {
        code: Option<i32>,
        stderr: String,
        stdout: String,
    },
    #[error("parsing agent output: {source}\nraw output: {raw}")]
    Decode {
        source: serde_json::Error,
        raw: String,
    },
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    /// Run the agent once and return its parsed trace.
    fn run(&self, request: &AgentRequest) -> Result<ExecutionResult, AgentError>;
}

/// Runner that spawns the `claude` CLI with skills loaded from the repository.
#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    settings: EvalSettings,
    plugin_dir: PathBuf,
}

impl ClaudeRunner {
    pub fn new(settings: EvalSettings, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            plugin_dir: plugin_dir.into(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Arguments passed after the configured agent command.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--output-format",
            "json",
            "--no-session-persistence",
            "--verbose",
            "--model",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.settings.model.clone());
        args.push("--plugin-dir".to_string());
        args.push(self.plugin_dir.display().to_string());
        args.push("--max-budget-usd".to_string());
        args.push(self.settings.max_budget_usd.clone());
        if self.settings.permission_bypass() {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args
    }

    fn command(&self, request: &AgentRequest) -> Result<Command, AgentError> {
        let (program, leading) =
            self.settings
                .agent_command
                .split_first()
                .ok_or_else(|| AgentError::Launch {
                    message: "agent command is empty".to_string(),
                })?;
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(self.args())
            .current_dir(&request.workdir);
        Ok(cmd)
    }
}

impl AgentRunner for ClaudeRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), model = %self.settings.model))]
    fn run(&self, request: &AgentRequest) -> Result<ExecutionResult, AgentError> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let cmd = self.command(request)?;

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.settings.output_limit_bytes,
        )
        .map_err(|err| AgentError::Launch {
            message: format!("{err:#}"),
        })?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(AgentError::TimedOut {
                timeout: request.timeout,
                stderr: output.stderr_lossy(),
            });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(AgentError::Exited {
                code: output.status.code(),
                stderr: output.stderr_lossy(),
                stdout: output.stdout_lossy(),
            });
        }

        let raw = output.stdout.bytes;
        match ExecutionResult::parse(request.prompt.clone(), raw.clone()) {
            Ok(result) => {
                debug!(events = result.events().len(), "parsed agent trace");
                Ok(result)
            }
            Err(source) => Err(AgentError::Decode {
                source,
                raw: String::from_utf8_lossy(&raw).into_owned(),
            }),
        }
    }
}
