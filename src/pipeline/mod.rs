// src/pipeline/mod.rs
//! Chained subprocess execution.
//!
//! A [`Pipeline`] runs every stage as its own `sh -c` process, connecting
//! stage *i*'s stdout to stage *i+1*'s stdin with an OS pipe. All stages run
//! at the same time and [`Pipeline::run`] only returns once each of them has
//! exited, so callers never see a partial result.

use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{BackupError, Phase, Result};

const SHELL: &str = "sh";

/// One shell-level command in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    command: String,
    success_codes: Vec<i32>,
}

impl Stage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            success_codes: vec![0],
        }
    }

    /// Exit codes treated as success for this stage (default `[0]`).
    pub fn with_success_codes(mut self, codes: &[i32]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn accepts(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|code| self.success_codes.contains(&code))
    }
}

impl From<String> for Stage {
    fn from(command: String) -> Self {
        Stage::new(command)
    }
}

impl From<&str> for Stage {
    fn from(command: &str) -> Self {
        Stage::new(command)
    }
}

/// Outcome of a single stage, available once its process has exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub command: String,
    /// `None` when the process was killed by a signal or never started.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stderr: String,
}

impl StageResult {
    fn describe(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("exited with code {}", code),
            None => "did not exit normally".to_string(),
        };
        let stderr = self.stderr.trim_end();
        if stderr.is_empty() {
            format!("`{}` {}", self.command, status)
        } else {
            format!("`{}` {}\n{}", self.command, status, stderr)
        }
    }
}

/// Results of every stage of one pipeline run, in stage order.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    stages: Vec<StageResult>,
    stdout: Vec<u8>,
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        self.stages.iter().all(|stage| stage.success)
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    /// Output of the final stage.
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Diagnostics of every failing stage, newline-joined in stage order.
    pub fn error_messages(&self) -> String {
        self.stages
            .iter()
            .filter(|stage| !stage.success)
            .map(StageResult::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Stderr emitted by stages that nevertheless succeeded.
    pub fn warnings(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|stage| stage.success && !stage.stderr.trim().is_empty())
            .map(StageResult::describe)
            .collect()
    }

    /// Converts a failed run into the error for `phase`.
    pub fn ensure_success(self, phase: Phase) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(BackupError::pipeline_failure(phase, self.error_messages()))
        }
    }
}

/// Limits applied to a single run. The default runs to completion.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

enum Running {
    Spawned {
        pid: Option<u32>,
        handle: JoinHandle<io::Result<Output>>,
    },
    NotStarted(String),
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: impl Into<Stage>) -> &mut Self {
        self.stages.push(stage.into());
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs all stages concurrently and waits for every one of them.
    ///
    /// A failing stage does not stop its siblings. On timeout or cancellation
    /// every live stage is killed and no result is returned.
    pub async fn run(&self, options: &RunOptions) -> Result<PipelineResult> {
        if self.is_empty() {
            return Err(BackupError::EmptyPipeline);
        }

        let running = self.spawn_all();
        let live: Vec<_> = running
            .iter()
            .filter_map(|run| match run {
                Running::Spawned { pid, handle } => Some((*pid, handle.abort_handle())),
                Running::NotStarted(_) => None,
            })
            .collect();

        let deadline = async {
            match options.timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            result = self.collect(running) => Ok(result),
            _ = options.cancel.cancelled() => Err(BackupError::Cancelled),
            _ = deadline => Err(BackupError::TimedOut {
                after: options.timeout.unwrap_or_default(),
            }),
        };

        if outcome.is_err() {
            // Dropping a stage's wait future only kills its shell, so the
            // whole group goes first to reach anything the shell forked.
            for (pid, handle) in live {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                handle.abort();
            }
        }

        let result = outcome?;
        for warning in result.warnings() {
            warn!("{}", warning);
        }
        Ok(result)
    }

    fn spawn_all(&self) -> Vec<Running> {
        let last = self.stages.len() - 1;
        let mut upstream: Option<Stdio> = None;
        let mut running = Vec::with_capacity(self.stages.len());

        for (index, stage) in self.stages.iter().enumerate() {
            let mut command = Command::new(SHELL);
            command
                .arg("-c")
                .arg(stage.command())
                .stdin(upstream.take().unwrap_or_else(Stdio::null))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(unix)]
            command.process_group(0);

            debug!(stage = index, command = stage.command(), "Spawning pipeline stage");
            match command.spawn() {
                Ok(mut child) => {
                    if index < last {
                        // On failure the next stage reads nothing and fails on its own.
                        upstream = child
                            .stdout
                            .take()
                            .and_then(|stdout| TryInto::<Stdio>::try_into(stdout).ok());
                    }
                    running.push(Running::Spawned {
                        pid: child.id(),
                        handle: tokio::spawn(child.wait_with_output()),
                    });
                }
                Err(e) => {
                    running.push(Running::NotStarted(format!("Failed to spawn stage: {}", e)));
                }
            }
        }

        running
    }

    async fn collect(&self, running: Vec<Running>) -> PipelineResult {
        let last = self.stages.len() - 1;
        let mut stages = Vec::with_capacity(running.len());
        let mut stdout = Vec::new();

        for (index, (stage, run)) in self.stages.iter().zip(running).enumerate() {
            let failed = |message: String| StageResult {
                command: stage.command().to_string(),
                exit_code: None,
                success: false,
                stderr: message,
            };

            let result = match run {
                Running::NotStarted(message) => failed(message),
                Running::Spawned { handle, .. } => match handle.await {
                    Ok(Ok(output)) => {
                        if index == last {
                            stdout = output.stdout;
                        }
                        let exit_code = output.status.code();
                        StageResult {
                            command: stage.command().to_string(),
                            exit_code,
                            success: stage.accepts(exit_code),
                            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        }
                    }
                    Ok(Err(e)) => failed(format!("Failed to wait for stage: {}", e)),
                    Err(e) => failed(format!("Stage task failed: {}", e)),
                },
            };
            debug!(stage = index, exit_code = ?result.exit_code, success = result.success, "Pipeline stage exited");
            stages.push(result);
        }

        PipelineResult { stages, stdout }
    }
}

/// Sends SIGKILL to the process group led by the stage shell `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(group) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal and touches no memory of ours.
    if unsafe { libc::killpg(group, libc::SIGKILL) } != 0 {
        debug!(pid, error = %io::Error::last_os_error(), "Stage process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
