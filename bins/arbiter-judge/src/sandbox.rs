/// Sandbox backends
///
/// A sandbox runs `judge-runner <work_dir>/tests.json` in isolation and hands
/// back whatever it printed. It does not interpret the output; that is the
/// orchestrator's job.
///
/// Every backend enforces the outer wall-clock limit itself and must kill
/// the whole sandbox (not ask it to stop) when the limit fires.

use crate::config::{BackendKind, JudgeConfig};
use crate::docker::DockerSandbox;
use anyhow::{Context, Result};
use arbiter_common::process::{Deadline, KillScope};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Request payload file name inside the working area
pub const PAYLOAD_FILE: &str = "tests.json";

/// Cap on what a locally spawned runner may print; its own per-test caps
/// keep a well-behaved result far below this
const RUNNER_OUTPUT_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// What came out of one sandbox run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// The sandbox process ended on its own
    Exited {
        exit_code: i64,
        stdout: String,
        stderr: String,
    },
    /// The wall-clock limit fired and the sandbox was killed; output is
    /// whatever had been captured by then
    TimedOut { stdout: String, stderr: String },
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the judge-runner against `work_dir`, killing it after `wall_timeout`.
    ///
    /// `Err` means the sandbox could not be set up or launched at all.
    async fn launch(&self, work_dir: &Path, wall_timeout: Duration) -> Result<SandboxOutcome>;
}

/// Build the backend selected in configuration
pub async fn from_config(config: &JudgeConfig) -> Result<Arc<dyn Sandbox>> {
    match config.backend {
        BackendKind::Docker => {
            let sandbox = DockerSandbox::connect(config).await?;
            Ok(Arc::new(sandbox))
        }
        BackendKind::Process => {
            warn!("Process sandbox provides NO isolation - use only in trusted environments");
            Ok(Arc::new(ProcessSandbox::new(config.runner_bin.clone(), Vec::new())))
        }
    }
}

/// Runs the judge-runner as a plain child process leading its own session.
///
/// The runner moves every test into a process group of its own, so the
/// wall-clock kill sweeps the whole session rather than one group. Only the
/// wall-clock limit is enforced; there are no CPU, memory or filesystem
/// restrictions.
pub struct ProcessSandbox {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, work_dir: &Path, wall_timeout: Duration) -> Result<SandboxOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(work_dir.join(PAYLOAD_FILE))
            .current_dir(work_dir);

        let output = Deadline::new(wall_timeout)
            .output_limit(RUNNER_OUTPUT_LIMIT_BYTES)
            .kill_scope(KillScope::Session)
            .run(command)
            .await
            .with_context(|| {
                format!("Failed to spawn sandbox process {}", self.program.display())
            })?;

        debug!(
            elapsed_ms = output.elapsed_ms(),
            exit_code = ?output.exit_code(),
            "Sandbox process finished"
        );

        if output.timed_out() {
            return Ok(SandboxOutcome::TimedOut {
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(SandboxOutcome::Exited {
            exit_code: output.exit_code().map_or(-1, i64::from),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
