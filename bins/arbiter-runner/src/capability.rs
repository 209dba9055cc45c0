// Compile/run capability
// The per-language script that knows how to build and execute a program is
// external to the runner; this module only invokes it under a deadline and
// maps what happened onto the reserved exit-status contract.

use arbiter_common::evaluator::{EXIT_JUDGE_FAULT, EXIT_TIME_LIMIT_EXCEEDED};
use arbiter_common::process::{Deadline, DEFAULT_OUTPUT_LIMIT_BYTES};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Script baked into the runner image
pub const DEFAULT_RUN_SCRIPT: &str = "/runner/run.sh";

/// Result of one capability invocation, already mapped to the exit contract
#[derive(Debug, Clone)]
pub struct Invocation {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub time_ms: u64,
}

impl Invocation {
    /// An invocation that never got to run the program
    pub fn judge_fault(message: impl Into<String>) -> Self {
        let mut stderr = message.into();
        stderr.push_str("\nJUDGE RUNTIME ERROR\n");
        Self {
            exit_code: EXIT_JUDGE_FAULT,
            stdout: String::new(),
            stderr,
            time_ms: 0,
        }
    }
}

/// Invokes `<program> [args..] <language> <source> <input>`
#[derive(Debug, Clone)]
pub struct Capability {
    program: PathBuf,
    args: Vec<String>,
    /// Cap on each captured stream of one test
    output_limit: usize,
}

impl Capability {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output_limit: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Script path from `RUN_SCRIPT` and capture cap from
    /// `OUTPUT_LIMIT_BYTES`, falling back to the image defaults
    pub fn from_env() -> Self {
        let script =
            std::env::var("RUN_SCRIPT").unwrap_or_else(|_| DEFAULT_RUN_SCRIPT.to_string());
        let capability = Self::new(script, Vec::new());

        match std::env::var("OUTPUT_LIMIT_BYTES").map(|v| v.trim().parse::<usize>()) {
            Ok(Ok(bytes)) if bytes > 0 => capability.with_output_limit(bytes),
            Ok(_) => {
                warn!("Ignoring invalid OUTPUT_LIMIT_BYTES, using the default");
                capability
            }
            Err(_) => capability,
        }
    }

    /// Compile and run one test case, killing it once `limit` elapses.
    ///
    /// Never fails: a timeout becomes exit 124 and a spawn failure exit 500,
    /// each with an annotation appended to stderr.
    pub async fn invoke(
        &self,
        language: &str,
        source: &Path,
        input: &Path,
        limit: Duration,
    ) -> Invocation {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(language).arg(source).arg(input);

        let deadline = Deadline::new(limit).output_limit(self.output_limit);
        let output = match deadline.run(command).await {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    program = %self.program.display(),
                    error = %e,
                    "Failed to start compile/run capability"
                );
                return Invocation::judge_fault(String::new());
            }
        };

        let time_ms = output.elapsed_ms();
        if output.timed_out() {
            warn!(
                time_ms,
                limit_ms = limit.as_millis() as u64,
                "Test exceeded its time limit, capability killed"
            );
            let mut stderr = output.stderr;
            stderr.push_str("\nTIME LIMIT EXCEEDED\n");
            return Invocation {
                exit_code: EXIT_TIME_LIMIT_EXCEEDED,
                stdout: output.stdout,
                stderr,
                time_ms,
            };
        }

        let exit_code = output.exit_code().unwrap_or(EXIT_JUDGE_FAULT);
        debug!(exit_code, time_ms, truncated = output.truncated, "Capability finished");
        Invocation {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            time_ms,
        }
    }
}
