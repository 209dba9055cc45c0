/// Orchestrator - Host-Side Judging Entry Point
///
/// **Responsibility:**
/// Turn one `ExecutionRequest` into one `ExecutionResult`, whatever happens.
///
/// **Flow:**
/// 1. Refuse malformed or oversized requests without launching anything
/// 2. Create a fresh working area and write `tests.json` into it
/// 3. Launch one sandbox bound to the outer wall-clock limit
/// 4. Parse the sandbox's stdout as the result contract
/// 5. Remove the working area (on every path, via `TempDir`'s drop)
///
/// Any fault along the way becomes a `Judge Error` result; nothing is
/// returned to the caller as an error.

use crate::sandbox::{Sandbox, SandboxOutcome, PAYLOAD_FILE};
use anyhow::{Context, Result};
use arbiter_common::languages::supported_identifiers;
use arbiter_common::types::{ExecutionRequest, ExecutionResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Safety limits to prevent pathological inputs from reaching a sandbox
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// How much raw sandbox output to keep in a Judge Error diagnostic
const MAX_DIAGNOSTIC_BYTES: usize = 4096;

#[derive(Clone)]
pub struct Orchestrator {
    sandbox: Arc<dyn Sandbox>,
    work_root: PathBuf,
    wall_timeout: Duration,
}

impl Orchestrator {
    pub fn new(sandbox: Arc<dyn Sandbox>, work_root: PathBuf, wall_timeout: Duration) -> Self {
        Self {
            sandbox,
            work_root,
            wall_timeout,
        }
    }

    /// Judge a submission. Never fails; infrastructure faults come back as
    /// `Judge Error`.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        if let Err(e) = request.validate() {
            warn!(
                language = %request.language,
                reason = %e,
                supported = ?supported_identifiers(),
                "Rejected request before launch"
            );
            return e.into();
        }
        if let Err(reason) = check_sizes(request) {
            warn!(language = %request.language, reason = %reason, "Rejected oversized request");
            return ExecutionResult::judge_error(reason);
        }

        let started = Instant::now();
        let result = match self.run_sandboxed(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    sandbox = self.sandbox.name(),
                    error = %format!("{:#}", e),
                    "Sandbox run failed"
                );
                ExecutionResult::judge_error(format!("Sandbox failure: {:#}", e))
            }
        };

        info!(
            language = %request.language,
            test_count = request.test_cases.len(),
            tests_run = result.tests.len(),
            verdict = %result.verdict,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Judging completed"
        );
        result
    }

    async fn run_sandboxed(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        // Removed when dropped, including on early `?` returns and panics
        let work_area = tempfile::Builder::new()
            .prefix("arbiter-")
            .tempdir_in(&self.work_root)
            .with_context(|| {
                format!("Failed to create working area in {}", self.work_root.display())
            })?;

        let payload = serde_json::to_vec(request).context("Failed to serialize request")?;
        tokio::fs::write(work_area.path().join(PAYLOAD_FILE), payload)
            .await
            .context("Failed to write request payload")?;

        debug!(
            sandbox = self.sandbox.name(),
            work_area = %work_area.path().display(),
            "Launching sandbox"
        );

        let outcome = self
            .sandbox
            .launch(work_area.path(), self.wall_timeout)
            .await?;
        let result = fold_outcome(outcome, self.wall_timeout);

        let path = work_area.path().to_path_buf();
        if let Err(e) = work_area.close() {
            warn!(work_area = %path.display(), error = %e, "Failed to remove working area");
        }

        Ok(result)
    }
}

fn check_sizes(request: &ExecutionRequest) -> std::result::Result<(), String> {
    if request.code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(format!(
            "Source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        ));
    }
    if let Some(position) = request
        .test_cases
        .iter()
        .position(|tc| tc.input.len() > MAX_TEST_INPUT_BYTES)
    {
        return Err(format!(
            "Input of test case {} exceeds maximum size of {} bytes",
            position + 1,
            MAX_TEST_INPUT_BYTES
        ));
    }
    Ok(())
}

/// Interpret what a sandbox produced.
///
/// A complete result on stdout is trusted even if the sandbox then exited
/// non-zero or ran into the wall clock; anything else is a Judge Error that
/// carries the raw output for diagnosis.
pub fn fold_outcome(outcome: SandboxOutcome, wall_timeout: Duration) -> ExecutionResult {
    match outcome {
        SandboxOutcome::Exited {
            exit_code,
            stdout,
            stderr,
        } => match parse_result(&stdout) {
            Some(result) => {
                if exit_code != 0 {
                    warn!(exit_code, "Sandbox exited non-zero after emitting a result");
                }
                result
            }
            None => {
                warn!(exit_code, "Sandbox produced no valid result");
                ExecutionResult::judge_error(diagnostic(
                    &format!("Sandbox produced no valid result (exit code {})", exit_code),
                    &stdout,
                    &stderr,
                ))
            }
        },
        SandboxOutcome::TimedOut { stdout, stderr } => match parse_result(&stdout) {
            Some(result) => {
                warn!("Sandbox hit the wall-clock limit after emitting a result");
                result
            }
            None => ExecutionResult::judge_error(diagnostic(
                &format!(
                    "Sandbox exceeded wall-clock limit of {}ms and was killed",
                    wall_timeout.as_millis()
                ),
                &stdout,
                &stderr,
            )),
        },
    }
}

fn parse_result(stdout: &str) -> Option<ExecutionResult> {
    let payload = stdout.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(result) => Some(result),
        Err(e) => {
            debug!(error = %e, "Sandbox stdout is not a result payload");
            None
        }
    }
}

fn diagnostic(headline: &str, stdout: &str, stderr: &str) -> String {
    let mut message = headline.to_string();
    if !stdout.is_empty() {
        message.push_str("\n--- sandbox stdout ---\n");
        message.push_str(truncate(stdout));
    }
    if !stderr.is_empty() {
        message.push_str("\n--- sandbox stderr ---\n");
        message.push_str(truncate(stderr));
    }
    message
}

fn truncate(text: &str) -> &str {
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text;
    }
    let mut end = MAX_DIAGNOSTIC_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
