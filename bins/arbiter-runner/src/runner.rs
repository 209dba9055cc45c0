/// Sandbox Runner - Fail-Fast Test Loop
///
/// **Core Responsibility:**
/// Judge one submission inside the sandbox and produce exactly one
/// `ExecutionResult`.
///
/// **Flow:**
/// 1. Validate the payload (language, code, testCases); refuse before any I/O
/// 2. Write the source once, then each test's input to its own file
/// 3. Invoke the compile/run capability per test, strictly in order
/// 4. Stop at the first test that does not pass
///
/// Every fault is folded into the result. Nothing here returns an error or
/// writes to stdout; `main` prints the returned value once.

use crate::capability::{Capability, Invocation};
use anyhow::{Context, Result};
use arbiter_common::evaluator::evaluate_test;
use arbiter_common::languages::LanguageProfile;
use arbiter_common::types::{
    ExecutionRequest, ExecutionResult, PayloadError, TestCase, TestResult, TestStatus, Verdict,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct Runner {
    capability: Capability,
}

impl Runner {
    pub fn new(capability: Capability) -> Self {
        Self { capability }
    }

    /// Judge the `tests.json` at `payload_path`. Its directory is the
    /// working area for source and input files.
    pub async fn judge_payload_file(&self, payload_path: Option<&Path>) -> ExecutionResult {
        let Some(path) = payload_path else {
            warn!("No payload path given");
            return PayloadError::MissingPath.into();
        };

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read payload");
                return PayloadError::Unreadable.into();
            }
        };

        let work_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.judge(&raw, work_dir).await
    }

    /// Judge a raw JSON payload using `work_dir` for scratch files
    pub async fn judge(&self, raw: &str, work_dir: &Path) -> ExecutionResult {
        match ExecutionRequest::from_json(raw) {
            Ok((request, profile)) => self.run_tests(&request, profile, work_dir).await,
            Err(e) => {
                warn!(reason = %e, "Rejected payload");
                e.into()
            }
        }
    }

    /// Run test cases in order until one fails
    pub async fn run_tests(
        &self,
        request: &ExecutionRequest,
        profile: &LanguageProfile,
        work_dir: &Path,
    ) -> ExecutionResult {
        info!(
            language = %request.language,
            profile = profile.name,
            test_count = request.test_cases.len(),
            time_limit_ms = profile.time_limit_ms,
            "Judging submission"
        );

        let source_path = work_dir.join(profile.source_file_name);
        let mut transcript = Transcript::default();

        for (position, test_case) in request.test_cases.iter().enumerate() {
            let index = position + 1;

            let invocation = match stage(request, position, &source_path, work_dir).await {
                Ok(input_path) => {
                    self.capability
                        .invoke(&request.language, &source_path, &input_path, profile.time_limit())
                        .await
                }
                Err(e) => {
                    warn!(index, error = %e, "Failed to stage test files");
                    Invocation::judge_fault(format!("{e:#}"))
                }
            };

            let verdict =
                evaluate_test(invocation.exit_code, &invocation.stdout, &test_case.expected_output);
            debug!(
                index,
                exit_code = invocation.exit_code,
                verdict = %verdict,
                time_ms = invocation.time_ms,
                "Test evaluated"
            );

            transcript.record(index, test_case, invocation, verdict);

            if !verdict.is_accepted() {
                info!(index, verdict = %verdict, "Stopping at first failed test");
                return transcript.finish(verdict);
            }
        }

        transcript.finish(Verdict::Accepted)
    }
}

/// Write the source (first test only) and this test's input file
async fn stage(
    request: &ExecutionRequest,
    position: usize,
    source_path: &Path,
    work_dir: &Path,
) -> Result<PathBuf> {
    if position == 0 {
        tokio::fs::write(source_path, &request.code)
            .await
            .with_context(|| format!("Failed to write source to {}", source_path.display()))?;
    }

    let input_path = work_dir.join(format!("input_{position}.txt"));
    tokio::fs::write(&input_path, &request.test_cases[position].input)
        .await
        .with_context(|| format!("Failed to write input to {}", input_path.display()))?;

    Ok(input_path)
}

/// Accumulates per-test results and the labeled output streams
#[derive(Default)]
struct Transcript {
    stdout: String,
    stderr: String,
    tests: Vec<TestResult>,
    time_ms: u64,
}

impl Transcript {
    fn record(
        &mut self,
        index: usize,
        test_case: &TestCase,
        invocation: Invocation,
        verdict: Verdict,
    ) {
        self.stdout
            .push_str(&format!("# Testcase {}\n{}\n", index, invocation.stdout));
        if !invocation.stderr.is_empty() {
            self.stderr
                .push_str(&format!("# Testcase {}\n{}\n", index, invocation.stderr));
        }
        self.time_ms += invocation.time_ms;

        let (status, reason) = if verdict.is_accepted() {
            (TestStatus::Passed, String::new())
        } else {
            (TestStatus::Failed, verdict.to_string())
        };

        self.tests.push(TestResult {
            index,
            input: test_case.input.clone(),
            expected_output: test_case.expected_output.clone(),
            actual_output: invocation.stdout,
            status,
            reason,
            time_ms: invocation.time_ms,
        });
    }

    fn finish(self, verdict: Verdict) -> ExecutionResult {
        ExecutionResult {
            verdict,
            stdout: self.stdout,
            stderr: self.stderr,
            tests: self.tests,
            time_ms: self.time_ms,
            memory_kb: 0,
        }
    }
}
