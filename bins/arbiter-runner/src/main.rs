mod capability;
mod runner;

use arbiter_common::types::ExecutionResult;
use capability::Capability;
use runner::Runner;
use std::path::PathBuf;
use tracing::{error, info};

/// Printed if the real result cannot be serialized
const FALLBACK_RESULT: &str = r#"{"verdict":"Judge Error","stdout":"","stderr":"Failed to serialize result","tests":[],"timeMs":0,"memoryKb":0}"#;

/// Runs inside the sandbox: `judge-runner <path/to/tests.json>`
///
/// Stdout carries exactly one JSON document, the judging result. All logs
/// go to stderr.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let payload_path = std::env::args_os().nth(1).map(PathBuf::from);
    let runner = Runner::new(Capability::from_env());

    // A panic in the judging task still has to end in a result on stdout
    let judging = tokio::spawn(async move {
        runner.judge_payload_file(payload_path.as_deref()).await
    });
    let result = match judging.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Judging task aborted");
            ExecutionResult::judge_error(format!("Runner crashed: {}", e))
        }
    };

    info!(
        verdict = %result.verdict,
        tests = result.tests.len(),
        time_ms = result.time_ms,
        "Judging finished"
    );
    emit(&result);
}

fn emit(result: &ExecutionResult) {
    match serde_json::to_string(result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!(error = %e, "Failed to serialize result");
            println!("{}", FALLBACK_RESULT);
        }
    }
}
