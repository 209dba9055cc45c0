// End-to-end checks against the built judge-runner binary

#![cfg(unix)]

use arbiter_common::types::{ExecutionRequest, ExecutionResult, TestCase, Verdict};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn judge_runner() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_judge-runner"));
    command.env_remove("RUST_LOG").env_remove("OUTPUT_LIMIT_BYTES");
    command
}

/// Executable stand-in for run.sh
fn run_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("run.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn write_payload(dir: &Path, language: &str, code: &str, cases: Vec<TestCase>) -> PathBuf {
    let path = dir.join("tests.json");
    let request = ExecutionRequest::new(language, code, cases);
    std::fs::write(&path, serde_json::to_vec(&request).unwrap()).unwrap();
    path
}

/// Stdout must be exactly one line holding one result
fn single_result(output: &Output) -> ExecutionResult {
    assert!(output.status.success(), "runner exited with {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "stdout was: {stdout}");
    serde_json::from_str(lines[0]).unwrap()
}

#[test]
fn test_no_argument() {
    let output = judge_runner().output().unwrap();

    let result = single_result(&output);
    assert_eq!(result.verdict, Verdict::JudgeError);
    assert_eq!(result.stderr, "tests.json path not provided");
    assert!(result.tests.is_empty());
}

#[test]
fn test_unreadable_payload() {
    let work = TempDir::new().unwrap();
    let output = judge_runner()
        .arg(work.path().join("tests.json"))
        .output()
        .unwrap();

    let result = single_result(&output);
    assert_eq!(result.verdict, Verdict::JudgeError);
    assert_eq!(result.stderr, "Failed to read or parse tests.json");
}

#[test]
fn test_unsupported_language() {
    let work = TempDir::new().unwrap();
    let payload = write_payload(work.path(), "cobol", "DISPLAY 1", vec![TestCase::new("", "1")]);

    let output = judge_runner().arg(&payload).output().unwrap();

    let result = single_result(&output);
    assert_eq!(result.verdict, Verdict::JudgeError);
    assert_eq!(result.stderr, "Unsupported language: cobol");
    assert!(!work.path().join("input_0.txt").exists());
}

#[test]
fn test_accepted_run_logs_only_to_stderr() {
    let scripts = TempDir::new().unwrap();
    let script = run_script(scripts.path(), r#"cat "$3""#);
    let work = TempDir::new().unwrap();
    let payload = write_payload(
        work.path(),
        "python",
        "print(input())",
        vec![TestCase::new("3\n", "3"), TestCase::new("hello\n", "hello\n")],
    );

    let output = judge_runner()
        .arg(&payload)
        .env("RUN_SCRIPT", &script)
        .env("RUST_LOG", "debug")
        .output()
        .unwrap();

    let result = single_result(&output);
    assert_eq!(result.verdict, Verdict::Accepted);
    assert_eq!(result.tests.len(), 2);
    assert_eq!(result.stdout, "# Testcase 1\n3\n\n# Testcase 2\nhello\n\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Judging submission"));
    assert!(work.path().join("main.py").exists());
}

#[test]
fn test_flooding_submission_still_yields_one_result() {
    let scripts = TempDir::new().unwrap();
    let script = run_script(scripts.path(), "yes");
    let work = TempDir::new().unwrap();
    let payload = write_payload(
        work.path(),
        "python",
        "while 1: print('y')",
        vec![TestCase::new("", "y")],
    );

    let output = judge_runner()
        .arg(&payload)
        .env("RUN_SCRIPT", &script)
        .env("OUTPUT_LIMIT_BYTES", "4096")
        .output()
        .unwrap();

    let result = single_result(&output);
    assert_eq!(result.verdict, Verdict::TimeLimitExceeded);
    assert_eq!(result.tests.len(), 1);
    assert_eq!(result.tests[0].actual_output.len(), 4096);
    assert!(output.stdout.len() < 64 * 1024);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_wall_clock_kill_reaches_running_test() {
    use arbiter_common::process::{Deadline, KillScope};
    use std::time::Duration;

    let scripts = TempDir::new().unwrap();
    let script = run_script(scripts.path(), "echo $$ > \"$PIDFILE\"\nwhile :; do :; done");
    let work = TempDir::new().unwrap();
    let pid_file = work.path().join("run.pid");
    // java's 4s per-test limit outlasts the wall clock below
    let payload = write_payload(work.path(), "java", "class Main {}", vec![TestCase::new("", "")]);

    let mut command = tokio::process::Command::new(env!("CARGO_BIN_EXE_judge-runner"));
    command
        .arg(&payload)
        .env("RUN_SCRIPT", &script)
        .env("PIDFILE", &pid_file)
        .env_remove("RUST_LOG");

    // Same bounds the judge's process sandbox applies to a local runner
    let output = Deadline::new(Duration::from_millis(1500))
        .kill_scope(KillScope::Session)
        .run(command)
        .await
        .unwrap();
    assert!(output.timed_out());

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    let stat_path = format!("/proc/{}/stat", pid.trim());
    let mut alive = true;
    for _ in 0..40 {
        alive = match std::fs::read_to_string(&stat_path) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map_or(false, |(_, rest)| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        };
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive, "run script {} outlived the runner", pid.trim());
}
