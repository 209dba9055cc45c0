/// Test Evaluator - Exit Status and Output Classification
///
/// **Core Responsibility:**
/// Turn the raw outcome of one compile/run invocation into a verdict.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or processes
/// - Knows nothing about language runtimes
/// - Pure function: (exit code, actual output, expected output) → verdict
///
/// **Exit Status Contract (with the compile/run capability):**
/// - `0`   → ran to completion, compare output
/// - `100` → compilation error
/// - `101` → runtime error
/// - `124` → time limit exceeded (raised by the runner's own kill)
/// - anything else → judge error
///
/// **Normalization Rules:**
/// - Trim leading and trailing whitespace of the whole payload: YES
/// - Per-line whitespace normalization: NO
/// - Case sensitivity: YES (exact match required)

use crate::types::Verdict;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_COMPILATION_ERROR: i32 = 100;
pub const EXIT_RUNTIME_ERROR: i32 = 101;
pub const EXIT_TIME_LIMIT_EXCEEDED: i32 = 124;
/// Reported when the capability could not be started at all
pub const EXIT_JUDGE_FAULT: i32 = 500;

/// Normalize output string for comparison
///
/// Only the ends are trimmed; internal whitespace and blank lines are kept.
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Classify a reserved exit status. Returns `None` for a clean exit, which
/// still needs its output compared.
pub fn classify_exit(exit_code: i32) -> Option<Verdict> {
    match exit_code {
        EXIT_SUCCESS => None,
        EXIT_COMPILATION_ERROR => Some(Verdict::CompilationError),
        EXIT_RUNTIME_ERROR => Some(Verdict::RuntimeError),
        EXIT_TIME_LIMIT_EXCEEDED => Some(Verdict::TimeLimitExceeded),
        _ => Some(Verdict::JudgeError),
    }
}

/// Evaluate a single test case
///
/// Exit status takes priority; output is only compared after a clean exit.
/// `Verdict::Accepted` means the test passed.
pub fn evaluate_test(exit_code: i32, actual: &str, expected: &str) -> Verdict {
    if let Some(verdict) = classify_exit(exit_code) {
        return verdict;
    }

    if normalize_output(actual) == normalize_output(expected) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}
