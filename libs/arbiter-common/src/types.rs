use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::languages::{self, LanguageProfile};

/// Terminal classification of one judging run.
///
/// Serialized with the human-readable names the result payload carries
/// (`"Wrong Answer"`, `"Time Limit Exceeded"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Compilation Error")]
    CompilationError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Judge Error")]
    JudgeError,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::CompilationError => "Compilation Error",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::JudgeError => "Judge Error",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub input: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub expected_output: String,
}

/// `null` reads like an absent field; other non-string values are rejected
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// A submission to judge. This is also the `tests.json` payload handed to
/// the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    pub test_cases: Vec<TestCase>,
}

/// Why a request was refused before anything was executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("tests.json path not provided")]
    MissingPath,
    #[error("Failed to read or parse tests.json")]
    Unreadable,
    #[error("Invalid payload: missing language/code/testCases")]
    Invalid,
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl ExecutionRequest {
    pub fn new(
        language: impl Into<String>,
        code: impl Into<String>,
        test_cases: Vec<TestCase>,
    ) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            test_cases,
        }
    }

    /// Parse a raw payload and run it through [`ExecutionRequest::validate`].
    ///
    /// Parsing is deliberately loose about shape so that a payload which is
    /// valid JSON but lacks a field maps to [`PayloadError::Invalid`] rather
    /// than [`PayloadError::Unreadable`].
    pub fn from_json(raw: &str) -> Result<(Self, &'static LanguageProfile), PayloadError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| PayloadError::Unreadable)?;

        let text_field = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        let language = text_field("language").ok_or(PayloadError::Invalid)?;
        let code = text_field("code").ok_or(PayloadError::Invalid)?;
        let test_cases = match value.get("testCases") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| serde_json::from_value::<TestCase>(item.clone()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| PayloadError::Invalid)?,
            _ => return Err(PayloadError::Invalid),
        };

        let request = Self {
            language,
            code,
            test_cases,
        };
        let profile = request.validate()?;
        Ok((request, profile))
    }

    /// Check the request can be judged and resolve its language profile.
    pub fn validate(&self) -> Result<&'static LanguageProfile, PayloadError> {
        if self.language.is_empty() || self.code.is_empty() {
            return Err(PayloadError::Invalid);
        }
        languages::lookup(&self.language)
            .ok_or_else(|| PayloadError::UnsupportedLanguage(self.language.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// 1-based position of the test case in the request
    pub index: usize,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub status: TestStatus,
    /// Failure classification, empty when the test passed
    pub reason: String,
    pub time_ms: u64,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// The single structured result of a judging run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub verdict: Verdict,
    pub stdout: String,
    pub stderr: String,
    pub tests: Vec<TestResult>,
    pub time_ms: u64,
    /// Reserved; memory is not measured
    pub memory_kb: u64,
}

impl ExecutionResult {
    /// A `Judge Error` result with no tests, carrying `stderr` as diagnostics.
    pub fn judge_error(stderr: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::JudgeError,
            stdout: String::new(),
            stderr: stderr.into(),
            tests: Vec::new(),
            time_ms: 0,
            memory_kb: 0,
        }
    }
}

impl From<PayloadError> for ExecutionResult {
    fn from(err: PayloadError) -> Self {
        ExecutionResult::judge_error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_serializes_to_display_name() {
        let json = serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"Time Limit Exceeded\"");

        let back: Verdict = serde_json::from_str("\"Wrong Answer\"").unwrap();
        assert_eq!(back, Verdict::WrongAnswer);
        assert_eq!(Verdict::CompilationError.to_string(), "Compilation Error");
    }

    #[test]
    fn test_result_uses_camel_case_contract() {
        let result = ExecutionResult {
            verdict: Verdict::Accepted,
            stdout: "# Testcase 1\n3\n\n".to_string(),
            stderr: String::new(),
            tests: vec![TestResult {
                index: 1,
                input: "1 2\n".to_string(),
                expected_output: "3\n".to_string(),
                actual_output: "3\n".to_string(),
                status: TestStatus::Passed,
                reason: String::new(),
                time_ms: 12,
            }],
            time_ms: 12,
            memory_kb: 0,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["verdict"], "Accepted");
        assert_eq!(value["memoryKb"], 0);
        assert_eq!(value["timeMs"], 12);
        assert_eq!(value["tests"][0]["expectedOutput"], "3\n");
        assert_eq!(value["tests"][0]["actualOutput"], "3\n");
        assert_eq!(value["tests"][0]["status"], "passed");
    }

    #[test]
    fn test_from_json_accepts_complete_payload() {
        let raw = r#"{"language":"python","code":"print(1)",
            "testCases":[{"input":"","expectedOutput":"1"}]}"#;
        let (request, profile) = ExecutionRequest::from_json(raw).unwrap();

        assert_eq!(request.language, "python");
        assert_eq!(request.test_cases.len(), 1);
        assert_eq!(profile.source_file_name, "main.py");
    }

    #[test]
    fn test_from_json_defaults_missing_case_fields() {
        let raw = r#"{"language":"cpp","code":"int main(){}","testCases":[{}]}"#;
        let (request, _) = ExecutionRequest::from_json(raw).unwrap();

        assert_eq!(request.test_cases[0], TestCase::default());
    }

    #[test]
    fn test_from_json_rejects_missing_test_cases() {
        let raw = r#"{"language":"python","code":"print(1)"}"#;
        assert_eq!(
            ExecutionRequest::from_json(raw).unwrap_err(),
            PayloadError::Invalid
        );

        let raw = r#"{"language":"python","code":"print(1)","testCases":"nope"}"#;
        assert_eq!(
            ExecutionRequest::from_json(raw).unwrap_err(),
            PayloadError::Invalid
        );
    }

    #[test]
    fn test_from_json_reads_null_case_fields_as_empty() {
        let raw = r#"{"language":"python","code":"x",
            "testCases":[{"input":null,"expectedOutput":"1"}]}"#;
        let (request, _) = ExecutionRequest::from_json(raw).unwrap();

        assert_eq!(request.test_cases[0], TestCase::new("", "1"));
    }

    #[test]
    fn test_from_json_rejects_non_string_case_fields() {
        for case in [r#"{"input":5}"#, r#"{"expectedOutput":12}"#, r#"{"input":["1"]}"#] {
            let raw = format!(r#"{{"language":"python","code":"x","testCases":[{case}]}}"#);
            assert_eq!(
                ExecutionRequest::from_json(&raw).unwrap_err(),
                PayloadError::Invalid,
                "case: {case}"
            );
        }
    }

    #[test]
    fn test_from_json_rejects_empty_code() {
        let raw = r#"{"language":"python","code":"","testCases":[]}"#;
        assert_eq!(
            ExecutionRequest::from_json(raw).unwrap_err(),
            PayloadError::Invalid
        );
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert_eq!(
            ExecutionRequest::from_json("{not json").unwrap_err(),
            PayloadError::Unreadable
        );
    }

    #[test]
    fn test_unsupported_language_is_named() {
        let request = ExecutionRequest::new("cobol", "DISPLAY 'HI'.", vec![]);
        let err = request.validate().unwrap_err();

        assert_eq!(err, PayloadError::UnsupportedLanguage("cobol".to_string()));
        assert_eq!(err.to_string(), "Unsupported language: cobol");

        let result = ExecutionResult::from(err);
        assert_eq!(result.verdict, Verdict::JudgeError);
        assert!(result.tests.is_empty());
    }
}
