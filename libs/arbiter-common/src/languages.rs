// Language profile table
// Maps a submitted language identifier to where its source lives and how
// long a single test may run.

use std::time::Duration;

/// Default per-test limit
pub const DEFAULT_TIME_LIMIT_MS: u64 = 2000;

/// JVM startup plus javac needs more headroom
pub const JVM_TIME_LIMIT_MS: u64 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    /// Canonical language key
    pub name: &'static str,
    pub source_file_name: &'static str,
    pub time_limit_ms: u64,
}

impl LanguageProfile {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

pub static PYTHON: LanguageProfile = LanguageProfile {
    name: "python",
    source_file_name: "main.py",
    time_limit_ms: DEFAULT_TIME_LIMIT_MS,
};

pub static JAVA: LanguageProfile = LanguageProfile {
    name: "java",
    source_file_name: "Main.java",
    time_limit_ms: JVM_TIME_LIMIT_MS,
};

pub static CPP: LanguageProfile = LanguageProfile {
    name: "cpp",
    source_file_name: "main.cpp",
    time_limit_ms: DEFAULT_TIME_LIMIT_MS,
};

pub static JAVASCRIPT: LanguageProfile = LanguageProfile {
    name: "javascript",
    source_file_name: "main.js",
    time_limit_ms: DEFAULT_TIME_LIMIT_MS,
};

/// Resolve a language identifier or one of its aliases.
///
/// Matching is exact (case-sensitive). Unknown identifiers yield `None`.
pub fn lookup(language: &str) -> Option<&'static LanguageProfile> {
    match language {
        "python" | "python3" => Some(&PYTHON),
        "java" => Some(&JAVA),
        "cpp" => Some(&CPP),
        "javascript" | "js" => Some(&JAVASCRIPT),
        _ => None,
    }
}

/// All accepted identifiers, aliases included
pub fn supported_identifiers() -> Vec<&'static str> {
    vec!["python", "python3", "java", "cpp", "javascript", "js"]
}
