// Judge service configuration
// Defaults, optionally replaced by a JSON file (JUDGE_CONFIG), then
// overridden field by field from environment variables.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which sandbox implementation runs the judge-runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One resource-capped container per request
    Docker,
    /// Local child process, no isolation
    Process,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "process" => Ok(BackendKind::Process),
            other => Err(format!(
                "unknown sandbox backend '{}' (expected docker or process)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Docker => write!(f, "docker"),
            BackendKind::Process => write!(f, "process"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub port: u16,
    pub backend: BackendKind,
    pub runner_image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    /// Outer bound on one whole sandboxed run
    pub wall_timeout_ms: u64,
    /// Parent directory for ephemeral working areas; system temp dir if unset
    pub work_root: Option<PathBuf>,
    /// judge-runner executable used by the process backend
    pub runner_bin: PathBuf,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            backend: BackendKind::Docker,
            runner_image: "arbiter-runner:latest".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            pids_limit: 64,
            wall_timeout_ms: 20_000,
            work_root: None,
            runner_bin: PathBuf::from("judge-runner"),
        }
    }
}

impl JudgeConfig {
    /// Load from `JUDGE_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("JUDGE_CONFIG") {
            Ok(path) => Self::load_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Judge config file not found: {}", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply environment-style overrides through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_BACKEND") {
            self.backend = v
                .parse()
                .map_err(|e: String| anyhow!("Invalid SANDBOX_BACKEND: {}", e))?;
        }
        if let Some(v) = lookup("RUNNER_IMAGE") {
            self.runner_image = v;
        }
        if let Some(v) = lookup("SANDBOX_MEMORY_MB") {
            self.memory_limit_mb = parse_var("SANDBOX_MEMORY_MB", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_CPU_LIMIT") {
            self.cpu_limit = parse_var("SANDBOX_CPU_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_PIDS_LIMIT") {
            self.pids_limit = parse_var("SANDBOX_PIDS_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SANDBOX_WALL_TIMEOUT_MS") {
            self.wall_timeout_ms = parse_var("SANDBOX_WALL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("WORK_ROOT") {
            self.work_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("RUNNER_BIN") {
            self.runner_bin = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be greater than 0");
        }
        if self.cpu_limit.is_nan() || self.cpu_limit <= 0.0 {
            bail!("cpu_limit must be greater than 0");
        }
        if self.wall_timeout_ms == 0 {
            bail!("wall_timeout_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn work_root(&self) -> PathBuf {
        self.work_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn wall_timeout(&self) -> Duration {
        Duration::from_millis(self.wall_timeout_ms)
    }

    /// Memory ceiling in bytes, as Docker expects it
    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    /// CPU share in units of 1e-9 CPUs
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", name, value, e))
}
