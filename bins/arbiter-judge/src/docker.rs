/// Docker Sandbox - One Container per Submission
///
/// **Docker Execution Rules:**
/// 1. Pulls the runner image if not present
/// 2. Creates a container with security constraints:
///    - Network disabled
///    - CPU share, memory ceiling (no extra swap) and pids limit enforced
///    - All capabilities dropped, no-new-privileges
///    - Runs as the owner of the working area
/// 3. Bind-mounts the working area at `/runner/work`
/// 4. Runs `judge-runner /runner/work/tests.json`
/// 5. Captures stdout/stderr from the container log stream
/// 6. Kills the container when the wall-clock limit fires
/// 7. Removes the container on every path via a drop guard

use crate::config::JudgeConfig;
use crate::sandbox::{Sandbox, SandboxOutcome, PAYLOAD_FILE};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the working area is mounted inside the container
pub const SANDBOX_WORK_DIR: &str = "/runner/work";

/// Runner entry point inside the image
pub const RUNNER_COMMAND: &str = "judge-runner";

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Drop cannot be async; removal runs on the runtime in the background
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            match docker.remove_container(&container_id, Some(remove_options)).await {
                Ok(_) => debug!(container_id = %container_id, "Sandbox container removed"),
                Err(e) => warn!(
                    container_id = %container_id,
                    error = %e,
                    "Failed to remove sandbox container"
                ),
            }
        });
    }
}

/// Image and resource caps applied to every sandbox container
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    pub image: String,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
}

impl SandboxLimits {
    pub fn from_config(config: &JudgeConfig) -> Self {
        Self {
            image: config.runner_image.clone(),
            memory_bytes: config.memory_limit_bytes(),
            nano_cpus: config.nano_cpus(),
            pids_limit: config.pids_limit,
        }
    }
}

/// Container configuration for one judging run
///
/// `user` is a `uid:gid` pair so files the runner writes stay removable by
/// the host.
pub fn container_config(
    limits: &SandboxLimits,
    work_dir: &Path,
    user: Option<String>,
) -> Config<String> {
    let payload = format!("{}/{}", SANDBOX_WORK_DIR, PAYLOAD_FILE);

    Config {
        image: Some(limits.image.clone()),
        cmd: Some(vec![RUNNER_COMMAND.to_string(), payload]),
        user,
        working_dir: Some(SANDBOX_WORK_DIR.to_string()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true), // SECURITY: No network access
        host_config: Some(HostConfig {
            memory: Some(limits.memory_bytes),
            memory_swap: Some(limits.memory_bytes),
            nano_cpus: Some(limits.nano_cpus),
            pids_limit: Some(limits.pids_limit),
            binds: Some(vec![format!("{}:{}:rw", work_dir.display(), SANDBOX_WORK_DIR)]),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            network_mode: Some("none".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Docker-backed sandbox
pub struct DockerSandbox {
    docker: Docker,
    limits: SandboxLimits,
}

impl DockerSandbox {
    /// Connect to the local Docker daemon and make sure the runner image exists
    pub async fn connect(config: &JudgeConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        docker
            .ping()
            .await
            .context("Docker daemon is not responding")?;

        let sandbox = Self {
            docker,
            limits: SandboxLimits::from_config(config),
        };
        sandbox.ensure_image().await?;

        info!(
            image = %sandbox.limits.image,
            memory_bytes = sandbox.limits.memory_bytes,
            nano_cpus = sandbox.limits.nano_cpus,
            "Docker sandbox ready"
        );
        Ok(sandbox)
    }

    /// Ensure the runner image is available (pull if needed)
    async fn ensure_image(&self) -> Result<()> {
        let image = self.limits.image.as_str();
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image cache hit: {}", image);
            return Ok(());
        }

        warn!("Image cache miss: {} (pulling now)", image);

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull runner image")?;
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }

    async fn kill(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = %container_id, error = %e, "Failed to kill timed-out container");
        }
    }
}

#[cfg(unix)]
fn owner_of(path: &Path) -> Result<Option<String>> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat working area {}", path.display()))?;
    Ok(Some(format!("{}:{}", meta.uid(), meta.gid())))
}

#[cfg(not(unix))]
fn owner_of(_path: &Path) -> Result<Option<String>> {
    Ok(None)
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, work_dir: &Path, wall_timeout: Duration) -> Result<SandboxOutcome> {
        let container_name = format!("arbiter-{}", uuid::Uuid::new_v4());
        let config = container_config(&self.limits, work_dir, owner_of(work_dir)?);

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create sandbox container")?;
        let container_id = container.id;

        // CRITICAL: guard right after creation so every later path removes it
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let started = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start sandbox container")?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        let run = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = Some(WaitContainerOptions {
                condition: "not-running",
            });
            let mut wait_stream = self.docker.wait_container(&container_id, wait_options);
            match wait_stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // bollard reports a non-zero exit as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    Ok(code)
                }
                Some(Err(e)) => {
                    Err(anyhow::Error::new(e).context("Failed waiting for sandbox container"))
                }
                None => bail!("No wait response from sandbox container"),
            }
        };

        let finished = tokio::time::timeout(wall_timeout, run).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match finished {
            Ok(exit_code) => {
                let exit_code = exit_code?;
                debug!(
                    container = %container_name,
                    exit_code,
                    elapsed_ms,
                    "Sandbox container exited"
                );
                Ok(SandboxOutcome::Exited {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            Err(_) => {
                warn!(
                    container = %container_name,
                    wall_timeout_ms = wall_timeout.as_millis() as u64,
                    "Sandbox exceeded wall-clock limit - killing container"
                );
                self.kill(&container_id).await;
                Ok(SandboxOutcome::TimedOut { stdout, stderr })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SandboxLimits {
        SandboxLimits::from_config(&JudgeConfig::default())
    }

    #[test]
    fn test_container_is_locked_down() {
        let config = container_config(
            &limits(),
            Path::new("/tmp/arbiter-x"),
            Some("1000:1000".to_string()),
        );
        let host = config.host_config.unwrap();

        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
    }

    #[test]
    fn test_work_area_is_mounted_for_runner() {
        let config = container_config(&limits(), Path::new("/tmp/arbiter-x"), None);

        assert_eq!(
            config.host_config.unwrap().binds,
            Some(vec!["/tmp/arbiter-x:/runner/work:rw".to_string()])
        );
        assert_eq!(
            config.cmd,
            Some(vec!["judge-runner".to_string(), "/runner/work/tests.json".to_string()])
        );
        assert_eq!(config.image.as_deref(), Some("arbiter-runner:latest"));
    }

    /// Requires a Docker daemon and the runner image
    #[tokio::test]
    #[ignore]
    async fn test_docker_sandbox_round_trip() {
        use crate::orchestrator::Orchestrator;
        use arbiter_common::types::{ExecutionRequest, TestCase, Verdict};
        use std::sync::Arc;

        let config = JudgeConfig::default();
        let sandbox = DockerSandbox::connect(&config)
            .await
            .expect("Failed to connect to Docker");
        let orchestrator =
            Orchestrator::new(Arc::new(sandbox), config.work_root(), config.wall_timeout());

        let request = ExecutionRequest::new(
            "python",
            "a, b = map(int, input().split())\nprint(a + b)\n",
            vec![TestCase::new("5 7\n", "12\n"), TestCase::new("1 2\n", "3\n")],
        );
        let result = orchestrator.execute(&request).await;

        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.tests.len(), 2);
    }

    /// Requires a Docker daemon and the runner image
    #[tokio::test]
    #[ignore]
    async fn test_docker_sandbox_time_limit() {
        use crate::orchestrator::Orchestrator;
        use arbiter_common::types::{ExecutionRequest, TestCase, Verdict};
        use std::sync::Arc;

        let config = JudgeConfig::default();
        let sandbox = DockerSandbox::connect(&config)
            .await
            .expect("Failed to connect to Docker");
        let orchestrator =
            Orchestrator::new(Arc::new(sandbox), config.work_root(), config.wall_timeout());

        let request = ExecutionRequest::new(
            "python",
            "while True:\n    pass\n",
            vec![TestCase::new("", "")],
        );
        let result = orchestrator.execute(&request).await;

        assert_eq!(result.verdict, Verdict::TimeLimitExceeded);
        assert!(result.tests[0].time_ms >= 2000);
    }
}
