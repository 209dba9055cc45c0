/// Deadline-bounded child processes
///
/// **Core Responsibility:**
/// Spawn one child, race its exit against a timer, and SIGKILL it (and
/// everything it started) when the timer wins.
///
/// Both cancellation layers are built on this: the runner's per-test limit
/// around the compile/run capability, and the host's wall-clock limit around
/// a locally spawned sandbox. The child is never asked to stop; it is killed.
///
/// On unix the child is placed in its own process group so the kill also
/// reaches grandchildren (an interpreter started by a wrapper script, a
/// backgrounded `sleep`, ...). A child that itself puts work into separate
/// process groups (the runner does, once per test) needs
/// [`KillScope::Session`] instead.
///
/// Captured output is capped per stream. Bytes past the cap are read and
/// discarded so a chatty child never stalls on a full pipe.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for pipes to drain once the child is gone
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Per-stream capture cap unless configured otherwise
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 8 * 1024 * 1024;

/// Passes over the session when killing it; members may fork mid-sweep
#[cfg(target_os = "linux")]
const SESSION_SWEEPS: usize = 5;

/// Which processes the kill reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillScope {
    /// The child's own process group
    ProcessGroup,
    /// A new session led by the child, including members that moved to
    /// process groups of their own. Falls back to the process group where
    /// sessions cannot be enumerated.
    Session,
}

/// Raw outcome of one deadline-bounded process
#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the deadline fired and the process was killed
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    /// Either stream hit the capture cap
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.map(exit_code)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Flatten an exit status into a shell-style code: signals map to 128 + n.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// How one child is bounded: wall time, captured output and kill reach
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    limit: Duration,
    output_limit: usize,
    scope: KillScope,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            output_limit: DEFAULT_OUTPUT_LIMIT_BYTES,
            scope: KillScope::ProcessGroup,
        }
    }

    pub fn output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    pub fn kill_scope(mut self, scope: KillScope) -> Self {
        self.scope = scope;
        self
    }

    /// Run `command` to completion or until the limit elapses.
    ///
    /// Stdin is closed, stdout/stderr are captured. Output written before a
    /// timeout is kept. Only a failure to spawn or wait is an `Err`.
    pub async fn run(&self, mut command: Command) -> io::Result<ProcessOutput> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            match self.scope {
                KillScope::ProcessGroup => {
                    command.process_group(0);
                }
                KillScope::Session => {
                    // SAFETY: setsid(2) is async-signal-safe and touches no
                    // parent state. It also makes the child a group leader.
                    unsafe {
                        command.pre_exec(|| {
                            if libc::setsid() == -1 {
                                return Err(io::Error::last_os_error());
                            }
                            Ok(())
                        });
                    }
                }
            }
        }

        let start = Instant::now();
        let mut child = command.spawn()?;
        let pid = child.id();

        let stdout_reader = tokio::spawn(drain(child.stdout.take(), self.output_limit));
        let stderr_reader = tokio::spawn(drain(child.stderr.take(), self.output_limit));

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = tokio::time::sleep(self.limit) => None,
        };
        let elapsed = start.elapsed();

        // Stragglers go too, timed out or not
        match self.scope {
            KillScope::ProcessGroup => kill_group(pid),
            KillScope::Session => kill_session(pid),
        }
        if status.is_none() {
            debug!(
                pid = ?pid,
                limit_ms = self.limit.as_millis() as u64,
                scope = ?self.scope,
                "Deadline reached, killed child"
            );
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "start_kill after group kill");
            }
            if let Err(e) = child.wait().await {
                warn!(error = %e, "Failed to reap killed child");
            }
        }

        let (stdout, stdout_truncated) = collect(stdout_reader).await;
        let (stderr, stderr_truncated) = collect(stderr_reader).await;
        let truncated = stdout_truncated || stderr_truncated;
        if truncated {
            warn!(
                pid = ?pid,
                output_limit = self.output_limit,
                "Child output exceeded capture cap"
            );
        }

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            truncated,
            elapsed,
        })
    }
}

/// Keep the first `limit` bytes, then discard the rest until EOF
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, limit: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let Some(mut pipe) = pipe else {
        return (buf, false);
    };

    if let Err(e) = (&mut pipe).take(limit as u64).read_to_end(&mut buf).await {
        debug!(error = %e, "Pipe read ended with error");
        return (buf, false);
    }
    match tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await {
        Ok(discarded) => (buf, discarded > 0),
        Err(e) => {
            debug!(error = %e, "Pipe read ended with error");
            (buf, true)
        }
    }
}

async fn collect(mut reader: JoinHandle<(Vec<u8>, bool)>) -> (String, bool) {
    match tokio::time::timeout(OUTPUT_GRACE, &mut reader).await {
        Ok(Ok((bytes, truncated))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            (String::new(), false)
        }
        Err(_) => {
            reader.abort();
            warn!("Pipe still held open after the process ended, dropping its output");
            (String::new(), false)
        }
    }
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // SAFETY: kill(2) only takes integers; a stale group yields ESRCH.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the session led by `pid`, group by group
fn kill_session(pid: Option<u32>) {
    kill_group(pid);

    #[cfg(target_os = "linux")]
    {
        let Some(pid) = pid else {
            return;
        };
        let sid = pid as libc::pid_t;
        for _ in 0..SESSION_SWEEPS {
            let members = session_members(sid);
            if members.is_empty() {
                break;
            }
            for (member, group) in members {
                debug!(sid, member, group, "Killing session member");
                // SAFETY: as in kill_group
                unsafe {
                    if group > 1 {
                        libc::kill(-group, libc::SIGKILL);
                    }
                    libc::kill(member, libc::SIGKILL);
                }
            }
        }
    }
}

/// Live (non-zombie) processes of session `sid` as `(pid, pgrp)`
#[cfg(target_os = "linux")]
fn session_members(sid: libc::pid_t) -> Vec<(libc::pid_t, libc::pid_t)> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<libc::pid_t>().ok())
        .filter_map(|pid| {
            let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
            let (state, group, session) = parse_stat(&stat)?;
            (session == sid && state != 'Z').then_some((pid, group))
        })
        .collect()
}

/// `(state, pgrp, session)` from a `/proc/<pid>/stat` line. The command
/// name may contain spaces and parentheses, so fields are read after the
/// last `)`.
#[cfg(target_os = "linux")]
fn parse_stat(stat: &str) -> Option<(char, libc::pid_t, libc::pid_t)> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let group = fields.next()?.parse().ok()?;
    let session = fields.next()?.parse().ok()?;
    Some((state, group, session))
}
