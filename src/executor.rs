//! Sandbox executor
//!
//! Host-side supervision of one grading run. Spawns the `grader-sandbox`
//! runner in its own session with rlimits applied, writes the execution
//! request on its stdin, then absorbs protocol messages from its stdout
//! until the battery completes, the run faults, or the wall-clock budget
//! expires. The submission never executes in this process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::GraderConfig;
use crate::error::GraderError;
use crate::model::{LogLine, Submission, Termination, TestBattery, TestOutcome};
use crate::protocol::{self, Absorbed, ExecutionRequest, RequestedTest, Session, SessionCaps};

/// Correlation ids are unique per worker process. Uniqueness is what lets
/// the session discard stale messages from an earlier run's process.
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);

pub fn next_correlation_id() -> u64 {
    CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Resource bounds applied to one sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Wall-clock budget in milliseconds.
    pub time_ms: u64,
    /// Address-space cap in MB.
    pub memory_mb: u32,
    /// RLIMIT_NOFILE for the runner.
    pub open_files: u32,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            time_ms: 5000,
            memory_mb: 256,
            open_files: 16,
        }
    }
}

/// Everything observed from one sandbox run.
#[derive(Debug)]
pub struct ExecutionReport {
    pub outcomes: Vec<TestOutcome>,
    pub logs: Vec<LogLine>,
    pub termination: Termination,
    pub duration_ms: u64,
    /// Log lines dropped or truncated by the retention caps.
    pub dropped_logs: u32,
    /// Protocol messages discarded (foreign, duplicate, late, malformed).
    pub discarded_messages: u32,
}

#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    runner: PathBuf,
    limits: SandboxLimits,
    handshake_ms: u64,
    caps: SessionCaps,
}

impl SandboxExecutor {
    pub fn new(runner: impl Into<PathBuf>, limits: SandboxLimits) -> Self {
        Self {
            runner: runner.into(),
            limits,
            handshake_ms: 2000,
            caps: SessionCaps::default(),
        }
    }

    pub fn from_config(config: &GraderConfig) -> Self {
        Self {
            runner: config.runner_path(),
            limits: SandboxLimits {
                time_ms: config.time_budget_ms,
                memory_mb: config.memory_limit_mb,
                open_files: config.open_files,
            },
            handshake_ms: config.handshake_grace_ms,
            caps: SessionCaps {
                max_log_lines: config.max_log_lines,
                max_log_line_len: config.max_log_line_len,
            },
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Run one submission against one battery in a fresh sandbox.
    ///
    /// A slow or looping submission is not an `Err`: it comes back as a
    /// report with `Termination::Timeout`. `Err(ExecutionTimeout)` is
    /// reserved for the sandbox itself misbehaving: no ready handshake
    /// inside the grace window, or a child that cannot be reaped.
    pub async fn execute(
        &self,
        submission: &Submission,
        battery: &TestBattery,
    ) -> Result<ExecutionReport, GraderError> {
        let correlation_id = next_correlation_id();
        let scratch = tempfile::tempdir()
            .map_err(|e| GraderError::Sandbox(format!("scratch dir: {}", e)))?;

        let mut command = Command::new(&self.runner);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(scratch.path())
            .env_clear()
            .kill_on_drop(true);
        apply_sandbox_rlimits(&mut command, &self.limits);

        let mut child = command.spawn().map_err(|e| {
            GraderError::Sandbox(format!("spawn {}: {}", self.runner.display(), e))
        })?;
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.limits.time_ms);
        let handshake_deadline =
            (started + Duration::from_millis(self.handshake_ms)).min(deadline);

        let request = ExecutionRequest {
            correlation_id,
            markup: submission.markup.clone(),
            style: submission.style.clone(),
            script: submission.script.clone(),
            tests: battery
                .tests
                .iter()
                .map(|t| RequestedTest {
                    name: t.name.clone(),
                    assertion: t.assertion.clone(),
                })
                .collect(),
        };
        let mut request_line = serde_json::to_string(&request)
            .map_err(|e| GraderError::Sandbox(format!("encode request: {}", e)))?;
        request_line.push('\n');

        let Some(mut stdin) = child.stdin.take() else {
            let _ = self.teardown(&mut child).await;
            return Err(GraderError::Sandbox("sandbox stdin not piped".to_string()));
        };
        let write = async move {
            stdin.write_all(request_line.as_bytes()).await?;
            stdin.shutdown().await?;
            Ok::<_, std::io::Error>(())
        };
        match timeout_at(handshake_deadline, write).await {
            Err(_) => {
                let _ = self.teardown(&mut child).await;
                return Err(GraderError::ExecutionTimeout);
            }
            // A write error means the child is already gone; the read
            // loop below will observe the EOF and classify the run.
            Ok(Err(e)) => warn!("sandbox stdin write failed: {}", e),
            Ok(Ok(())) => {}
        }

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() < 32 {
                        tail.push(line);
                    }
                }
            }
            tail
        });

        let Some(stdout) = child.stdout.take() else {
            stderr_task.abort();
            let _ = self.teardown(&mut child).await;
            return Err(GraderError::Sandbox("sandbox stdout not piped".to_string()));
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut session = Session::new(correlation_id, battery, self.caps);
        let mut malformed = 0u32;

        let termination = loop {
            let effective = if session.is_ready() {
                deadline
            } else {
                handshake_deadline
            };
            match timeout_at(effective, lines.next_line()).await {
                Err(_) => {
                    if !session.is_ready() {
                        stderr_task.abort();
                        let _ = self.teardown(&mut child).await;
                        return Err(GraderError::ExecutionTimeout);
                    }
                    session.finalize_timeout();
                    break Termination::Timeout;
                }
                Ok(Ok(Some(line))) => match protocol::decode_line(&line) {
                    Some(envelope) => match session.absorb(envelope) {
                        Absorbed::Result { complete: true, .. } => break Termination::Completed,
                        Absorbed::Fatal { message } => {
                            debug!("sandbox fatal: correlation_id={} {}", correlation_id, message);
                            break Termination::Fault;
                        }
                        _ => {}
                    },
                    None => malformed += 1,
                },
                Ok(Ok(None)) => {
                    if session.is_complete() {
                        break Termination::Completed;
                    }
                    session.fail_unresolved("sandbox exited before completing the battery");
                    break Termination::Fault;
                }
                Ok(Err(e)) => {
                    warn!("sandbox stdout read failed: {}", e);
                    session.fail_unresolved("sandbox stream failed");
                    break Termination::Fault;
                }
            }
        };

        self.teardown(&mut child).await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();
        if termination == Termination::Fault && !stderr_tail.is_empty() {
            warn!(
                "sandbox stderr: correlation_id={} {}",
                correlation_id,
                stderr_tail.join(" | ")
            );
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let discarded_messages = session.discarded() + malformed;
        let (outcomes, logs, dropped_logs) = session.into_parts();
        debug!(
            "sandbox run: correlation_id={} termination={} duration_ms={} discarded={}",
            correlation_id, termination, duration_ms, discarded_messages
        );

        Ok(ExecutionReport {
            outcomes,
            logs,
            termination,
            duration_ms,
            dropped_logs,
            discarded_messages,
        })
    }

    /// Kill the runner's process group and reap it. An unkillable child
    /// is an infrastructure failure.
    async fn teardown(&self, child: &mut Child) -> Result<(), GraderError> {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            // The runner calls setsid, so its pgid equals its pid.
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        let _ = child.start_kill();
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(GraderError::Sandbox(format!("reap sandbox: {}", e))),
            Err(_) => Err(GraderError::ExecutionTimeout),
        }
    }
}

fn apply_sandbox_rlimits(command: &mut Command, limits: &SandboxLimits) {
    #[cfg(unix)]
    {
        use nix::sys::resource::{setrlimit, Resource};
        use nix::unistd::setsid;

        let cpu_secs = (limits.time_ms / 1000).saturating_add(2);
        let mem_bytes = u64::from(limits.memory_mb) * 1024 * 1024;
        let open_files = u64::from(limits.open_files);
        unsafe {
            command.pre_exec(move || {
                setsid().map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_CPU, cpu_secs, cpu_secs)
                    .map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_AS, mem_bytes, mem_bytes)
                    .map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_NOFILE, open_files, open_files)
                    .map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_FSIZE, 0, 0).map_err(std::io::Error::from)?;
                setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(std::io::Error::from)?;
                Ok(())
            });
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (command, limits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = next_correlation_id();
        let b = next_correlation_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_limits_default() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.time_ms, 5000);
        assert_eq!(limits.memory_mb, 256);
    }

    #[test]
    fn test_from_config_carries_bounds() {
        let config = GraderConfig {
            time_budget_ms: 1234,
            memory_limit_mb: 64,
            open_files: 8,
            max_log_lines: 10,
            ..Default::default()
        };
        let executor = SandboxExecutor::from_config(&config);
        assert_eq!(executor.limits().time_ms, 1234);
        assert_eq!(executor.limits().memory_mb, 64);
        assert_eq!(executor.caps.max_log_lines, 10);
    }
}
