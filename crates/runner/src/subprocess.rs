//! Real subprocess execution for the upscaler binary.
//!
//! [`SubprocessExecutor`] spawns the program in its own process group,
//! streams stderr line by line (forwarding progress percentages), and
//! enforces cancellation and the invocation timeout by killing the whole
//! group before reaping the child.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::executor::{ExitInfo, Invocation, ProcessExecutor, ProgressFn};
use crate::progress::parse_progress_line;

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Executor that runs invocations as operating-system processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessExecutor;

/// What woke the supervision loop.
enum Wake {
    Cancelled,
    TimedOut,
    Segment(std::io::Result<Option<Vec<u8>>>),
    Exited(std::io::Result<std::process::ExitStatus>),
}

impl ProcessExecutor for SubprocessExecutor {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<ExitInfo, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(RunError::Spawn)?;
        tracing::debug!(
            program = %invocation.program.display(),
            pid = child.id(),
            "Upscaler started",
        );

        let deadline = tokio::time::sleep(invocation.timeout);
        tokio::pin!(deadline);

        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

        // Phase 1: pump stderr until EOF.
        if let Some(stderr) = child.stderr.take() {
            let mut segments = BufReader::new(stderr).split(b'\n');
            loop {
                let wake = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Wake::Cancelled,
                    _ = &mut deadline => Wake::TimedOut,
                    segment = segments.next_segment() => Wake::Segment(segment),
                };

                match wake {
                    Wake::Segment(Ok(Some(bytes))) => {
                        let line = String::from_utf8_lossy(&bytes);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        tracing::debug!(line, "Upscaler output");
                        if let Some(percent) = parse_progress_line(line) {
                            on_progress(percent);
                        }
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.to_string());
                    }
                    Wake::Segment(Ok(None)) => break,
                    Wake::Segment(Err(e)) => {
                        terminate(&mut child).await;
                        return Err(RunError::Io(e));
                    }
                    other => return Err(interrupt(&mut child, other, invocation).await),
                }
            }
        }

        // Phase 2: wait for the exit status.
        let wake = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = &mut deadline => Wake::TimedOut,
            status = child.wait() => Wake::Exited(status),
        };

        let status = match wake {
            Wake::Exited(status) => status?,
            other => return Err(interrupt(&mut child, other, invocation).await),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);

        if !status.success() {
            return Err(RunError::ExitStatus {
                exit_code,
                stderr: Vec::from(tail).join("\n"),
            });
        }

        Ok(ExitInfo {
            exit_code,
            duration_ms,
        })
    }
}

/// Kill the child for a cancellation or deadline wake-up and map it to the
/// matching error.
async fn interrupt(child: &mut Child, wake: Wake, invocation: &Invocation) -> RunError {
    terminate(child).await;
    match wake {
        Wake::TimedOut => {
            tracing::warn!(
                timeout_secs = invocation.timeout.as_secs(),
                "Upscaler timed out, process killed",
            );
            RunError::TimedOut {
                after: invocation.timeout,
            }
        }
        _ => {
            tracing::info!("Upscaler cancelled, process killed");
            RunError::Cancelled
        }
    }
}

/// Kill the child's process group and reap the child.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Safety: killpg only sends a signal; the child was spawned with
        // `process_group(0)`, so its pid is also its process group id.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
