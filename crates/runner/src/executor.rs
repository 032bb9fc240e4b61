//! Process execution interface and shared types.
//!
//! Defines [`ProcessExecutor`], the seam between upscale orchestration and
//! the operating system, along with [`Invocation`] and [`ExitInfo`].

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RunError;

/// A fully resolved command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Path to the executable.
    pub program: PathBuf,
    /// Arguments passed verbatim (no shell interpretation).
    pub args: Vec<String>,
    /// Maximum wall-clock time before the process is killed.
    pub timeout: Duration,
}

/// Information about a process that exited successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Process exit code.
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Callback receiving raw progress percentages as they are reported.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Trait implemented by anything that can run an [`Invocation`].
///
/// Implementations must:
/// - forward every progress percentage they observe to `on_progress`;
/// - stop the process and return [`RunError::Cancelled`] once `cancel` fires;
/// - stop the process and return [`RunError::TimedOut`] once
///   `invocation.timeout` elapses;
/// - return [`RunError::ExitStatus`] for a non-zero exit.
pub trait ProcessExecutor: Send + Sync {
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> impl std::future::Future<Output = Result<ExitInfo, RunError>> + Send;
}
