//! Error types for request validation and process supervision.

use std::time::Duration;

use upscale_core::image_info::ImageInfoError;

/// A request was rejected before any subprocess was spawned.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("upscaler binary not found: {0}")]
    BinaryNotFound(String),

    #[error("upscaler binary is not executable: {0}")]
    BinaryNotExecutable(String),

    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("invalid scale: {scale} (must be one of {allowed:?})")]
    InvalidScale { scale: u32, allowed: &'static [u32] },

    #[error("model not found: {0}")]
    ModelNotFound(String),
}

/// Failure while running the external process.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start upscaler: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error while supervising upscaler: {0}")]
    Io(#[from] std::io::Error),

    /// The cancellation token fired and the process group was killed.
    #[error("upscale cancelled")]
    Cancelled,

    /// The deadline expired and the process group was killed.
    #[error("upscale timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("upscaler exited with code {exit_code}: {stderr}")]
    ExitStatus { exit_code: i32, stderr: String },
}

/// Any failure of a single upscale attempt.
#[derive(Debug, thiserror::Error)]
pub enum UpscaleError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to get input size: {0}")]
    InputProbe(#[source] ImageInfoError),

    #[error("failed to get output size: {0}")]
    OutputProbe(#[source] ImageInfoError),

    #[error("failed to stat output: {0}")]
    OutputStat(#[source] std::io::Error),

    #[error("image probe task failed: {0}")]
    ProbeTask(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Run(#[from] RunError),
}

impl UpscaleError {
    /// Whether the attempt ended because its cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Run(RunError::Cancelled))
    }
}
