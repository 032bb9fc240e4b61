//! Error type for job execution inside a worker.

use upscale_runner::error::UpscaleError;

/// Any failure of a job after it has been claimed by a worker.
///
/// Every variant ends in a `failed` job except a cancellation, which the
/// worker routes through the registry instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upscale(#[from] UpscaleError),

    #[error("staging failed for {path}: {source}")]
    Staging {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to publish output to {path}: rename: {rename}; copy: {copy}")]
    Publish {
        path: String,
        rename: std::io::Error,
        copy: std::io::Error,
    },

    /// The job token fired after the upscaler had already succeeded.
    #[error("job cancelled before publish")]
    Cancelled,
}

impl PipelineError {
    /// Whether the failure is the job's cancellation token firing.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Upscale(e) => e.is_cancelled(),
            Self::Cancelled => true,
            _ => false,
        }
    }
}
