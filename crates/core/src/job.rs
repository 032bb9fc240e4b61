//! Upscale job data model and state machine.
//!
//! A job moves `queued -> processing -> {completed | failed | cancelled}`,
//! or directly `queued -> cancelled`. The three terminal states accept no
//! further transitions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ImageSize, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an upscale job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the job has settled and accepts no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the set of statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        match self {
            Self::Queued => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a state transition, returning an error for invalid ones.
    pub fn validate_transition(self, to: JobStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid transition: {self} -> {to}. Allowed transitions: {:?}",
                self.valid_transitions()
            )))
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Immutable description of the work a job performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpscaleRequest {
    /// Source image, already persisted by the submitting collaborator.
    pub input_path: PathBuf,
    /// Final, externally addressable location of the result.
    pub output_path: PathBuf,
    /// Integer scale factor.
    pub scale: u32,
    /// Model identifier resolved against the models directory.
    pub model_name: String,
    /// Tile size passed to the upscaler (`0` = automatic).
    #[serde(default)]
    pub tile_size: u32,
    /// Output format (`png`, `jpg`, `webp`); `None` keeps the upscaler default.
    #[serde(default)]
    pub format: Option<String>,
}

impl UpscaleRequest {
    /// Copy of this request pointing at different input/output files.
    ///
    /// Used to run the upscaler against staged scratch copies while the
    /// original request keeps the user-visible paths.
    pub fn with_paths(&self, input_path: &Path, output_path: &Path) -> Self {
        Self {
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            ..self.clone()
        }
    }
}

/// Outcome of a successful upscale. Attached to a job exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpscaleResult {
    pub output_path: PathBuf,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    pub input_size: ImageSize,
    pub output_size: ImageSize,
    pub file_size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Consistent, read-only copy of a job record handed to query callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub request: UpscaleRequest,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub result: Option<UpscaleResult>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
