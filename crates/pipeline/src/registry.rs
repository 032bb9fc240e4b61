//! In-memory job registry.
//!
//! [`JobRegistry`] is the single source of truth for job state. All reads
//! and writes go through one mutex; critical sections only touch the map and
//! never perform I/O, so the lock is safe to take from synchronous progress
//! callbacks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use upscale_core::error::CoreError;
use upscale_core::job::{JobSnapshot, JobStatus, UpscaleRequest, UpscaleResult};
use upscale_core::types::{new_job_id, JobId, Timestamp};

/// Highest progress value a job can report while still processing.
pub const MAX_RUNNING_PROGRESS: u8 = 99;

/// Progress recorded when a worker claims a job.
pub const INITIAL_PROGRESS: u8 = 1;

/// Mutable state of one job. Only reachable through the registry lock.
#[derive(Debug)]
struct JobRecord {
    request: UpscaleRequest,
    status: JobStatus,
    progress: u8,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    finished_at: Option<Timestamp>,
    result: Option<UpscaleResult>,
    error: Option<String>,
    /// Present only while the job is processing.
    cancel: Option<CancellationToken>,
}

impl JobRecord {
    fn snapshot(&self, id: &str) -> JobSnapshot {
        JobSnapshot {
            id: id.to_string(),
            request: self.request.clone(),
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    fn settle(&mut self, status: JobStatus) -> Result<(), CoreError> {
        self.status.validate_transition(status)?;
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.cancel = None;
        Ok(())
    }
}

/// Result of a successful [`JobRegistry::cancel`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// This call moved the job to `cancelled`.
    Cancelled,
    /// The job was already cancelled; nothing changed.
    AlreadyCancelled,
}

/// Work handed to a worker that claimed a job.
#[derive(Debug)]
pub struct Claim {
    pub request: UpscaleRequest,
    /// Fires on an explicit cancel or when the parent token fires.
    pub token: CancellationToken,
}

/// Final state a worker's outcome resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed(UpscaleResult),
    Failed(String),
    /// The job was cancelled while the worker ran. A successful result, if
    /// any, is handed back so its artifact can be discarded.
    Cancelled { discarded: Option<UpscaleResult> },
}

/// Concurrent-safe map of job id to job record.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new `queued` job and return its id.
    pub fn submit(&self, request: UpscaleRequest) -> JobId {
        let id = new_job_id();
        let record = JobRecord {
            request,
            status: JobStatus::Queued,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            cancel: None,
        };
        self.lock().insert(id.clone(), record);
        id
    }

    /// Consistent copy of the job, or `None` for an unknown id.
    pub fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.lock().get(id).map(|record| record.snapshot(id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel a queued or processing job.
    ///
    /// A processing job has its token fired; the worker still owns cleanup.
    /// Cancelling a cancelled job is a no-op. A `completed` or `failed` job
    /// yields [`CoreError::Conflict`].
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, CoreError> {
        let mut jobs = self.lock();
        let record = jobs.get_mut(id).ok_or_else(|| CoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;

        match record.status {
            JobStatus::Cancelled => Ok(CancelOutcome::AlreadyCancelled),
            JobStatus::Completed | JobStatus::Failed => {
                Err(CoreError::Conflict("job already finished".to_string()))
            }
            JobStatus::Queued | JobStatus::Processing => {
                if let Some(token) = record.cancel.take() {
                    token.cancel();
                }
                record.settle(JobStatus::Cancelled)?;
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    /// Move a queued job to `processing` and hand out its work.
    ///
    /// Returns `None` if the job is unknown or no longer queued (cancelled
    /// while waiting). The job token is a child of `parent`.
    pub fn claim(&self, id: &str, parent: &CancellationToken) -> Option<Claim> {
        let mut jobs = self.lock();
        let record = jobs.get_mut(id)?;
        if record.status != JobStatus::Queued {
            return None;
        }

        let token = parent.child_token();
        record.status = JobStatus::Processing;
        record.progress = INITIAL_PROGRESS;
        record.started_at = Some(Utc::now());
        record.cancel = Some(token.clone());

        Some(Claim {
            request: record.request.clone(),
            token,
        })
    }

    /// Raise a processing job's progress.
    ///
    /// Values are capped at [`MAX_RUNNING_PROGRESS`]; returns the new value
    /// only when it increased.
    pub fn update_progress(&self, id: &str, percent: u8) -> Option<u8> {
        let mut jobs = self.lock();
        let record = jobs.get_mut(id)?;
        if record.status != JobStatus::Processing {
            return None;
        }

        let capped = percent.min(MAX_RUNNING_PROGRESS);
        if capped > record.progress {
            record.progress = capped;
            Some(capped)
        } else {
            None
        }
    }

    /// Settle a processing job with the worker's outcome.
    ///
    /// A job cancelled while the worker ran stays `cancelled` whatever the
    /// outcome. Success attaches the result and sets progress to 100.
    pub fn finish(
        &self,
        id: &str,
        outcome: Result<UpscaleResult, String>,
    ) -> Result<Settlement, CoreError> {
        let mut jobs = self.lock();
        let record = jobs.get_mut(id).ok_or_else(|| CoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        })?;

        if record.status == JobStatus::Cancelled {
            return Ok(Settlement::Cancelled {
                discarded: outcome.ok(),
            });
        }

        match outcome {
            Ok(result) => {
                record.settle(JobStatus::Completed)?;
                record.progress = 100;
                record.result = Some(result.clone());
                Ok(Settlement::Completed(result))
            }
            Err(message) => {
                record.settle(JobStatus::Failed)?;
                record.error = Some(message.clone());
                Ok(Settlement::Failed(message))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
