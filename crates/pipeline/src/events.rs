//! Job lifecycle notifications over a `tokio::sync::broadcast` channel.
//!
//! Events are published after the matching registry mutation is visible,
//! so a subscriber that queries the registry on receipt never observes an
//! older state.

use serde::Serialize;
use tokio::sync::broadcast;
use upscale_core::job::UpscaleResult;
use upscale_core::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Queued,
    Started,
    Progress { percent: u8 },
    Completed { result: UpscaleResult },
    Failed { error: String },
    Cancelled,
}

/// A lifecycle event for a single job.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: Timestamp,
}

impl JobEvent {
    pub fn new(job_id: impl Into<JobId>, kind: JobEventKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            timestamp: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for [`JobEvent`]s.
///
/// Slow receivers observe `RecvError::Lagged` once the buffer is full.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Never blocks.
    pub fn publish(&self, event: JobEvent) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
