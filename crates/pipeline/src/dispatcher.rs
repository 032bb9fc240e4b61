//! Bounded FIFO dispatch queue feeding a fixed pool of workers.
//!
//! Enqueueing never waits on queue capacity. Ids go into an unbounded
//! backlog that a single forwarder task moves into the bounded channel in
//! submission order, so a full channel only delays admission while the
//! job stays `queued` in the registry.

use std::future::Future;
use std::sync::{Arc, PoisonError};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use upscale_core::types::JobId;

/// Default number of pending jobs buffered in the channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Shared receiving end; workers take turns pulling from it.
type JobQueue = Arc<Mutex<mpsc::Receiver<JobId>>>;

/// Producer side of the queue plus the shared receiver handed to workers.
pub struct Dispatcher {
    backlog: mpsc::UnboundedSender<JobId>,
    queue: JobQueue,
    /// Stops the forwarder; pending backlog entries are dropped.
    closed: CancellationToken,
    forwarder: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create the queue and its forwarder task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (backlog, pending) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let forwarder = tokio::spawn(forward(pending, sender, closed.clone()));

        Self {
            backlog,
            queue: Arc::new(Mutex::new(receiver)),
            closed,
            forwarder: std::sync::Mutex::new(Some(forwarder)),
        }
    }

    /// Queue a job id for the next free worker without waiting.
    pub fn enqueue(&self, id: JobId) {
        if let Err(e) = self.backlog.send(id) {
            tracing::warn!(job_id = %e.0, "Dispatch queue closed, job not enqueued");
        }
    }

    /// Stop admitting jobs and wait for the forwarder to exit.
    ///
    /// Ids still in the backlog are dropped; their jobs stay `queued`.
    pub async fn close(&self) {
        self.closed.cancel();
        let handle = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dispatch forwarder failed");
            }
        }
    }

    /// Spawn `count` workers that run `handler` for each dequeued job.
    ///
    /// A worker handles one job at a time and exits once `shutdown` fires.
    /// A job already being handled runs to completion; the handler is
    /// expected to observe `shutdown` itself.
    pub fn spawn_workers<F, Fut>(
        &self,
        count: usize,
        shutdown: &CancellationToken,
        handler: F,
    ) -> Vec<JoinHandle<()>>
    where
        F: Fn(JobId) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        (0..count)
            .map(|worker_id| {
                let queue = Arc::clone(&self.queue);
                let shutdown = shutdown.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    tracing::info!(worker_id, "Worker started");
                    run_worker(&queue, &shutdown, handler).await;
                    tracing::info!(worker_id, "Worker stopped");
                })
            })
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Move backlog ids into the bounded channel one at a time, in order.
async fn forward(
    mut pending: mpsc::UnboundedReceiver<JobId>,
    sender: mpsc::Sender<JobId>,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            id = pending.recv() => id,
        };
        let Some(id) = next else { break };

        let sent = tokio::select! {
            biased;
            _ = closed.cancelled() => false,
            result = sender.send(id) => result.is_ok(),
        };
        if !sent {
            break;
        }
    }

    pending.close();
    let mut dropped = 0usize;
    while pending.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::info!(dropped, "Dispatch queue closed with jobs still pending");
    }
}

/// Dequeue -> handle loop for a single worker.
async fn run_worker<F, Fut>(queue: &JobQueue, shutdown: &CancellationToken, handler: F)
where
    F: Fn(JobId) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            id = async { queue.lock().await.recv().await } => id,
        };

        match next {
            Some(id) => handler(id).await,
            None => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
