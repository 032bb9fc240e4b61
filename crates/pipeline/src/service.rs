//! Public facade over the job engine.
//!
//! [`UpscaleService`] is created once at startup. Request handlers call
//! [`submit`](UpscaleService::submit), [`get_status`](UpscaleService::get_status)
//! and [`cancel`](UpscaleService::cancel); the host calls
//! [`start_workers`](UpscaleService::start_workers) once and
//! [`shutdown`](UpscaleService::shutdown) on exit.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use upscale_core::error::CoreError;
use upscale_core::job::{JobSnapshot, UpscaleRequest};
use upscale_core::types::JobId;
use upscale_runner::executor::ProcessExecutor;
use upscale_runner::models::ModelInfo;
use upscale_runner::subprocess::SubprocessExecutor;
use upscale_runner::upscaler::{Upscaler, UpscalerConfig};

use crate::dispatcher::{Dispatcher, DEFAULT_QUEUE_CAPACITY};
use crate::error::PipelineError;
use crate::events::{EventBus, JobEvent, JobEventKind};
use crate::registry::{CancelOutcome, JobRegistry};
use crate::staging::StagingArea;
use crate::worker::{self, Engine};

/// Default time [`UpscaleService::shutdown`] waits for each worker.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Settings for [`UpscaleService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub upscaler: UpscalerConfig,
    /// Private scratch directory, created on startup.
    pub staging_dir: PathBuf,
    /// Pending jobs buffered in the dispatch channel.
    pub max_queue_size: usize,
    /// How long shutdown waits for each worker to finish.
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub fn new(upscaler: UpscalerConfig, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            upscaler,
            staging_dir: staging_dir.into(),
            max_queue_size: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Job engine facade: registry, dispatch queue, worker pool, and events.
pub struct UpscaleService<E = SubprocessExecutor> {
    engine: Arc<Engine<E>>,
    dispatcher: Dispatcher,
    /// Master token; every job token is a child of it.
    shutdown: CancellationToken,
    shutdown_grace: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl UpscaleService<SubprocessExecutor> {
    /// Service that runs the upscaler as a real subprocess.
    pub async fn with_subprocess(config: ServiceConfig) -> Result<Self, PipelineError> {
        Self::new(config, SubprocessExecutor).await
    }
}

impl<E: ProcessExecutor + 'static> UpscaleService<E> {
    /// Build the service and create the staging directory.
    ///
    /// No job runs until [`start_workers`](Self::start_workers) is called.
    pub async fn new(config: ServiceConfig, executor: E) -> Result<Self, PipelineError> {
        let staging = StagingArea::create(&config.staging_dir).await?;

        let engine = Engine {
            registry: JobRegistry::new(),
            upscaler: Upscaler::new(config.upscaler, executor),
            staging,
            events: EventBus::default(),
        };

        Ok(Self {
            engine: Arc::new(engine),
            dispatcher: Dispatcher::new(config.max_queue_size),
            shutdown: CancellationToken::new(),
            shutdown_grace: config.shutdown_grace,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn `count` workers pulling from the dispatch queue.
    pub fn start_workers(&self, count: usize) {
        let engine = Arc::clone(&self.engine);
        let shutdown = self.shutdown.clone();

        let handles = self.dispatcher.spawn_workers(count, &self.shutdown, move |id| {
            let engine = Arc::clone(&engine);
            let shutdown = shutdown.clone();
            async move { worker::process_job(&engine, &id, &shutdown).await }
        });

        tracing::info!(count, "Upscale workers started");
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    /// Register a job and queue it for processing.
    ///
    /// Returns immediately; a full queue never blocks the caller. Fails
    /// only once shutdown has begun. Must be called from within a Tokio
    /// runtime.
    pub fn submit(&self, request: UpscaleRequest) -> Result<JobId, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Conflict("service is shutting down".to_string()));
        }

        let id = self.engine.registry.submit(request);
        self.engine
            .events
            .publish(JobEvent::new(id.clone(), JobEventKind::Queued));
        self.dispatcher.enqueue(id.clone());

        tracing::info!(job_id = %id, "Job queued");
        Ok(id)
    }

    /// Snapshot of a job, or `None` for an unknown id.
    pub fn get_status(&self, id: &str) -> Option<JobSnapshot> {
        self.engine.registry.get(id)
    }

    /// Cancel a queued or processing job.
    ///
    /// Idempotent for cancelled jobs; [`CoreError::Conflict`] for jobs that
    /// already completed or failed.
    pub fn cancel(&self, id: &str) -> Result<(), CoreError> {
        if self.engine.registry.cancel(id)? == CancelOutcome::Cancelled {
            tracing::info!(job_id = %id, "Job cancellation requested");
            self.engine
                .events
                .publish(JobEvent::new(id, JobEventKind::Cancelled));
        }
        Ok(())
    }

    /// Models installed under the configured models directory.
    pub async fn list_models(&self) -> std::io::Result<Vec<ModelInfo>> {
        self.engine.upscaler.list_models().await
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.engine.events.subscribe()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.engine.registry
    }

    /// Stop accepting work, kill running subprocesses, and wait for workers.
    ///
    /// Jobs interrupted here end `failed`; jobs still queued stay `queued`.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down upscale service");
        self.shutdown.cancel();
        self.dispatcher.close().await;

        let handles = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                tracing::warn!(
                    grace_secs = self.shutdown_grace.as_secs(),
                    "Worker did not stop within grace period",
                );
            }
        }

        tracing::info!("Upscale service shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
