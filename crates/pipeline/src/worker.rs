//! Per-job execution: claim, validate, stage, upscale, publish, settle.

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use upscale_core::job::UpscaleResult;
use upscale_runner::error::UpscaleError;
use upscale_runner::executor::ProcessExecutor;
use upscale_runner::upscaler::Upscaler;

use crate::error::PipelineError;
use crate::events::{EventBus, JobEvent, JobEventKind};
use crate::registry::{Claim, JobRegistry, Settlement};
use crate::staging::{self, StagedJob, StagingArea};

/// Error recorded for a job whose subprocess was killed by service shutdown.
pub(crate) const SHUTDOWN_MESSAGE: &str = "interrupted by service shutdown";

/// Everything a worker needs to run a job, shared by all workers.
pub(crate) struct Engine<E> {
    pub registry: JobRegistry,
    pub upscaler: Upscaler<E>,
    pub staging: StagingArea,
    pub events: EventBus,
}

/// Drive one dequeued job to a terminal state.
///
/// A job cancelled while it waited in the queue is skipped without touching
/// the filesystem.
pub(crate) async fn process_job<E: ProcessExecutor>(
    engine: &Engine<E>,
    id: &str,
    shutdown: &CancellationToken,
) {
    let Some(claim) = engine.registry.claim(id, shutdown) else {
        tracing::debug!(job_id = %id, "Job no longer queued, skipping");
        return;
    };

    engine
        .events
        .publish(JobEvent::new(id, JobEventKind::Started));
    tracing::info!(
        job_id = %id,
        scale = claim.request.scale,
        model = %claim.request.model_name,
        "Job started",
    );

    let outcome = execute(engine, id, &claim)
        .instrument(tracing::info_span!("job", job_id = %id))
        .await;
    settle(engine, id, outcome).await;
}

/// Validate, stage, run, and publish. Scratch files are removed on every
/// path once staging has happened.
async fn execute<E: ProcessExecutor>(
    engine: &Engine<E>,
    id: &str,
    claim: &Claim,
) -> Result<UpscaleResult, PipelineError> {
    engine
        .upscaler
        .validate(&claim.request)
        .await
        .map_err(UpscaleError::from)?;

    let staged = engine.staging.stage(id, &claim.request).await?;
    let outcome = run_and_publish(engine, id, claim, &staged).await;
    engine.staging.cleanup(&staged).await;
    outcome
}

async fn run_and_publish<E: ProcessExecutor>(
    engine: &Engine<E>,
    id: &str,
    claim: &Claim,
    staged: &StagedJob,
) -> Result<UpscaleResult, PipelineError> {
    let request = claim.request.with_paths(&staged.input, &staged.output);

    let on_progress = |percent: u8| {
        if let Some(percent) = engine.registry.update_progress(id, percent) {
            engine
                .events
                .publish(JobEvent::new(id, JobEventKind::Progress { percent }));
        }
    };

    let mut result = engine
        .upscaler
        .upscale(&request, &claim.token, &on_progress)
        .await?;

    // The process may have finished just as the token fired.
    if claim.token.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    staging::publish(&staged.output, &claim.request.output_path).await?;
    result.output_path = claim.request.output_path.clone();
    Ok(result)
}

/// Record the outcome and emit the matching event.
async fn settle<E>(engine: &Engine<E>, id: &str, outcome: Result<UpscaleResult, PipelineError>) {
    // A token that fired without an explicit cancel means shutdown.
    let outcome = outcome.map_err(|e| {
        if e.is_cancelled() {
            SHUTDOWN_MESSAGE.to_string()
        } else {
            e.to_string()
        }
    });

    match engine.registry.finish(id, outcome) {
        Ok(Settlement::Completed(result)) => {
            tracing::info!(
                job_id = %id,
                duration_ms = result.duration_ms,
                input = %result.input_size,
                output = %result.output_size,
                "Job completed",
            );
            engine
                .events
                .publish(JobEvent::new(id, JobEventKind::Completed { result }));
        }
        Ok(Settlement::Failed(error)) => {
            tracing::warn!(job_id = %id, error = %error, "Job failed");
            engine
                .events
                .publish(JobEvent::new(id, JobEventKind::Failed { error }));
        }
        Ok(Settlement::Cancelled { discarded }) => {
            if let Some(result) = discarded {
                tracing::info!(
                    job_id = %id,
                    path = %result.output_path.display(),
                    "Discarding output of cancelled job",
                );
                staging::remove_if_exists(&result.output_path).await;
            }
            tracing::info!(job_id = %id, "Job cancelled");
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to settle job");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
