//! `upscale-worker` -- image upscale job engine host.
//!
//! Starts the worker pool, the upload intake, and the cleanup sweeper, then
//! runs until Ctrl-C.
//! See [`upscale_worker::config::AppConfig::from_env`] for the environment
//! variables it reads.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upscale_pipeline::service::UpscaleService;
use upscale_storage::{sweeper, StorageManager};
use upscale_worker::config::{AppConfig, LogFormat};
use upscale_worker::intake::Intake;

const DEFAULT_LOG_FILTER: &str =
    "upscale_worker=info,upscale_pipeline=info,upscale_runner=info,upscale_storage=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());

    let config = config.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        base_dir = %config.base_dir.display(),
        binary = %config.binary_path.display(),
        models = %config.models_path.display(),
        workers = config.max_concurrent_jobs,
        queue_size = config.max_queue_size,
        timeout_secs = config.job_timeout.as_secs(),
        retention = %config.retention_policy,
        "Starting upscale worker",
    );

    let storage = StorageManager::new(config.storage_config())
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to prepare storage directories");
            std::process::exit(1);
        });
    let storage = Arc::new(storage);

    let service = UpscaleService::with_subprocess(config.service_config())
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to prepare staging directory");
            std::process::exit(1);
        });
    let service = Arc::new(service);

    match service.list_models().await {
        Ok(models) => {
            let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
            tracing::info!(count = models.len(), models = ?names, "Models discovered");
        }
        Err(e) => {
            tracing::warn!(
                path = %config.models_path.display(),
                error = %e,
                "Models directory unreadable",
            );
        }
    }

    service.start_workers(config.max_concurrent_jobs);

    let intake = Intake::from_config(&config, Arc::clone(&service), Arc::clone(&storage));
    tracing::info!(
        default_model = intake.default_model(),
        default_scale = intake.default_scale(),
        upload_dir = %config.upload_dir.display(),
        "Intake ready",
    );

    let cancel = CancellationToken::new();
    let sweeper_handle = tokio::spawn(sweeper::run(
        Arc::clone(&storage),
        config.cleanup_interval,
        cancel.clone(),
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    if let Err(e) = sweeper_handle.await {
        tracing::warn!(error = %e, "Cleanup sweeper task failed");
    }
    service.shutdown().await;
    drop(intake);

    tracing::info!("Upscale worker stopped");
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
