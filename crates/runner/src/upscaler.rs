//! Upscale orchestration around a [`ProcessExecutor`].
//!
//! [`Upscaler::upscale`] validates the request before anything is spawned,
//! probes the input dimensions, runs the binary, and re-reads the produced
//! file. An output that cannot be introspected is treated as a failure.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use upscale_core::image_info::{self, ImageInfoError};
use upscale_core::job::{UpscaleRequest, UpscaleResult};
use upscale_core::types::ImageSize;

use crate::error::{UpscaleError, ValidationError};
use crate::executor::{Invocation, ProcessExecutor};
use crate::models::{self, ModelInfo};
use crate::progress::ProgressTracker;

/// Scale factors accepted by the upscaler binary.
pub const SUPPORTED_SCALES: &[u32] = &[2, 3, 4];

/// Default hard deadline for a single upscale run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Static settings for the upscaler binary.
#[derive(Debug, Clone)]
pub struct UpscalerConfig {
    /// Path to the upscaler executable.
    pub binary_path: PathBuf,
    /// Directory holding model assets (passed as `-m`).
    pub models_path: PathBuf,
    /// Thread layout passed as `-j`, e.g. `1:2:2`.
    pub threads: String,
    /// When `false`, the binary is forced onto the CPU (`-g -1`).
    pub enable_gpu: bool,
    /// Explicit GPU device; `None` lets the binary choose.
    pub gpu_id: Option<u32>,
    /// Hard deadline per run.
    pub timeout: Duration,
}

/// Runs upscale requests through an executor.
pub struct Upscaler<E> {
    config: UpscalerConfig,
    executor: E,
}

impl<E: ProcessExecutor> Upscaler<E> {
    pub fn new(config: UpscalerConfig, executor: E) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &UpscalerConfig {
        &self.config
    }

    /// Check binary, input, scale, and model before spawning anything.
    pub async fn validate(&self, req: &UpscaleRequest) -> Result<(), ValidationError> {
        let binary = &self.config.binary_path;
        let metadata = tokio::fs::metadata(binary)
            .await
            .map_err(|_| ValidationError::BinaryNotFound(binary.display().to_string()))?;
        if !metadata.is_file() || !is_executable(&metadata) {
            return Err(ValidationError::BinaryNotExecutable(
                binary.display().to_string(),
            ));
        }

        if !tokio::fs::try_exists(&req.input_path).await.unwrap_or(false) {
            return Err(ValidationError::InputNotFound(
                req.input_path.display().to_string(),
            ));
        }

        if !SUPPORTED_SCALES.contains(&req.scale) {
            return Err(ValidationError::InvalidScale {
                scale: req.scale,
                allowed: SUPPORTED_SCALES,
            });
        }

        if !models::model_exists(&self.config.models_path, &req.model_name).await {
            return Err(ValidationError::ModelNotFound(req.model_name.clone()));
        }

        Ok(())
    }

    /// Build the upscaler command line for `req`.
    pub fn build_args(&self, req: &UpscaleRequest) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            req.input_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            req.output_path.to_string_lossy().into_owned(),
            "-s".to_string(),
            req.scale.to_string(),
            "-m".to_string(),
            self.config.models_path.to_string_lossy().into_owned(),
            "-n".to_string(),
            req.model_name.clone(),
            "-j".to_string(),
            self.config.threads.clone(),
        ];

        if req.tile_size > 0 {
            args.extend(["-t".to_string(), req.tile_size.to_string()]);
        }

        if !self.config.enable_gpu {
            args.extend(["-g".to_string(), "-1".to_string()]);
        } else if let Some(gpu_id) = self.config.gpu_id {
            args.extend(["-g".to_string(), gpu_id.to_string()]);
        }

        if let Some(format) = req.format.as_deref().filter(|f| !f.is_empty()) {
            args.extend(["-f".to_string(), format.to_string()]);
        }

        args
    }

    /// Run one upscale to completion.
    ///
    /// `on_progress` receives whole, strictly increasing percentages.
    /// Cancellation and timeout are reported as distinct errors.
    pub async fn upscale(
        &self,
        req: &UpscaleRequest,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<UpscaleResult, UpscaleError> {
        let start = Instant::now();

        self.validate(req).await?;

        let input_size = probe(&req.input_path)
            .await?
            .map_err(UpscaleError::InputProbe)?;

        let invocation = Invocation {
            program: self.config.binary_path.clone(),
            args: self.build_args(req),
            timeout: self.config.timeout,
        };

        let tracker = ProgressTracker::new();
        let forward = |percent: f64| {
            if let Some(value) = tracker.observe(percent) {
                on_progress(value);
            }
        };

        let exit = self.executor.run(&invocation, cancel, &forward).await?;

        let output_size = probe(&req.output_path)
            .await?
            .map_err(UpscaleError::OutputProbe)?;

        let metadata = tokio::fs::metadata(&req.output_path)
            .await
            .map_err(UpscaleError::OutputStat)?;

        tracing::debug!(
            exit_code = exit.exit_code,
            run_ms = exit.duration_ms,
            input = %input_size,
            output = %output_size,
            "Upscaler finished",
        );

        Ok(UpscaleResult {
            output_path: req.output_path.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
            input_size,
            output_size,
            file_size_bytes: metadata.len(),
        })
    }

    /// List models installed under the configured models path.
    pub async fn list_models(&self) -> std::io::Result<Vec<ModelInfo>> {
        models::list_available_models(&self.config.models_path).await
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Read image dimensions off the async runtime.
async fn probe(
    path: &Path,
) -> Result<Result<ImageSize, ImageInfoError>, tokio::task::JoinError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image_info::read_dimensions(&path)).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
