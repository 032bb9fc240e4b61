//! Submission and download glue for request handlers.
//!
//! [`Intake`] persists an uploaded image, applies the configured defaults,
//! derives the final output path, and submits the job. On the way out it
//! resolves a completed job's artifact and applies the retention policy
//! once the download has been served.

use std::path::PathBuf;
use std::sync::Arc;

use upscale_core::error::CoreError;
use upscale_core::job::{JobStatus, UpscaleRequest};
use upscale_core::types::JobId;
use upscale_pipeline::service::UpscaleService;
use upscale_runner::executor::ProcessExecutor;
use upscale_runner::subprocess::SubprocessExecutor;
use upscale_storage::{StorageError, StorageManager};

use crate::config::AppConfig;

/// Optional per-request parameters; unset values fall back to defaults.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub scale: Option<u32>,
    pub model_name: Option<String>,
    /// `0` lets the upscaler pick.
    pub tile_size: u32,
    pub format: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] CoreError),

    #[error("job not completed (status: {0})")]
    NotCompleted(JobStatus),

    #[error("output file missing: {0}")]
    OutputMissing(String),
}

/// Front door shared by request handlers.
pub struct Intake<E = SubprocessExecutor> {
    service: Arc<UpscaleService<E>>,
    storage: Arc<StorageManager>,
    default_model: String,
    default_scale: u32,
}

impl<E: ProcessExecutor + 'static> Intake<E> {
    pub fn new(
        service: Arc<UpscaleService<E>>,
        storage: Arc<StorageManager>,
        default_model: impl Into<String>,
        default_scale: u32,
    ) -> Self {
        Self {
            service,
            storage,
            default_model: default_model.into(),
            default_scale,
        }
    }

    /// Intake using the defaults configured in `config`.
    pub fn from_config(
        config: &AppConfig,
        service: Arc<UpscaleService<E>>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self::new(
            service,
            storage,
            config.default_model.clone(),
            config.default_scale,
        )
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn default_scale(&self) -> u32 {
        self.default_scale
    }

    /// Save `data` as an upload and queue an upscale job for it.
    ///
    /// The upload is removed again if the service refuses the job.
    pub async fn submit_upload(
        &self,
        filename: &str,
        data: &[u8],
        options: SubmitOptions,
    ) -> Result<JobId, IntakeError> {
        let input_path = self.storage.save_upload(filename, data).await?;

        let tag = uuid::Uuid::now_v7().simple().to_string();
        let output_path = self
            .storage
            .output_path(&tag, filename, options.format.as_deref());

        let request = UpscaleRequest {
            input_path: input_path.clone(),
            output_path,
            scale: options.scale.unwrap_or(self.default_scale),
            model_name: options
                .model_name
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.default_model.clone()),
            tile_size: options.tile_size,
            format: options.format.filter(|f| !f.is_empty()),
        };

        match self.service.submit(request) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_file(&input_path).await {
                    tracing::warn!(error = %cleanup, "Failed to remove rejected upload");
                }
                Err(e.into())
            }
        }
    }

    /// Path of a completed job's artifact, checked to exist on disk.
    pub async fn completed_artifact(&self, id: &str) -> Result<PathBuf, IntakeError> {
        let snapshot = self
            .service
            .get_status(id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "job",
                id: id.to_string(),
            })?;

        let result = match (snapshot.status, snapshot.result) {
            (JobStatus::Completed, Some(result)) => result,
            (status, _) => return Err(IntakeError::NotCompleted(status)),
        };

        if !tokio::fs::try_exists(&result.output_path).await.unwrap_or(false) {
            return Err(IntakeError::OutputMissing(
                result.output_path.display().to_string(),
            ));
        }
        Ok(result.output_path)
    }

    /// Apply the retention policy after an artifact was served.
    pub async fn finish_download(&self, path: &std::path::Path) -> Result<bool, IntakeError> {
        Ok(self.storage.finish_download(path).await?)
    }
}
