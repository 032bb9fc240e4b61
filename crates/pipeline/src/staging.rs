//! Private scratch area and output publication.
//!
//! Each job copies its input into the staging root and lets the upscaler
//! write there. Only [`publish`] makes a finished output visible at its
//! final path. Scratch names are prefixed with the job id, so concurrent
//! jobs never collide.

use std::path::{Path, PathBuf};

use upscale_core::job::UpscaleRequest;

use crate::error::PipelineError;

/// Scratch copies belonging to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Job-namespaced scratch directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Open the staging area, creating the directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| staging_error(&root, source))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch paths for `job_id`. The output keeps the requested file
    /// name, so the upscaler infers the same format from its extension.
    pub fn paths_for(&self, job_id: &str, request: &UpscaleRequest) -> StagedJob {
        StagedJob {
            input: self
                .root
                .join(format!("{job_id}_{}", file_name(&request.input_path))),
            output: self
                .root
                .join(format!("{job_id}_out_{}", file_name(&request.output_path))),
        }
    }

    /// Copy the request input into the staging area.
    pub async fn stage(
        &self,
        job_id: &str,
        request: &UpscaleRequest,
    ) -> Result<StagedJob, PipelineError> {
        let staged = self.paths_for(job_id, request);
        if let Err(source) = tokio::fs::copy(&request.input_path, &staged.input).await {
            remove_if_exists(&staged.input).await;
            return Err(staging_error(&request.input_path, source));
        }
        Ok(staged)
    }

    /// Remove a job's scratch files. Missing files are not an error.
    pub async fn cleanup(&self, staged: &StagedJob) {
        for path in [&staged.input, &staged.output] {
            remove_if_exists(path).await;
        }
    }
}

/// Move a staged output to its final path.
///
/// Tries an atomic rename first. If that fails (e.g. across devices), the
/// file is copied to a hidden sibling of `dest`, renamed into place, and the
/// staged file is removed.
pub async fn publish(staged: &Path, dest: &Path) -> Result<(), PipelineError> {
    let rename = match tokio::fs::rename(staged, dest).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    tracing::debug!(
        from = %staged.display(),
        to = %dest.display(),
        error = %rename,
        "Rename failed, falling back to copy",
    );

    match copy_into_place(staged, dest).await {
        Ok(()) => {
            remove_if_exists(staged).await;
            Ok(())
        }
        Err(copy) => Err(PipelineError::Publish {
            path: dest.display().to_string(),
            rename,
            copy,
        }),
    }
}

/// Copy `src` next to `dest` under a hidden name, then rename it over `dest`.
async fn copy_into_place(src: &Path, dest: &Path) -> std::io::Result<()> {
    let partial = dest.with_file_name(format!(".{}.partial", file_name(dest)));

    let result = async {
        tokio::fs::copy(src, &partial).await?;
        tokio::fs::rename(&partial, dest).await
    }
    .await;

    if result.is_err() {
        remove_if_exists(&partial).await;
    }
    result
}

/// Remove `path`, logging any failure other than it being absent.
pub(crate) async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

fn staging_error(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Staging {
        path: path.display().to_string(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn request(dir: &Path) -> UpscaleRequest {
        UpscaleRequest {
            input_path: dir.join("uploads").join("cat.png"),
            output_path: dir.join("outputs").join("job_upscaled.png"),
            scale: 2,
            model_name: "realesrgan-x4plus".into(),
            tile_size: 0,
            format: None,
        }
    }

    async fn setup() -> (tempfile::TempDir, StagingArea) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("uploads")).unwrap();
        std::fs::create_dir(dir.path().join("outputs")).unwrap();
        std::fs::write(dir.path().join("uploads").join("cat.png"), b"pixels").unwrap();
        let staging = StagingArea::create(dir.path().join("tmp")).await.expect("staging");
        (dir, staging)
    }

    #[tokio::test]
    async fn create_makes_directory() {
        let (dir, staging) = setup().await;
        assert!(staging.root().is_dir());
        assert_eq!(staging.root(), dir.path().join("tmp"));
    }

    #[tokio::test]
    async fn stage_copies_input_under_job_prefix() {
        let (dir, staging) = setup().await;
        let staged = staging.stage("job1", &request(dir.path())).await.expect("stage");

        assert_eq!(staged.input, dir.path().join("tmp").join("job1_cat.png"));
        assert_eq!(
            staged.output,
            dir.path().join("tmp").join("job1_out_job_upscaled.png")
        );
        assert_eq!(std::fs::read(&staged.input).unwrap(), b"pixels");
        // The original upload stays in place.
        assert!(dir.path().join("uploads").join("cat.png").exists());
    }

    #[tokio::test]
    async fn stage_missing_input_is_staging_error() {
        let (dir, staging) = setup().await;
        let mut req = request(dir.path());
        req.input_path = dir.path().join("uploads").join("gone.png");

        let err = staging.stage("job1", &req).await.unwrap_err();
        assert_matches!(err, PipelineError::Staging { .. });
    }

    #[tokio::test]
    async fn cleanup_removes_scratch_files() {
        let (dir, staging) = setup().await;
        let staged = staging.stage("job1", &request(dir.path())).await.unwrap();
        std::fs::write(&staged.output, b"half written").unwrap();

        staging.cleanup(&staged).await;
        assert!(!staged.input.exists());
        assert!(!staged.output.exists());

        // Second cleanup is a no-op.
        staging.cleanup(&staged).await;
    }

    #[tokio::test]
    async fn publish_moves_output() {
        let (dir, staging) = setup().await;
        let staged = staging.paths_for("job1", &request(dir.path()));
        std::fs::write(&staged.output, b"upscaled").unwrap();
        let dest = dir.path().join("outputs").join("job_upscaled.png");

        publish(&staged.output, &dest).await.expect("publish");
        assert_eq!(std::fs::read(&dest).unwrap(), b"upscaled");
        assert!(!staged.output.exists());
    }

    #[tokio::test]
    async fn copy_fallback_leaves_no_partial_file() {
        let (dir, _staging) = setup().await;
        let src = dir.path().join("tmp").join("out.png");
        std::fs::write(&src, b"upscaled").unwrap();
        let dest = dir.path().join("outputs").join("final.png");

        copy_into_place(&src, &dest).await.expect("copy");
        assert_eq!(std::fs::read(&dest).unwrap(), b"upscaled");
        assert!(!dir.path().join("outputs").join(".final.png.partial").exists());
    }

    #[tokio::test]
    async fn publish_into_missing_directory_fails() {
        let (dir, _staging) = setup().await;
        let src = dir.path().join("tmp").join("out.png");
        std::fs::write(&src, b"upscaled").unwrap();
        let dest = dir.path().join("missing").join("final.png");

        let err = publish(&src, &dest).await.unwrap_err();
        assert_matches!(err, PipelineError::Publish { .. });
        // The staged file survives for the caller's cleanup.
        assert!(src.exists());
    }
}
