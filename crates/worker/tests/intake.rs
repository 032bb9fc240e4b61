//! Upload-to-download flow through [`Intake`] with a fake upscaler binary.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use upscale_core::error::CoreError;
use upscale_core::job::{JobSnapshot, JobStatus};
use upscale_core::types::ImageSize;
use upscale_pipeline::service::UpscaleService;
use upscale_storage::{StorageError, StorageManager};
use upscale_worker::config::AppConfig;
use upscale_worker::intake::{Intake, IntakeError, SubmitOptions};

/// Records its arguments, reports progress, and copies a prepared 200x200
/// fixture to the `-o` path.
const FAKE_UPSCALER: &str = r#"#!/bin/bash
echo "$@" > "$(dirname "$0")/args"
out=""
while [ $# -gt 0 ]; do
    case "$1" in
        -o) out="$2"; shift 2 ;;
        *) shift ;;
    esac
done
echo "40.00%" >&2
echo "100.00%" >&2
cp "$(dirname "$0")/fixture.png" "$out"
"#;

struct Host {
    dir: tempfile::TempDir,
    config: AppConfig,
    service: Arc<UpscaleService>,
    intake: Intake,
}

impl Host {
    async fn start(policy: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).expect("mkdir bin");
        let binary = bin.join("realesrgan-ncnn-vulkan");
        std::fs::write(&binary, FAKE_UPSCALER).expect("write script");
        let mut perms = std::fs::metadata(&binary).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&binary, perms).expect("chmod");
        image::RgbImage::new(200, 200)
            .save(bin.join("fixture.png"))
            .expect("fixture");

        let models = dir.path().join("models");
        std::fs::create_dir(&models).expect("mkdir models");
        for model in ["realesrgan-x4plus", "realesr-animevideov3"] {
            std::fs::write(models.join(format!("{model}.param")), b"").expect("param");
            std::fs::write(models.join(format!("{model}.bin")), b"").expect("bin");
        }

        let vars: HashMap<&str, String> = HashMap::from([
            ("UPSCALE_ENABLE_GPU", "false".to_string()),
            ("UPSCALE_JOB_TIMEOUT_SECS", "10".to_string()),
            ("UPSCALE_MAX_FILE_SIZE_MB", "1".to_string()),
            ("UPSCALE_RETENTION_POLICY", policy.to_string()),
        ]);
        let config = AppConfig::from_lookup(|var| vars.get(var).cloned(), dir.path())
            .expect("config");

        let storage = Arc::new(
            StorageManager::new(config.storage_config())
                .await
                .expect("storage"),
        );
        let service = Arc::new(
            UpscaleService::with_subprocess(config.service_config())
                .await
                .expect("service"),
        );
        service.start_workers(config.max_concurrent_jobs);

        let intake = Intake::from_config(&config, Arc::clone(&service), storage);
        Self {
            dir,
            config,
            service,
            intake,
        }
    }

    fn recorded_args(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("bin/args")).expect("args recorded")
    }

    async fn wait_terminal(&self, id: &str) -> JobSnapshot {
        for _ in 0..500 {
            let snap = self.service.get_status(id).expect("job exists");
            if snap.status.is_terminal() {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }
}

fn png_bytes(dir: &Path, width: u32, height: u32) -> Vec<u8> {
    let path: PathBuf = dir.join("source.png");
    image::RgbImage::new(width, height).save(&path).expect("png");
    std::fs::read(&path).expect("read png")
}

// ---------------------------------------------------------------------------
// Test: an upload is upscaled and downloadable from the output directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_round_trip_with_defaults() {
    let host = Host::start("keep").await;
    let data = png_bytes(host.dir.path(), 50, 50);

    let id = host
        .intake
        .submit_upload("holiday.png", &data, SubmitOptions::default())
        .await
        .expect("submit");
    let snap = host.wait_terminal(&id).await;
    assert_eq!(snap.status, JobStatus::Completed, "{:?}", snap.error);

    let result = snap.result.expect("result");
    assert_eq!(result.input_size, ImageSize::new(50, 50));
    assert_eq!(result.output_size, ImageSize::new(200, 200));

    let artifact = host.intake.completed_artifact(&id).await.expect("artifact");
    assert_eq!(artifact.parent(), Some(host.config.output_dir.as_path()));
    assert!(artifact.to_str().unwrap().ends_with("_upscaled.png"));

    let args = host.recorded_args();
    assert!(args.contains("-s 4"), "{args}");
    assert!(args.contains("-n realesrgan-x4plus"), "{args}");
    assert!(args.contains("-g -1"), "{args}");

    // Kept under the default policy.
    assert!(!host.intake.finish_download(&artifact).await.unwrap());
    assert!(artifact.exists());

    host.service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: the host wires configured defaults into the intake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn intake_carries_configured_defaults() {
    let host = Host::start("keep").await;

    assert_eq!(host.intake.default_model(), host.config.default_model);
    assert_eq!(host.intake.default_scale(), host.config.default_scale);
    assert_eq!(host.intake.default_model(), "realesrgan-x4plus");
    assert_eq!(host.intake.default_scale(), 4);

    host.service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: explicit options override the configured defaults
// ---------------------------------------------------------------------------

#[tokio::test]
async fn explicit_options_are_forwarded() {
    let host = Host::start("keep").await;
    let data = png_bytes(host.dir.path(), 50, 50);

    let options = SubmitOptions {
        scale: Some(2),
        model_name: Some("realesr-animevideov3".into()),
        tile_size: 256,
        format: Some("webp".into()),
    };
    let id = host
        .intake
        .submit_upload("frame.png", &data, options)
        .await
        .expect("submit");
    let snap = host.wait_terminal(&id).await;
    assert_eq!(snap.status, JobStatus::Completed, "{:?}", snap.error);

    let artifact = snap.result.expect("result").output_path;
    assert!(artifact.to_str().unwrap().ends_with("_upscaled.webp"));

    let args = host.recorded_args();
    assert!(args.contains("-s 2"), "{args}");
    assert!(args.contains("-n realesr-animevideov3"), "{args}");
    assert!(args.contains("-t 256"), "{args}");
    assert!(args.contains("-f webp"), "{args}");

    host.service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: delete-after-download removes the artifact once served
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_after_download_policy() {
    let host = Host::start("delete_after_download").await;
    let data = png_bytes(host.dir.path(), 50, 50);

    let id = host
        .intake
        .submit_upload("holiday.png", &data, SubmitOptions::default())
        .await
        .expect("submit");
    host.wait_terminal(&id).await;

    let artifact = host.intake.completed_artifact(&id).await.expect("artifact");
    assert!(host.intake.finish_download(&artifact).await.unwrap());
    assert!(!artifact.exists());

    // A second download finds nothing on disk.
    let err = host.intake.completed_artifact(&id).await.unwrap_err();
    assert_matches!(err, IntakeError::OutputMissing(_));

    host.service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: artifacts are only served for completed jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn artifact_requires_completed_job() {
    let host = Host::start("keep").await;

    let err = host.intake.completed_artifact("missing").await.unwrap_err();
    assert_matches!(err, IntakeError::Job(CoreError::NotFound { .. }));

    let data = png_bytes(host.dir.path(), 50, 50);
    let options = SubmitOptions {
        scale: Some(7),
        ..SubmitOptions::default()
    };
    let id = host
        .intake
        .submit_upload("holiday.png", &data, options)
        .await
        .expect("submit");
    let snap = host.wait_terminal(&id).await;
    assert_eq!(snap.status, JobStatus::Failed);

    let err = host.intake.completed_artifact(&id).await.unwrap_err();
    assert_matches!(err, IntakeError::NotCompleted(JobStatus::Failed));

    host.service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: oversized uploads are rejected before a job exists
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let host = Host::start("keep").await;
    let data = vec![0u8; 2 * 1024 * 1024];

    let err = host
        .intake
        .submit_upload("huge.png", &data, SubmitOptions::default())
        .await
        .unwrap_err();
    assert_matches!(err, IntakeError::Storage(StorageError::FileTooLarge { .. }));
    assert!(host.service.registry().is_empty());
    assert_eq!(std::fs::read_dir(&host.config.upload_dir).unwrap().count(), 0);

    host.service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: a refused submission does not leave the upload behind
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_after_shutdown_removes_upload() {
    let host = Host::start("keep").await;
    host.service.shutdown().await;

    let data = png_bytes(host.dir.path(), 50, 50);
    let err = host
        .intake
        .submit_upload("late.png", &data, SubmitOptions::default())
        .await
        .unwrap_err();
    assert_matches!(err, IntakeError::Job(CoreError::Conflict(_)));
    assert_eq!(std::fs::read_dir(&host.config.upload_dir).unwrap().count(), 0);
}
