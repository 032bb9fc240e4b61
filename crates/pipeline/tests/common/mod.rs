use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use upscale_core::image_info::read_dimensions;
use upscale_core::job::{JobSnapshot, UpscaleRequest};
use upscale_pipeline::service::{ServiceConfig, UpscaleService};
use upscale_runner::error::RunError;
use upscale_runner::executor::{ExitInfo, Invocation, ProcessExecutor, ProgressFn};
use upscale_runner::upscaler::UpscalerConfig;

/// What the fake upscaler does when invoked.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Report `progress`, then write the input scaled by `-s` to `-o`.
    Succeed { progress: Vec<f64> },
    /// Like `Succeed`, but sleeps first and ignores cancellation.
    SlowSucceed { delay: Duration },
    /// Exit non-zero with the given stderr.
    Fail { exit_code: i32, stderr: String },
    /// Report some progress, then run until cancelled or timed out.
    Block,
}

/// In-process stand-in for the upscaler binary.
pub struct FakeExecutor {
    behavior: Behavior,
    pub invocations: Arc<AtomicUsize>,
}

impl FakeExecutor {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> &'a str {
    let i = args.iter().position(|a| a == flag).expect("flag present");
    &args[i + 1]
}

fn write_scaled_output(invocation: &Invocation) {
    let input = arg_after(&invocation.args, "-i");
    let output = arg_after(&invocation.args, "-o");
    let scale: u32 = arg_after(&invocation.args, "-s").parse().expect("scale");
    let size = read_dimensions(Path::new(input)).expect("input dimensions");
    let scaled = size.scaled(scale);
    image::RgbImage::new(scaled.width, scaled.height)
        .save(output)
        .expect("write output");
}

impl ProcessExecutor for FakeExecutor {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<ExitInfo, RunError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let ok = ExitInfo {
            exit_code: 0,
            duration_ms: 1,
        };

        match &self.behavior {
            Behavior::Succeed { progress } => {
                for p in progress {
                    on_progress(*p);
                }
                write_scaled_output(invocation);
                Ok(ok)
            }
            Behavior::SlowSucceed { delay } => {
                tokio::time::sleep(*delay).await;
                write_scaled_output(invocation);
                Ok(ok)
            }
            Behavior::Fail { exit_code, stderr } => Err(RunError::ExitStatus {
                exit_code: *exit_code,
                stderr: stderr.clone(),
            }),
            Behavior::Block => {
                on_progress(12.0);
                tokio::select! {
                    _ = cancel.cancelled() => Err(RunError::Cancelled),
                    _ = tokio::time::sleep(invocation.timeout) => Err(RunError::TimedOut {
                        after: invocation.timeout,
                    }),
                }
            }
        }
    }
}

/// Directory layout for one test: binary, models, uploads, outputs, tmp.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        for sub in ["bin", "models", "uploads", "outputs"] {
            std::fs::create_dir(root.join(sub)).expect("mkdir");
        }

        let binary = root.join("bin").join("realesrgan-ncnn-vulkan");
        std::fs::write(&binary, "#!/bin/sh\nexit 0\n").expect("binary");
        let mut perms = std::fs::metadata(&binary).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&binary, perms).expect("chmod");

        std::fs::write(root.join("models").join("realesrgan-x4plus.param"), b"").expect("param");
        std::fs::write(root.join("models").join("realesrgan-x4plus.bin"), b"").expect("bin");

        image::RgbImage::new(100, 100)
            .save(root.join("uploads").join("photo.png"))
            .expect("input");

        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn config(&self, timeout: Duration) -> ServiceConfig {
        let mut config = ServiceConfig::new(
            UpscalerConfig {
                binary_path: self.path("bin/realesrgan-ncnn-vulkan"),
                models_path: self.path("models"),
                threads: "1:2:2".into(),
                enable_gpu: true,
                gpu_id: None,
                timeout,
            },
            self.path("tmp"),
        );
        config.shutdown_grace = Duration::from_secs(5);
        config
    }

    pub fn request(&self, scale: u32, output_name: &str) -> UpscaleRequest {
        UpscaleRequest {
            input_path: self.path("uploads/photo.png"),
            output_path: self.path("outputs").join(output_name),
            scale,
            model_name: "realesrgan-x4plus".into(),
            tile_size: 0,
            format: None,
        }
    }

    /// Build a service with `workers` workers around `behavior`.
    pub async fn service(
        &self,
        behavior: Behavior,
        workers: usize,
        timeout: Duration,
    ) -> (UpscaleService<FakeExecutor>, Arc<AtomicUsize>) {
        let executor = FakeExecutor::new(behavior);
        let invocations = Arc::clone(&executor.invocations);
        let service = UpscaleService::new(self.config(timeout), executor)
            .await
            .expect("service");
        service.start_workers(workers);
        (service, invocations)
    }

    pub fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.path("tmp"))
            .expect("read tmp")
            .next()
            .is_none()
    }
}

/// Poll until `pred` holds for the job, or panic after a few seconds.
pub async fn wait_for<E>(
    service: &UpscaleService<E>,
    id: &str,
    pred: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot
where
    E: ProcessExecutor + 'static,
{
    for _ in 0..500 {
        let snap = service.get_status(id).expect("job exists");
        if pred(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached expected state: {:?}", service.get_status(id));
}

pub async fn wait_terminal<E>(service: &UpscaleService<E>, id: &str) -> JobSnapshot
where
    E: ProcessExecutor + 'static,
{
    wait_for(service, id, |s| s.status.is_terminal()).await
}
