//! Process configuration loaded from environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use upscale_pipeline::service::ServiceConfig;
use upscale_runner::upscaler::{UpscalerConfig, SUPPORTED_SCALES};
use upscale_storage::manager::{RetentionPolicy, StorageConfig};

/// An environment variable held a value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot determine working directory: {0}")]
    CurrentDir(#[source] std::io::Error),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err("expected text or json".to_string()),
        }
    }
}

/// Full configuration of the upscale worker process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory relative paths are resolved against.
    pub base_dir: PathBuf,
    pub binary_path: PathBuf,
    pub models_path: PathBuf,
    /// Model used when a submission does not name one.
    pub default_model: String,
    /// Scale used when a submission does not give one.
    pub default_scale: u32,
    pub threads: String,
    pub enable_gpu: bool,
    pub gpu_id: Option<u32>,
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    pub job_timeout: Duration,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub max_file_size_mb: u64,
    pub cleanup_ttl: Duration,
    pub cleanup_interval: Duration,
    pub retention_policy: RetentionPolicy,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                      |
    /// |---------------------------------|------------------------------|
    /// | `UPSCALE_BASE_DIR`              | current working directory    |
    /// | `UPSCALE_BINARY_PATH`           | `bin/realesrgan-ncnn-vulkan` |
    /// | `UPSCALE_MODELS_PATH`           | `models`                     |
    /// | `UPSCALE_DEFAULT_MODEL`         | `realesrgan-x4plus`          |
    /// | `UPSCALE_DEFAULT_SCALE`         | `4`                          |
    /// | `UPSCALE_THREADS`               | `1:2:2`                      |
    /// | `UPSCALE_ENABLE_GPU`            | `true`                       |
    /// | `UPSCALE_GPU_ID`                | unset (auto)                 |
    /// | `UPSCALE_MAX_CONCURRENT_JOBS`   | `2`                          |
    /// | `UPSCALE_MAX_QUEUE_SIZE`        | `100`                        |
    /// | `UPSCALE_JOB_TIMEOUT_SECS`      | `600`                        |
    /// | `UPSCALE_UPLOAD_DIR`            | `data/uploads`               |
    /// | `UPSCALE_OUTPUT_DIR`            | `data/outputs`               |
    /// | `UPSCALE_STAGING_DIR`           | `data/tmp`                   |
    /// | `UPSCALE_MAX_FILE_SIZE_MB`      | `50`                         |
    /// | `UPSCALE_CLEANUP_TTL_MINS`      | `15`                         |
    /// | `UPSCALE_CLEANUP_INTERVAL_SECS` | `60`                         |
    /// | `UPSCALE_RETENTION_POLICY`      | `keep`                       |
    /// | `UPSCALE_LOG_FORMAT`            | `text`                       |
    ///
    /// Relative paths are resolved against `UPSCALE_BASE_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
        Self::from_lookup(|var| std::env::var(var).ok(), &cwd)
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// `cwd` is the base directory when `UPSCALE_BASE_DIR` is unset.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        cwd: &Path,
    ) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let base_dir = env
            .get("UPSCALE_BASE_DIR")
            .map(PathBuf::from)
            .map(|p| resolve(cwd, p))
            .unwrap_or_else(|| cwd.to_path_buf());
        let path = |var: &'static str, default: &str| {
            resolve(&base_dir, PathBuf::from(env.get(var).unwrap_or_else(|| default.to_string())))
        };

        let default_scale: u32 = env.parse("UPSCALE_DEFAULT_SCALE", 4)?;
        if !SUPPORTED_SCALES.contains(&default_scale) {
            return Err(invalid(
                "UPSCALE_DEFAULT_SCALE",
                default_scale.to_string(),
                format!("must be one of {SUPPORTED_SCALES:?}"),
            ));
        }

        let gpu_id: Option<u32> = match env.get("UPSCALE_GPU_ID") {
            Some(v) if !v.trim().is_empty() => Some(
                v.trim().parse().map_err(|e: std::num::ParseIntError| {
                    invalid("UPSCALE_GPU_ID", v.clone(), e.to_string())
                })?,
            ),
            _ => None,
        };

        let retention_policy: RetentionPolicy = match env.get("UPSCALE_RETENTION_POLICY") {
            Some(v) => v
                .parse()
                .map_err(|e: upscale_storage::StorageError| {
                    invalid("UPSCALE_RETENTION_POLICY", v.clone(), e.to_string())
                })?,
            None => RetentionPolicy::Keep,
        };

        let config = Self {
            binary_path: path("UPSCALE_BINARY_PATH", "bin/realesrgan-ncnn-vulkan"),
            models_path: path("UPSCALE_MODELS_PATH", "models"),
            default_model: env
                .get("UPSCALE_DEFAULT_MODEL")
                .unwrap_or_else(|| "realesrgan-x4plus".to_string()),
            default_scale,
            threads: env
                .get("UPSCALE_THREADS")
                .unwrap_or_else(|| "1:2:2".to_string()),
            enable_gpu: env.parse_bool("UPSCALE_ENABLE_GPU", true)?,
            gpu_id,
            max_concurrent_jobs: env.parse_positive("UPSCALE_MAX_CONCURRENT_JOBS", 2)?,
            max_queue_size: env.parse_positive("UPSCALE_MAX_QUEUE_SIZE", 100)?,
            job_timeout: Duration::from_secs(env.parse_positive("UPSCALE_JOB_TIMEOUT_SECS", 600)?),
            upload_dir: path("UPSCALE_UPLOAD_DIR", "data/uploads"),
            output_dir: path("UPSCALE_OUTPUT_DIR", "data/outputs"),
            staging_dir: path("UPSCALE_STAGING_DIR", "data/tmp"),
            max_file_size_mb: env.parse_positive("UPSCALE_MAX_FILE_SIZE_MB", 50)?,
            cleanup_ttl: Duration::from_secs(
                env.parse::<u64>("UPSCALE_CLEANUP_TTL_MINS", 15)?
                    .saturating_mul(60),
            ),
            cleanup_interval: Duration::from_secs(
                env.parse_positive("UPSCALE_CLEANUP_INTERVAL_SECS", 60)?,
            ),
            retention_policy,
            log_format: env.parse("UPSCALE_LOG_FORMAT", LogFormat::Text)?,
            base_dir,
        };

        Ok(config)
    }

    pub fn upscaler_config(&self) -> UpscalerConfig {
        UpscalerConfig {
            binary_path: self.binary_path.clone(),
            models_path: self.models_path.clone(),
            threads: self.threads.clone(),
            enable_gpu: self.enable_gpu,
            gpu_id: self.gpu_id,
            timeout: self.job_timeout,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new(self.upscaler_config(), &self.staging_dir);
        config.max_queue_size = self.max_queue_size;
        config
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            upload_dir: self.upload_dir.clone(),
            output_dir: self.output_dir.clone(),
            max_file_size_mb: self.max_file_size_mb,
            cleanup_ttl: self.cleanup_ttl,
            retention_policy: self.retention_policy,
        }
    }
}

/// Typed accessors over a variable lookup function.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            Some(v) => v.trim().parse().map_err(|e: T::Err| invalid(var, v, e.to_string())),
            None => Ok(default),
        }
    }

    fn parse_positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + std::fmt::Display,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(var, default)?;
        if value <= T::default() {
            return Err(invalid(var, value.to_string(), "must be greater than zero".into()));
        }
        Ok(value)
    }

    fn parse_bool(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(var) {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(var, v, "expected a boolean".into())),
            },
            None => Ok(default),
        }
    }
}

fn invalid(var: &'static str, value: String, reason: String) -> ConfigError {
    ConfigError::Invalid { var, value, reason }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
