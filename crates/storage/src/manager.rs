//! Upload/output directory management and retention policy.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::sweeper::{self, SweepReport};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Extension used when neither a format nor the original name gives one.
const DEFAULT_OUTPUT_EXT: &str = "png";

// ---------------------------------------------------------------------------
// RetentionPolicy
// ---------------------------------------------------------------------------

/// What happens to an output artifact once it has been downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Leave it for the sweeper.
    #[default]
    Keep,
    /// Delete it right after the first successful download.
    DeleteAfterDownload,
}

impl RetentionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::DeleteAfterDownload => "delete_after_download",
        }
    }
}

impl FromStr for RetentionPolicy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "delete_after_download" => Ok(Self::DeleteAfterDownload),
            _ => Err(StorageError::UnknownRetentionPolicy(s.to_string())),
        }
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StorageManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Largest accepted upload, in MiB.
    pub max_file_size_mb: u64,
    /// Age after which the sweeper removes an entry.
    pub cleanup_ttl: Duration,
    pub retention_policy: RetentionPolicy,
}

/// Owner of the upload and output directories.
#[derive(Debug, Clone)]
pub struct StorageManager {
    config: StorageConfig,
}

impl StorageManager {
    /// Create the manager, making sure both directories exist.
    pub async fn new(config: StorageConfig) -> Result<Self, StorageError> {
        for dir in [&config.upload_dir, &config.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::CreateDir {
                    path: dir.display().to_string(),
                    source,
                })?;
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Persist uploaded bytes under a unique name in the upload directory.
    ///
    /// Directory components in `filename` are discarded.
    pub async fn save_upload(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let size = data.len() as u64;
        let max_bytes = self.config.max_file_size_mb.saturating_mul(BYTES_PER_MB);
        if size > max_bytes {
            return Err(StorageError::FileTooLarge {
                size_mb: size.div_ceil(BYTES_PER_MB),
                max_mb: self.config.max_file_size_mb,
            });
        }

        let unique = uuid::Uuid::now_v7().simple();
        let path = self
            .config
            .upload_dir
            .join(format!("{unique}_{}", sanitize_filename(filename)));

        tokio::fs::write(&path, data)
            .await
            .map_err(|source| StorageError::io(&path, source))?;

        tracing::debug!(path = %path.display(), bytes = size, "Upload saved");
        Ok(path)
    }

    /// Final artifact path for `tag` (typically a job id).
    ///
    /// The extension is the requested `format`, else the original file's
    /// extension, else `png`.
    pub fn output_path(&self, tag: &str, original_filename: &str, format: Option<&str>) -> PathBuf {
        let ext = format
            .map(|f| f.trim_start_matches('.'))
            .filter(|f| !f.is_empty())
            .or_else(|| {
                Path::new(original_filename)
                    .extension()
                    .and_then(|e| e.to_str())
                    .filter(|e| !e.is_empty())
            })
            .unwrap_or(DEFAULT_OUTPUT_EXT);

        self.config
            .output_dir
            .join(format!("{tag}_upscaled.{}", ext.to_ascii_lowercase()))
    }

    /// Remove a file owned by this manager.
    pub async fn delete_file(&self, path: &Path) -> Result<(), StorageError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|source| StorageError::io(path, source))
    }

    pub fn should_delete_after_download(&self) -> bool {
        self.config.retention_policy == RetentionPolicy::DeleteAfterDownload
    }

    /// Apply the retention policy to an artifact that was just downloaded.
    ///
    /// Returns whether the file was deleted.
    pub async fn finish_download(&self, path: &Path) -> Result<bool, StorageError> {
        if !self.should_delete_after_download() {
            return Ok(false);
        }
        self.delete_file(path).await?;
        tracing::info!(path = %path.display(), "Artifact deleted after download");
        Ok(true)
    }

    /// Sweep both directories for entries older than the TTL.
    ///
    /// A directory that cannot be read is logged and counted as one failure;
    /// the other directory is still swept.
    pub async fn cleanup_old_files(&self) -> SweepReport {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.cleanup_ttl)
                .unwrap_or_else(|_| chrono::Duration::zero());

        let mut total = SweepReport::default();
        for dir in [&self.config.upload_dir, &self.config.output_dir] {
            match sweeper::sweep_dir(dir, cutoff).await {
                Ok(report) => total += report,
                Err(e) => {
                    tracing::error!(error = %e, "Cleanup: directory sweep failed");
                    total.failed += 1;
                }
            }
        }
        total
    }
}

/// Keep only the final path component of a client-supplied file name.
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    match base {
        "" | "." | ".." => "upload".to_string(),
        name => name.replace('\0', ""),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
