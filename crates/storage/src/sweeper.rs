//! Periodic removal of aged uploads and outputs.
//!
//! Runs independently of job state: anything in the upload or output
//! directory older than the TTL is removed. The sweep is best-effort, and
//! an entry that cannot be removed is logged and skipped.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::manager::StorageManager;

/// Default pause between sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Remove every entry of `dir` last modified strictly before `cutoff`.
///
/// Files are removed with `remove_file`; directories only when empty.
/// Per-entry failures are counted, never returned; only an unreadable
/// `dir` is an error.
pub async fn sweep_dir(dir: &Path, cutoff: DateTime<Utc>) -> Result<SweepReport, StorageError> {
    let read_err = |source| StorageError::ReadDir {
        path: dir.display().to_string(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut report = SweepReport::default();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Cleanup: failed to read entry");
                report.failed += 1;
                break;
            }
        };
        let path = entry.path();

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cleanup: failed to stat entry");
                report.failed += 1;
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cleanup: no modification time");
                report.failed += 1;
                continue;
            }
        };

        if modified >= cutoff {
            continue;
        }

        let removal = if metadata.is_dir() {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match removal {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Cleanup: removed");
                report.removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cleanup: failed to remove");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Run the cleanup loop until `cancel` fires.
///
/// The first sweep happens immediately.
pub async fn run(manager: Arc<StorageManager>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        ttl_secs = manager.config().cleanup_ttl.as_secs(),
        interval_secs = interval.as_secs(),
        "Cleanup sweeper started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Cleanup sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                let report = manager.cleanup_old_files().await;
                if report.removed > 0 || report.failed > 0 {
                    tracing::info!(
                        removed = report.removed,
                        failed = report.failed,
                        "Cleanup: sweep finished"
                    );
                } else {
                    tracing::debug!("Cleanup: nothing to remove");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
