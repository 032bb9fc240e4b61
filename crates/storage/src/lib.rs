//! Upload and output directory management.
//!
//! [`manager::StorageManager`] owns the user-visible upload and output
//! directories and the retention policy for downloaded artifacts;
//! [`sweeper`] reaps entries older than the configured TTL.

pub mod error;
pub mod manager;
pub mod sweeper;

pub use error::StorageError;
pub use manager::{RetentionPolicy, StorageConfig, StorageManager};
pub use sweeper::SweepReport;
