//! Domain types for the upscale job engine.
//!
//! Pure data and validation with no async runtime dependency: job
//! requests, results, status snapshots, the job state machine, and image
//! dimension probing. Shared by the runner, pipeline, storage, and worker
//! crates.

pub mod error;
pub mod image_info;
pub mod job;
pub mod types;
