//! Asynchronous upscale job orchestration.
//!
//! [`service::UpscaleService`] is the entry point: it owns a
//! [`registry::JobRegistry`], a bounded dispatch queue feeding a fixed pool
//! of workers, a private [`staging::StagingArea`], and an
//! [`events::EventBus`] for job lifecycle notifications.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod registry;
pub mod service;
pub mod staging;
mod worker;

pub use error::PipelineError;
pub use events::{EventBus, JobEvent, JobEventKind};
pub use registry::JobRegistry;
pub use service::{ServiceConfig, UpscaleService};
