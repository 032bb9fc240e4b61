//! Supervision of the external upscaler executable.
//!
//! [`upscaler::Upscaler`] validates a request, builds the command line,
//! runs it through a [`executor::ProcessExecutor`], and introspects the
//! produced file. The executor abstraction keeps the progress-parsing and
//! orchestration logic testable without spawning real processes.

pub mod error;
pub mod executor;
pub mod models;
pub mod progress;
pub mod subprocess;
pub mod upscaler;
