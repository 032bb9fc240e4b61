//! Host wiring for the upscale job engine.
//!
//! [`config::AppConfig`] reads the environment; [`intake::Intake`] is the
//! entry point request handlers use to submit uploads and serve results.

pub mod config;
pub mod intake;
