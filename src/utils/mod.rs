//! Shared plumbing: configuration, fault types, cancellation, metrics, console input.

pub mod cancel;
pub mod config;
pub mod console;
pub mod error;
pub mod metrics;
pub mod metrics_export;
