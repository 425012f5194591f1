//! Test-cell telemetry and session recording.
//!
//! - `component_a`: gripper sampling, snapshot cell, wire serializer, stream server, heartbeat
//! - `component_b`: physical-input state machines driving the open/close command
//! - `recorder`: multi-source session capture behind a start/stop control surface
//! - `runtime`: thread bring-up and shutdown for the hand interface
//! - `utils`: config, faults, cancellation, metrics

pub mod component_a;
pub mod component_b;
pub mod recorder;
pub mod runtime;
pub mod utils;
