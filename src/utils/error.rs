//! Fault taxonomy shared by the telemetry and recording halves.
//!
//! - `DeviceFault`: a gripper facade call failed. Never fatal; the sampler reuses the
//!   previous reading and input machines skip the actuation.
//! - `SourceFault`: a capture source failed. Ends that one capture task's session.
//! - `ProtocolFault`: a source delivered malformed data; always surfaced as a `SourceFault`.
//! - `ConfigFault`: rejected configuration, fatal at startup only.
//! - `SessionError`: the recorder control surface refused a request.

use std::io;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceFault {
    #[error("gripper is not activated")]
    NotActivated,

    #[error("gripper did not answer within {0} ms")]
    Timeout(u64),

    #[error("gripper communication failed: {0}")]
    Comm(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolFault {
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame exceeds {limit} bytes without terminating")]
    Oversized { limit: usize },
}

#[derive(Error, Debug)]
pub enum SourceFault {
    #[error("could not connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("source closed the connection")]
    Closed,

    #[error("source I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolFault),

    #[error("motion-state row could not be written: {0}")]
    Csv(#[from] csv::Error),

    #[error("source driver failed: {0}")]
    Driver(String),
}

#[derive(Error, Debug)]
pub enum ConfigFault {
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("could not read config file: {0}")]
    Read(#[from] io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigFault {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigFault::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a recording session is already running ({0})")]
    AlreadyRecording(String),

    #[error("previous session is still draining: {0:?}")]
    StillDraining(Vec<&'static str>),

    #[error("no recording session is running")]
    NotRecording,

    #[error("recorder is shutting down")]
    ShuttingDown,

    #[error("stop cancelled while {0:?} were still writing")]
    DrainAbandoned(Vec<&'static str>),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoded frame is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_fault_wraps_into_source_fault() {
        let fault: SourceFault = ProtocolFault::Malformed("unbalanced braces".into()).into();
        let msg = fault.to_string();
        assert!(msg.contains("protocol error"), "{msg}");
        assert!(msg.contains("unbalanced braces"), "{msg}");
    }

    #[test]
    fn config_fault_names_the_field() {
        let fault = ConfigFault::invalid("telemetry.sample_period_ms", "must be > 0");
        assert_eq!(
            fault.to_string(),
            "invalid `telemetry.sample_period_ms`: must be > 0"
        );
    }
}
