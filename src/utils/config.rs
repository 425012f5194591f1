//! Runtime configuration for both binaries.
//!
//! Every field has a default matching the test cell's wiring, so an absent or
//! partial TOML file is valid. `validate()` is the only place a `ConfigFault`
//! is produced; it runs once at startup.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::component_a::serializer::WireFormat;
use crate::utils::error::ConfigFault;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub telemetry: TelemetryConfig,
    pub heartbeat: HeartbeatConfig,
    pub input: InputConfig,
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub sample_period_ms: u64,
    pub stream_period_ms: u64,
    pub bind_addr: String,
    pub format: WireFormat,
    /// Pin the sampler thread to this core when set.
    pub sampler_core: Option<usize>,
    pub summary_csv: Option<PathBuf>,
    /// Pause between activation and the initial close at startup.
    pub startup_settle_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 250,
            stream_period_ms: 33,
            bind_addr: "0.0.0.0:10000".into(),
            format: WireFormat::Json,
            sampler_core: None,
            summary_csv: Some(PathBuf::from("data/telemetry_summary.csv")),
            startup_settle_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub group: String,
    pub port: u16,
    /// IPv4 TTL or IPv6 hop limit.
    pub ttl: u32,
    pub period_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: "169.254.152.170".into(),
            port: 8123,
            ttl: 1,
            period_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub momentary: bool,
    pub latched: bool,
    pub debounce_ms: u64,
    pub latch_poll_ms: u64,
    pub edge_poll_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            momentary: false,
            latched: true,
            debounce_ms: 500,
            latch_poll_ms: 10,
            edge_poll_ms: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub completion_poll_ms: u64,
    pub flag_poll_ms: u64,
    pub gripper: GripperRelayConfig,
    pub audio: AudioConfig,
    pub robot: RobotConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            completion_poll_ms: 1_000,
            flag_poll_ms: 50,
            gripper: GripperRelayConfig::default(),
            audio: AudioConfig::default(),
            robot: RobotConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GripperRelayConfig {
    pub enabled: bool,
    pub addr: String,
    pub read_timeout_ms: u64,
}

impl Default for GripperRelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "169.254.116.100:10000".into(),
            read_timeout_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    pub enabled: bool,
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_index: None,
            sample_rate: 44_100,
            channels: 1,
            chunk: 4_096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotConfig {
    pub enabled: bool,
    pub addr: String,
    pub frequency_hz: u32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "169.254.152.41:30004".into(),
            frequency_hz: 125,
        }
    }
}

impl AppConfig {
    /// Loads `path` when given, otherwise the defaults; validates either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFault> {
        let config = match path {
            Some(p) => toml::from_str::<AppConfig>(&fs::read_to_string(p)?)?,
            None => AppConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigFault> {
        let t = &self.telemetry;
        nonzero("telemetry.sample_period_ms", t.sample_period_ms)?;
        nonzero("telemetry.stream_period_ms", t.stream_period_ms)?;
        t.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigFault::invalid("telemetry.bind_addr", e.to_string()))?;

        let h = &self.heartbeat;
        nonzero("heartbeat.period_ms", h.period_ms)?;
        h.group
            .parse::<IpAddr>()
            .map_err(|e| ConfigFault::invalid("heartbeat.group", e.to_string()))?;
        if !(1..=255).contains(&h.ttl) {
            return Err(ConfigFault::invalid("heartbeat.ttl", "must be within 1..=255"));
        }

        let i = &self.input;
        nonzero("input.debounce_ms", i.debounce_ms)?;
        nonzero("input.latch_poll_ms", i.latch_poll_ms)?;
        nonzero("input.edge_poll_ms", i.edge_poll_ms)?;

        let r = &self.recorder;
        nonzero("recorder.completion_poll_ms", r.completion_poll_ms)?;
        nonzero("recorder.flag_poll_ms", r.flag_poll_ms)?;
        if !(r.gripper.enabled || r.audio.enabled || r.robot.enabled) {
            return Err(ConfigFault::invalid(
                "recorder",
                "at least one of gripper, audio, robot must be enabled",
            ));
        }
        if r.gripper.enabled {
            r.gripper
                .addr
                .parse::<SocketAddr>()
                .map_err(|e| ConfigFault::invalid("recorder.gripper.addr", e.to_string()))?;
            nonzero("recorder.gripper.read_timeout_ms", r.gripper.read_timeout_ms)?;
        }
        if r.audio.enabled {
            nonzero("recorder.audio.sample_rate", r.audio.sample_rate as u64)?;
            nonzero("recorder.audio.channels", r.audio.channels as u64)?;
            nonzero("recorder.audio.chunk", r.audio.chunk as u64)?;
        }
        if r.robot.enabled {
            r.robot
                .addr
                .parse::<SocketAddr>()
                .map_err(|e| ConfigFault::invalid("recorder.robot.addr", e.to_string()))?;
            nonzero("recorder.robot.frequency_hz", r.robot.frequency_hz as u64)?;
        }
        Ok(())
    }
}

impl TelemetryConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn stream_period(&self) -> Duration {
        Duration::from_millis(self.stream_period_ms)
    }

    pub fn startup_settle(&self) -> Duration {
        Duration::from_millis(self.startup_settle_ms)
    }
}

impl InputConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn latch_poll(&self) -> Duration {
        Duration::from_millis(self.latch_poll_ms)
    }

    pub fn edge_poll(&self) -> Duration {
        Duration::from_millis(self.edge_poll_ms)
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl RecorderConfig {
    pub fn flag_poll(&self) -> Duration {
        Duration::from_millis(self.flag_poll_ms)
    }

    pub fn completion_poll(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms)
    }
}

fn nonzero(field: &'static str, value: u64) -> Result<(), ConfigFault> {
    if value == 0 {
        Err(ConfigFault::invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}
