//Recorder: session-scoped capture of the gripper stream, timecode audio and robot motion state
//One capture thread per enabled source, all driven by the orchestrator's recording flag
pub mod session;
pub mod capture;
pub mod orchestrator;
pub mod gripper_relay;
pub mod wav;
pub mod audio;
pub mod motion;

use std::{net::SocketAddr, time::Duration};

use crate::recorder::{
    audio::{AudioDriver, AudioFormat, AudioRecorder},
    capture::SessionRecorder,
    gripper_relay::GripperRelayRecorder,
    motion::{MotionDriver, MotionRecorder, SimulatedMotion},
};
use crate::utils::{config::RecorderConfig, error::ConfigFault};

/// Builds one recorder per enabled source. `audio` is the driver plus the chosen input
/// device; it is only consulted when audio is enabled.
pub fn recorders_from_config(
    config: &RecorderConfig,
    audio: Option<(Box<dyn AudioDriver>, usize)>,
) -> Result<Vec<Box<dyn SessionRecorder>>, ConfigFault> {
    let mut recorders: Vec<Box<dyn SessionRecorder>> = Vec::new();

    if config.gripper.enabled {
        let addr: SocketAddr = config
            .gripper
            .addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigFault::invalid("recorder.gripper.addr", e.to_string()))?;
        recorders.push(Box::new(GripperRelayRecorder::new(
            addr,
            Duration::from_millis(config.gripper.read_timeout_ms),
        )));
    }

    if config.audio.enabled {
        let (driver, device) = audio.ok_or_else(|| {
            ConfigFault::invalid("recorder.audio", "enabled but no audio driver was supplied")
        })?;
        recorders.push(Box::new(AudioRecorder::new(
            driver,
            device,
            AudioFormat::from(&config.audio),
        )));
    }

    if config.robot.enabled {
        let driver: Box<dyn MotionDriver> =
            Box::new(SimulatedMotion::new(config.robot.addr.clone(), config.robot.frequency_hz));
        recorders.push(Box::new(MotionRecorder::new(driver, config.robot.frequency_hz)));
    }

    Ok(recorders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{audio::SimulatedTimecode, session::SourceKind};

    #[test]
    fn only_enabled_sources_are_built() {
        let mut config = RecorderConfig::default();
        config.robot.enabled = true;
        let kinds: Vec<SourceKind> = recorders_from_config(&config, None)
            .unwrap()
            .iter()
            .map(|r| r.kind())
            .collect();
        assert_eq!(kinds, vec![SourceKind::Gripper, SourceKind::Robot]);
    }

    #[test]
    fn audio_needs_a_driver() {
        let mut config = RecorderConfig::default();
        config.audio.enabled = true;
        assert!(recorders_from_config(&config, None).is_err());

        let driver: Box<dyn AudioDriver> = Box::new(SimulatedTimecode::new());
        let recorders = recorders_from_config(&config, Some((driver, 0))).unwrap();
        assert_eq!(recorders.len(), 2);
    }
}
