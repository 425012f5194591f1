//! actuation.rs
//! Command side of the shared cell plus the device, as one handle for the input watchers.
//!
//! Every actuation holds the `DeviceChannel` gate across "update command state, issue
//! open/close". Both watchers share one port, so their device commands are strictly
//! serialized with each other and with the sampler's reads. The command lock itself is
//! only held for the struct update inside that span.

use std::sync::Arc;

use crate::component_a::{
    device::{DeviceChannel, actuate},
    state_cell::SharedStateCell,
};
use crate::utils::{
    error::DeviceFault,
    metrics::{SharedMetrics, lock_metrics},
};

#[derive(Clone)]
pub struct ActuationPort {
    cell: Arc<SharedStateCell>,
    device: Arc<DeviceChannel>,
    metrics: SharedMetrics,
}

impl ActuationPort {
    pub fn new(cell: Arc<SharedStateCell>, device: Arc<DeviceChannel>, metrics: SharedMetrics) -> Self {
        Self { cell, device, metrics }
    }

    /// Flips the logical state and commands the device to match.
    /// The logical state keeps its new value even if the device call fails.
    pub fn toggle(&self) -> Result<bool, DeviceFault> {
        let (open, result) = self.device.with_device(|dev| {
            let open = self.cell.toggle_command();
            (open, actuate(dev, open))
        });
        self.count(&result);
        result.map(|_| open)
    }

    /// Makes the logical state equal `level`. Returns `Some(level)` when a command was
    /// issued, `None` when the state already matched.
    pub fn mirror(&self, level: bool) -> Result<Option<bool>, DeviceFault> {
        let outcome = self.device.with_device(|dev| {
            if self.cell.read_command().desired_open == level {
                return None;
            }
            self.cell.set_command(level);
            Some(actuate(dev, level))
        });
        match outcome {
            None => Ok(None),
            Some(result) => {
                self.count(&result);
                result.map(|_| Some(level))
            }
        }
    }

    pub fn record_button(&self, pressed: bool) {
        self.cell.set_button(pressed);
    }

    fn count(&self, result: &Result<(), DeviceFault>) {
        let mut m = lock_metrics(&self.metrics);
        match result {
            Ok(()) => m.actuations += 1,
            Err(_) => m.actuation_faults += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_a::device::SimulatedGripper;
    use crate::utils::metrics::shared_metrics;

    fn port() -> (ActuationPort, Arc<SharedStateCell>, SharedMetrics) {
        let cell = Arc::new(SharedStateCell::new());
        let device = Arc::new(DeviceChannel::new(Box::new(SimulatedGripper::new())));
        device.activate().unwrap();
        let metrics = shared_metrics();
        (ActuationPort::new(cell.clone(), device, metrics.clone()), cell, metrics)
    }

    #[test]
    fn toggle_alternates() {
        let (port, cell, metrics) = port();
        assert_eq!(port.toggle(), Ok(true));
        assert!(cell.read_command().desired_open);
        assert_eq!(port.toggle(), Ok(false));
        assert_eq!(lock_metrics(&metrics).actuations, 2);
    }

    #[test]
    fn mirror_only_acts_on_change() {
        let (port, _cell, metrics) = port();
        assert_eq!(port.mirror(false), Ok(None));
        assert_eq!(port.mirror(true), Ok(Some(true)));
        assert_eq!(port.mirror(true), Ok(None));
        assert_eq!(port.mirror(false), Ok(Some(false)));
        assert_eq!(lock_metrics(&metrics).actuations, 2);
    }

    #[test]
    fn failed_command_is_counted_and_state_kept() {
        let cell = Arc::new(SharedStateCell::new());
        // never activated: every command is rejected
        let device = Arc::new(DeviceChannel::new(Box::new(SimulatedGripper::new())));
        let metrics = shared_metrics();
        let port = ActuationPort::new(cell.clone(), device, metrics.clone());

        assert_eq!(port.toggle(), Err(DeviceFault::NotActivated));
        assert!(cell.read_command().desired_open);
        let m = lock_metrics(&metrics);
        assert_eq!(m.actuations, 0);
        assert_eq!(m.actuation_faults, 1);
    }
}
