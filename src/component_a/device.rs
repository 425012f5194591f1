//! device.rs
//! Gripper access facade and the channel that owns it.
//!
//! `GripperDevice` is the narrow driver surface (activate, open, close, state reads).
//! `DeviceChannel` is the single logical owner of the physical device: every call goes
//! through its gate, so sampler reads and actuation commands never overlap.
//! `SimulatedGripper` stands in for the real hardware with a noisy first-order position model.

use parking_lot::Mutex;
use rand::random_range;
use std::time::Instant;

use crate::utils::error::DeviceFault;

/// Full stroke of the simulated gripper in millimetres.
pub const STROKE_MM: f64 = 85.0;
/// Raw position when fully closed (0 is fully open).
pub const RAW_CLOSED: i32 = 255;

pub trait GripperDevice: Send {
    fn activate(&mut self) -> Result<(), DeviceFault>;

    /// The gripper calibrates its stroke as part of activation.
    fn calibrate_via_activate(&mut self) -> Result<(), DeviceFault> {
        self.activate()
    }

    fn open(&mut self) -> Result<(), DeviceFault>;
    fn close(&mut self) -> Result<(), DeviceFault>;
    fn is_activated(&mut self) -> Result<bool, DeviceFault>;
    fn is_calibrated(&mut self) -> Result<bool, DeviceFault>;
    fn position_raw(&mut self) -> Result<i32, DeviceFault>;
    /// Only meaningful when calibrated.
    fn position_mm(&mut self) -> Result<f64, DeviceFault>;
}

/// Device-derived part of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub activated: bool,
    pub calibrated: bool,
    pub position_raw: i32,
    /// `None` when the stroke is not calibrated.
    pub position_mm: Option<f64>,
}

impl DeviceStatus {
    pub const UNKNOWN: DeviceStatus = DeviceStatus {
        activated: false,
        calibrated: false,
        position_raw: 0,
        position_mm: None,
    };

    /// Reads the full status; `position_mm` is skipped when not calibrated.
    pub fn read(device: &mut dyn GripperDevice) -> Result<Self, DeviceFault> {
        let activated = device.is_activated()?;
        let calibrated = device.is_calibrated()?;
        let position_raw = device.position_raw()?;
        let position_mm = if calibrated {
            Some(device.position_mm()?)
        } else {
            None
        };
        Ok(Self {
            activated,
            calibrated,
            position_raw,
            position_mm,
        })
    }
}

/// Gate around the one physical device.
pub struct DeviceChannel {
    device: Mutex<Box<dyn GripperDevice>>,
}

impl DeviceChannel {
    pub fn new(device: Box<dyn GripperDevice>) -> Self {
        Self {
            device: Mutex::new(device),
        }
    }

    /// Runs `f` with exclusive access to the device.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn GripperDevice) -> R) -> R {
        let mut guard = self.device.lock();
        f(&mut **guard)
    }

    pub fn read_status(&self) -> Result<DeviceStatus, DeviceFault> {
        self.with_device(DeviceStatus::read)
    }

    pub fn activate(&self) -> Result<(), DeviceFault> {
        self.with_device(|d| d.calibrate_via_activate())
    }

    /// Issues open (`true`) or close (`false`).
    pub fn actuate(&self, open: bool) -> Result<(), DeviceFault> {
        self.with_device(|d| actuate(d, open))
    }
}

#[inline]
pub fn actuate(device: &mut dyn GripperDevice, open: bool) -> Result<(), DeviceFault> {
    if open { device.open() } else { device.close() }
}

/// Software gripper: position slews toward the commanded target at a fixed rate.
pub struct SimulatedGripper {
    activated: bool,
    target_raw: i32,
    position: f64,
    last_update: Instant,
    slew_per_sec: f64,
    fault_rate: f64,
}

impl SimulatedGripper {
    pub fn new() -> Self {
        Self {
            activated: false,
            target_raw: 0,
            position: 0.0,
            last_update: Instant::now(),
            slew_per_sec: 400.0,
            fault_rate: 0.0,
        }
    }

    /// Probability in `[0, 1)` that any single call reports a communication fault.
    pub fn with_fault_rate(mut self, fault_rate: f64) -> Self {
        self.fault_rate = fault_rate.clamp(0.0, 0.99);
        self
    }

    fn link(&self) -> Result<(), DeviceFault> {
        if self.fault_rate > 0.0 && random_range(0.0..1.0) < self.fault_rate {
            return Err(DeviceFault::Comm("simulated modbus CRC error".into()));
        }
        Ok(())
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        if !self.activated {
            return;
        }
        let target = self.target_raw as f64;
        let step = self.slew_per_sec * dt;
        let delta = target - self.position;
        self.position = if delta.abs() <= step {
            target
        } else {
            self.position + step.copysign(delta)
        };
    }

    fn require_active(&self) -> Result<(), DeviceFault> {
        if self.activated { Ok(()) } else { Err(DeviceFault::NotActivated) }
    }
}

impl Default for SimulatedGripper {
    fn default() -> Self {
        Self::new()
    }
}

impl GripperDevice for SimulatedGripper {
    fn activate(&mut self) -> Result<(), DeviceFault> {
        self.link()?;
        self.advance();
        self.activated = true;
        Ok(())
    }

    fn open(&mut self) -> Result<(), DeviceFault> {
        self.link()?;
        self.require_active()?;
        self.advance();
        self.target_raw = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceFault> {
        self.link()?;
        self.require_active()?;
        self.advance();
        self.target_raw = RAW_CLOSED;
        Ok(())
    }

    fn is_activated(&mut self) -> Result<bool, DeviceFault> {
        self.link()?;
        Ok(self.activated)
    }

    fn is_calibrated(&mut self) -> Result<bool, DeviceFault> {
        self.link()?;
        Ok(self.activated)
    }

    fn position_raw(&mut self) -> Result<i32, DeviceFault> {
        self.link()?;
        self.advance();
        let noise = random_range(-0.4..0.4);
        Ok((self.position + noise).round().clamp(0.0, RAW_CLOSED as f64) as i32)
    }

    fn position_mm(&mut self) -> Result<f64, DeviceFault> {
        self.link()?;
        self.require_active()?;
        self.advance();
        let open_fraction = 1.0 - self.position / RAW_CLOSED as f64;
        Ok((open_fraction * STROKE_MM * 10.0).round() / 10.0)
    }
}
