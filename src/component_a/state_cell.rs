//! state_cell.rs
//! Latest-wins shared state between the sampler, the stream server and the input watchers.
//!
//! Two independent critical sections:
//! - snapshot lock: written only by the sampler, read by the stream server path
//! - command lock: written by the input watchers, read by the sampler
//!
//! Hold time on either lock is one struct copy. Device I/O never happens under these
//! locks; it goes through the `DeviceChannel` gate instead. When both are needed the
//! order is gate → command lock, and the snapshot lock is never nested with either.

use parking_lot::Mutex;
use std::time::SystemTime;

use crate::component_a::device::DeviceStatus;

/// Sentinel published for `position_mm` while the stroke is uncalibrated.
pub const UNCALIBRATED_MM: f64 = -1.0;

/// Composed view of device and actuator state at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub activated: bool,
    pub calibrated: bool,
    pub position_raw: i32,
    pub position_mm: f64,
    pub button_pressed: bool,
    pub commanded_open: bool,
    pub last_command_time: SystemTime,
    /// Sampler cycle that produced this snapshot.
    pub seq: u64,
}

impl Snapshot {
    pub fn compose(status: DeviceStatus, command: CommandState, seq: u64) -> Self {
        let position_mm = match (status.calibrated, status.position_mm) {
            (true, Some(mm)) => mm,
            _ => UNCALIBRATED_MM,
        };
        Self {
            activated: status.activated,
            calibrated: status.calibrated,
            position_raw: status.position_raw,
            position_mm,
            button_pressed: command.button_pressed,
            commanded_open: command.desired_open,
            last_command_time: command.last_transition_time,
            seq,
        }
    }

    pub fn initial(at: SystemTime) -> Self {
        Self::compose(DeviceStatus::UNKNOWN, CommandState::initial(at), 0)
    }
}

/// Desired actuator state as decided by input handling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandState {
    pub desired_open: bool,
    pub button_pressed: bool,
    pub last_transition_time: SystemTime,
}

impl CommandState {
    pub fn initial(at: SystemTime) -> Self {
        Self {
            desired_open: false,
            button_pressed: false,
            last_transition_time: at,
        }
    }
}

pub struct SharedStateCell {
    snapshot: Mutex<Snapshot>,
    command: Mutex<CommandState>,
}

impl SharedStateCell {
    pub fn new() -> Self {
        let now = SystemTime::now();
        Self {
            snapshot: Mutex::new(Snapshot::initial(now)),
            command: Mutex::new(CommandState::initial(now)),
        }
    }

    #[inline]
    pub fn replace_snapshot(&self, new: Snapshot) {
        *self.snapshot.lock() = new;
    }

    #[inline]
    pub fn read_snapshot(&self) -> Snapshot {
        *self.snapshot.lock()
    }

    #[inline]
    pub fn read_command(&self) -> CommandState {
        *self.command.lock()
    }

    /// Sets the desired state; returns the previous command state.
    pub fn set_command(&self, open: bool) -> CommandState {
        let mut cmd = self.command.lock();
        let prev = *cmd;
        cmd.desired_open = open;
        cmd.last_transition_time = SystemTime::now();
        prev
    }

    /// Flips the desired state; returns the new value.
    pub fn toggle_command(&self) -> bool {
        let mut cmd = self.command.lock();
        cmd.desired_open = !cmd.desired_open;
        cmd.last_transition_time = SystemTime::now();
        cmd.desired_open
    }

    /// Mirrors the momentary button level for telemetry. Leaves `desired_open` alone.
    pub fn set_button(&self, pressed: bool) {
        self.command.lock().button_pressed = pressed;
    }
}

impl Default for SharedStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::{Duration, UNIX_EPOCH},
    };

    /// Every field derived from `i`, so a mix of two writes is detectable.
    fn snapshot_for(i: u64) -> Snapshot {
        let even = i % 2 == 0;
        Snapshot {
            activated: even,
            calibrated: even,
            position_raw: (i % 256) as i32,
            position_mm: if even { i as f64 } else { UNCALIBRATED_MM },
            button_pressed: !even,
            commanded_open: even,
            last_command_time: UNIX_EPOCH + Duration::from_millis(i),
            seq: i,
        }
    }

    #[test]
    fn uncalibrated_compose_uses_sentinel() {
        let status = DeviceStatus {
            activated: true,
            calibrated: false,
            position_raw: 12,
            position_mm: Some(33.0),
        };
        let snap = Snapshot::compose(status, CommandState::initial(UNIX_EPOCH), 4);
        assert_eq!(snap.position_mm, UNCALIBRATED_MM);
        assert_eq!(snap.position_raw, 12);
        assert_eq!(snap.seq, 4);
    }

    #[test]
    fn compose_folds_command_side() {
        let status = DeviceStatus {
            activated: true,
            calibrated: true,
            position_raw: 120,
            position_mm: Some(42.5),
        };
        let cmd = CommandState {
            desired_open: true,
            button_pressed: true,
            last_transition_time: UNIX_EPOCH + Duration::from_secs(7),
        };
        let snap = Snapshot::compose(status, cmd, 1);
        assert_eq!(snap.position_mm, 42.5);
        assert!(snap.commanded_open);
        assert!(snap.button_pressed);
        assert_eq!(snap.last_command_time, cmd.last_transition_time);
    }

    #[test]
    fn toggle_and_set_command() {
        let cell = SharedStateCell::new();
        assert!(!cell.read_command().desired_open);
        assert!(cell.toggle_command());
        assert!(!cell.toggle_command());
        let prev = cell.set_command(true);
        assert!(!prev.desired_open);
        assert!(cell.read_command().desired_open);
    }

    #[test]
    fn button_flag_does_not_touch_desired_state() {
        let cell = SharedStateCell::new();
        let before = cell.read_command();
        cell.set_button(true);
        let after = cell.read_command();
        assert!(after.button_pressed);
        assert_eq!(after.desired_open, before.desired_open);
        assert_eq!(after.last_transition_time, before.last_transition_time);
    }

    #[test]
    fn readers_never_see_torn_snapshots() {
        let cell = Arc::new(SharedStateCell::new());
        cell.replace_snapshot(snapshot_for(0));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let cell = cell.clone();
            let done = done.clone();
            thread::spawn(move || {
                for i in 1..=50_000 {
                    cell.replace_snapshot(snapshot_for(i));
                }
                done.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut reads = 0u64;
                    while !done.load(Ordering::Acquire) || reads == 0 {
                        let snap = cell.read_snapshot();
                        assert_eq!(snap, snapshot_for(snap.seq), "torn read at seq {}", snap.seq);
                        reads += 1;
                    }
                    reads
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            assert!(r.join().unwrap() > 0);
        }
        assert_eq!(cell.read_snapshot().seq, 50_000);
    }
}
