//! sampler.rs
//! Periodic gripper poll that publishes a fresh `Snapshot` into the shared cell.
//! - Real-time scheduling: SpinSleeper keeps the release period (250 ms by default)
//! - Device reads go through the `DeviceChannel` gate; the command side is read afterwards
//!   under its own lock, so a slow driver call never stalls the input watchers' lock
//! - Device faults are transient: the previous device fields are reused and the loop continues

use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use log::{debug, info, warn};

use crate::component_a::{
    device::{DeviceChannel, DeviceStatus},
    state_cell::{SharedStateCell, Snapshot},
};
use crate::utils::{
    cancel::CancelToken,
    metrics::{DeadlineComponent, SharedMetrics, lock_metrics, push_capped_u64},
};

pub struct Sampler {
    cell: Arc<SharedStateCell>,
    device: Arc<DeviceChannel>,
    period: Duration,
    metrics: SharedMetrics,
    last_status: DeviceStatus,
    seq: u64,
}

impl Sampler {
    pub fn new(
        cell: Arc<SharedStateCell>,
        device: Arc<DeviceChannel>,
        period: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            cell,
            device,
            period,
            metrics,
            last_status: DeviceStatus::UNKNOWN,
            seq: 0,
        }
    }

    /// One sampling cycle. Returns the snapshot that was published.
    pub fn sample_once(&mut self) -> Snapshot {
        self.seq += 1;

        let status = match self.device.read_status() {
            Ok(status) => {
                self.last_status = status;
                status
            }
            Err(fault) => {
                warn!("[Sampler] device read failed (seq {}): {}", self.seq, fault);
                lock_metrics(&self.metrics).sample_faults += 1;
                self.last_status
            }
        };

        let command = self.cell.read_command();
        let snapshot = Snapshot::compose(status, command, self.seq);
        self.cell.replace_snapshot(snapshot);

        lock_metrics(&self.metrics).samples += 1;
        snapshot
    }

    /// Periodic release loop; exits when `cancel` fires.
    pub fn run(&mut self, cancel: &CancelToken) {
        info!("[Sampler] started period={:?}", self.period);

        let sleeper = SpinSleeper::new(100_000)
            .with_spin_strategy(SpinStrategy::YieldThread);

        let mut next_deadline = Instant::now() + self.period;
        let mut last_tick = Instant::now();

        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now < next_deadline {
                // Sleep in slices no longer than the cancel granularity
                let wait = next_deadline - now;
                if wait > Duration::from_millis(50) {
                    if !cancel.sleep(wait - Duration::from_millis(2)) {
                        break;
                    }
                    let rest = next_deadline.saturating_duration_since(Instant::now());
                    sleeper.sleep(rest);
                } else {
                    sleeper.sleep(wait);
                }
            } else {
                // Woke up after the scheduled release
                lock_metrics(&self.metrics).record_deadline_miss(DeadlineComponent::Sampler);
                next_deadline = now;
            }

            let actual_tick = Instant::now();
            let actual_period_us = actual_tick.duration_since(last_tick).as_micros() as u64;
            let jitter_us = actual_period_us.abs_diff(self.period.as_micros() as u64);
            last_tick = actual_tick;
            push_capped_u64(&mut lock_metrics(&self.metrics).jitter_us, jitter_us);

            self.sample_once();

            next_deadline += self.period;
        }

        debug!("[Sampler] stopped after {} cycles.", self.seq);
    }
}
