//! switch.rs
//! Two-level physical inputs (wrist button, relay-driven latch).
//!
//! Edge detection on real GPIO belongs to the platform driver; this trait is the boundary.
//! `SimulatedSwitch` is a shared level that the console driver and the tests flip.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::utils::cancel::CancelToken;

pub trait SwitchInput: Send {
    fn is_pressed(&self) -> bool;

    fn label(&self) -> &str;

    /// Blocks until the input reads `pressed`, checking every `poll`.
    /// Returns the time the level was observed, or `None` once cancelled.
    fn wait_for_level(&self, pressed: bool, poll: Duration, cancel: &CancelToken) -> Option<Instant> {
        loop {
            if self.is_pressed() == pressed {
                return Some(Instant::now());
            }
            if !cancel.sleep(poll) {
                return None;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulatedSwitch {
    label: String,
    level: Arc<AtomicBool>,
}

impl SimulatedSwitch {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            level: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set(&self, pressed: bool) {
        self.level.store(pressed, Ordering::Release);
    }

    pub fn press(&self) {
        self.set(true);
    }

    pub fn release(&self) {
        self.set(false);
    }

    /// Holds the switch down for `held`, then releases it. Blocks the caller.
    pub fn pulse(&self, held: Duration) {
        self.press();
        std::thread::sleep(held);
        self.release();
    }
}

impl SwitchInput for SimulatedSwitch {
    fn is_pressed(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    fn label(&self) -> &str {
        &self.label
    }
}
