//! input_watcher.rs
//! Physical-input state machines that drive the gripper's open/close command.
//!
//! - Momentary (wrist button): Idle → Pressed → Idle. A press held longer than the
//!   debounce threshold toggles the gripper on release; shorter presses are ignored.
//! - Latched (relay switch): the input level *is* the desired state; polled every
//!   `poll` and mirrored on change. Pulses shorter than one poll interval can be missed.
//!
//! Waiting on the input never holds a lock; only the actuation itself goes through the
//! shared `ActuationPort`.

use std::{
    io,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};
use log::{debug, error, info, warn};

use crate::component_b::{actuation::ActuationPort, switch::SwitchInput};
use crate::utils::cancel::CancelToken;

/// Outcome of a release edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Held strictly longer than the threshold.
    Accepted(Duration),
    Ignored(Duration),
    /// Release without a recorded press.
    Unpaired,
}

/// Duration-based debounce between two timestamped edges.
#[derive(Debug, Clone)]
pub struct Debouncer {
    threshold: Duration,
    pressed_at: Option<Instant>,
}

impl Debouncer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pressed_at: None,
        }
    }

    pub fn press(&mut self, at: Instant) {
        self.pressed_at = Some(at);
    }

    pub fn release(&mut self, at: Instant) -> Release {
        match self.pressed_at.take() {
            None => Release::Unpaired,
            Some(start) => {
                let held = at.saturating_duration_since(start);
                if held > self.threshold {
                    Release::Accepted(held)
                } else {
                    Release::Ignored(held)
                }
            }
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed_at.is_some()
    }
}

/// Shared capability of both variants: observe one input, drive the actuation port.
pub trait InputStateMachine: Send {
    fn name(&self) -> String;

    /// Runs until `cancel` fires.
    fn run(&mut self, cancel: &CancelToken);
}

pub struct MomentaryWatcher<S: SwitchInput> {
    input: S,
    debouncer: Debouncer,
    port: ActuationPort,
    poll: Duration,
}

impl<S: SwitchInput> MomentaryWatcher<S> {
    pub fn new(input: S, threshold: Duration, poll: Duration, port: ActuationPort) -> Self {
        Self {
            input,
            debouncer: Debouncer::new(threshold),
            port,
            poll,
        }
    }

    /// Handles a completed press/release pair. Returns the new state if it toggled.
    pub fn on_release(&mut self, at: Instant) -> Option<bool> {
        match self.debouncer.release(at) {
            Release::Accepted(held) => match self.port.toggle() {
                Ok(open) => {
                    info!(
                        "[{}] held {:?}: gripper {}",
                        self.input.label(),
                        held,
                        if open { "open" } else { "close" }
                    );
                    Some(open)
                }
                Err(fault) => {
                    error!("[{}] actuation skipped: {}", self.input.label(), fault);
                    None
                }
            },
            Release::Ignored(held) => {
                debug!("[{}] press of {:?} ignored", self.input.label(), held);
                None
            }
            Release::Unpaired => None,
        }
    }
}

impl<S: SwitchInput> InputStateMachine for MomentaryWatcher<S> {
    fn name(&self) -> String {
        format!("momentary:{}", self.input.label())
    }

    fn run(&mut self, cancel: &CancelToken) {
        info!("[{}] watching momentary switch", self.input.label());

        while !cancel.is_cancelled() {
            let Some(pressed_at) = self.input.wait_for_level(true, self.poll, cancel) else {
                break;
            };
            self.debouncer.press(pressed_at);
            self.port.record_button(true);

            let released = self.input.wait_for_level(false, self.poll, cancel);
            self.port.record_button(false);
            let Some(released_at) = released else {
                break;
            };
            self.on_release(released_at);
        }

        debug!("[{}] stopped.", self.input.label());
    }
}

pub struct LatchedWatcher<S: SwitchInput> {
    input: S,
    port: ActuationPort,
    poll: Duration,
}

impl<S: SwitchInput> LatchedWatcher<S> {
    pub fn new(input: S, poll: Duration, port: ActuationPort) -> Self {
        Self { input, port, poll }
    }

    /// Samples the input once and mirrors it. Returns the commanded state on change.
    pub fn poll_once(&mut self) -> Option<bool> {
        let level = self.input.is_pressed();
        match self.port.mirror(level) {
            Ok(Some(open)) => {
                info!(
                    "[{}] latched {}: gripper {}",
                    self.input.label(),
                    if level { "on" } else { "off" },
                    if open { "open" } else { "close" }
                );
                Some(open)
            }
            Ok(None) => None,
            Err(fault) => {
                error!("[{}] actuation skipped: {}", self.input.label(), fault);
                None
            }
        }
    }
}

impl<S: SwitchInput> InputStateMachine for LatchedWatcher<S> {
    fn name(&self) -> String {
        format!("latched:{}", self.input.label())
    }

    fn run(&mut self, cancel: &CancelToken) {
        info!("[{}] watching latched switch every {:?}", self.input.label(), self.poll);

        loop {
            self.poll_once();
            if !cancel.sleep(self.poll) {
                break;
            }
        }

        debug!("[{}] stopped.", self.input.label());
    }
}

/// Spawns a watcher on its own thread at max priority.
/// Falls back to normal priority when the OS refuses.
pub fn spawn_watcher(
    mut watcher: Box<dyn InputStateMachine>,
    cancel: CancelToken,
) -> io::Result<JoinHandle<()>> {
    let name = watcher.name();
    thread::Builder::new()
        .name(name.clone())
        .spawn_with_priority(ThreadPriority::Max, move |priority| {
            if let Err(e) = priority {
                warn!("[{}] running at default priority: {:?}", name, e);
            }
            watcher.run(&cancel);
        })
}
