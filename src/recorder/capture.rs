//! capture.rs
//! One long-lived thread per source. The thread waits for the recording flag, writes the
//! session file while the flag stays up, then goes back to waiting.
//!
//! A fault ends that source's participation in the current session only: the partial file
//! is closed, the error is recorded in the slot and the next session reconnects.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
};
use log::{debug, error, info};

use crate::recorder::session::{LivenessGuard, SessionId, SessionShared, SourceKind, SourceSlot};
use crate::utils::{cancel::CancelToken, error::SourceFault};

/// A source that appends to one session file at a time.
pub trait SessionRecorder: Send {
    fn kind(&self) -> SourceKind;

    /// Connects if needed and opens `path` for writing.
    fn begin_session(&mut self, path: &Path) -> Result<(), SourceFault>;

    /// One bounded read from the source, appended to the open file.
    /// Must return within a bounded time even when the source is quiet.
    fn capture(&mut self) -> Result<(), SourceFault>;

    /// Flushes and closes the session file. Called after faults too.
    fn end_session(&mut self) -> Result<(), SourceFault>;

    /// Drops the source connection after a fault.
    fn reset(&mut self) {}

    /// Final teardown at process exit.
    fn disconnect(&mut self) {}
}

pub struct CaptureTask {
    shared: Arc<SessionShared>,
    index: usize,
    recorder: Box<dyn SessionRecorder>,
}

impl CaptureTask {
    pub fn new(shared: Arc<SessionShared>, index: usize, recorder: Box<dyn SessionRecorder>) -> Self {
        Self {
            shared,
            index,
            recorder,
        }
    }

    pub fn spawn(self, cancel: CancelToken) -> io::Result<JoinHandle<()>> {
        let name = format!("{}-recorder", self.recorder.kind());
        thread::Builder::new().name(name).spawn(move || self.run(&cancel))
    }

    pub fn run(mut self, cancel: &CancelToken) {
        let shared = Arc::clone(&self.shared);
        let slot = shared.slot(self.index);
        let poll = shared.flag_poll();
        let mut served = 0u64;

        debug!("[{}] capture task idle", slot.kind());
        while !cancel.is_cancelled() {
            if !shared.is_recording() || shared.generation() == served {
                cancel.sleep(poll);
                continue;
            }

            let guard = LivenessGuard::raise(slot);
            if !shared.is_recording() {
                // stop won the race; nothing was written
                drop(guard);
                continue;
            }
            let generation = shared.generation();
            served = generation;
            let Some(id) = shared.session_id() else {
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                record_session(self.recorder.as_mut(), &shared, slot, &id, generation, cancel)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(fault)) => {
                    error!("[{}] session {} aborted: {}", slot.kind(), id, fault);
                    slot.record_error(generation, fault.to_string());
                    self.recorder.reset();
                }
                Err(_) => {
                    error!("[{}] capture panicked during session {}", slot.kind(), id);
                    slot.record_error(generation, "capture task panicked".to_string());
                    self.recorder.reset();
                }
            }
            drop(guard);
        }

        self.recorder.disconnect();
        debug!("[{}] capture task stopped.", slot.kind());
    }
}

fn record_session(
    recorder: &mut dyn SessionRecorder,
    shared: &SessionShared,
    slot: &SourceSlot,
    id: &SessionId,
    generation: u64,
    cancel: &CancelToken,
) -> Result<(), SourceFault> {
    let path = id.file_path(shared.output_dir(), slot.kind());
    recorder.begin_session(&path)?;
    slot.record_file(generation, path.clone());
    info!("[{}] recording to {}", slot.kind(), path.display());

    let mut result = Ok(());
    while shared.is_recording() && !cancel.is_cancelled() {
        if let Err(fault) = recorder.capture() {
            result = Err(fault);
            break;
        }
    }

    let closed = recorder.end_session();
    info!("[{}] done recording.", slot.kind());
    result.and(closed)
}
