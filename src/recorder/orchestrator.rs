//! orchestrator.rs
//! Control surface for recording sessions.
//!
//! Capture threads are started once by `launch` and live until `shutdown`. A session is
//! a raise of the shared flag; `stop_session` lowers it and does not return until every
//! source's liveness bit has cleared, so no source writes after it returns.
//! Start and stop are serialized by `control`; the drain wait runs outside it so a
//! concurrent start is rejected with `StillDraining` instead of queuing.
//!
//! The cancel token handed to `launch` ends the capture threads and any drain wait in
//! progress. Sources get `CANCEL_GRACE` to wind down after that; the rest are abandoned.

use parking_lot::Mutex;
use std::{
    fs, io, mem,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use log::{error, info, warn};

use crate::recorder::{
    capture::{CaptureTask, SessionRecorder},
    session::{SessionId, SessionReport, SessionShared, SessionStatus, SourceKind},
};
use crate::utils::{cancel::CancelToken, error::SessionError};

const CANCEL_GRACE: Duration = Duration::from_secs(1);
const GRACE_POLL: Duration = Duration::from_millis(10);

struct ActiveSession {
    id: SessionId,
    generation: u64,
    started: Instant,
}

#[derive(Default)]
struct Control {
    active: Option<ActiveSession>,
    last_base: Option<SessionId>,
    repeats: u64,
    draining: bool,
}

impl Control {
    /// Id for a session whose wall-clock id is `base`. Repeats of one base become `-2`,
    /// `-3`, ... and ids whose files are already `taken` on disk are skipped.
    fn next_id(&mut self, base: SessionId, taken: impl Fn(&SessionId) -> bool) -> SessionId {
        let mut repeat = match &self.last_base {
            Some(last) if *last == base => self.repeats + 1,
            _ => 0,
        };
        let suffixed = |n: u64| if n == 0 { base.clone() } else { base.with_suffix(n + 1) };
        let mut id = suffixed(repeat);
        while taken(&id) {
            repeat += 1;
            id = suffixed(repeat);
        }
        self.last_base = Some(base);
        self.repeats = repeat;
        id
    }
}

pub struct RecordingOrchestrator {
    shared: Arc<SessionShared>,
    control: Mutex<Control>,
    completion_poll: Duration,
    cancel: CancelToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RecordingOrchestrator {
    /// Creates `output_dir` and starts one capture thread per recorder.
    /// Cancelling `cancel` winds the recorder down, interrupting a pending stop.
    pub fn launch(
        output_dir: PathBuf,
        recorders: Vec<Box<dyn SessionRecorder>>,
        flag_poll: Duration,
        completion_poll: Duration,
        cancel: CancelToken,
    ) -> io::Result<Self> {
        fs::create_dir_all(&output_dir)?;
        let kinds: Vec<SourceKind> = recorders.iter().map(|r| r.kind()).collect();
        let shared = Arc::new(SessionShared::new(output_dir, flag_poll, &kinds));

        let mut handles = Vec::with_capacity(recorders.len());
        for (index, recorder) in recorders.into_iter().enumerate() {
            let task = CaptureTask::new(Arc::clone(&shared), index, recorder);
            match task.spawn(cancel.clone()) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    cancel.cancel();
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(e);
                }
            }
        }
        info!(
            "Recorder ready with {} source(s): {}",
            kinds.len(),
            kinds.iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            shared,
            control: Mutex::new(Control::default()),
            completion_poll,
            cancel,
            handles: Mutex::new(handles),
        })
    }

    pub fn start_session(&self) -> Result<SessionId, SessionError> {
        let mut control = self.control.lock();
        if self.cancel.is_cancelled() {
            return Err(SessionError::ShuttingDown);
        }
        if let Some(active) = &control.active {
            return Err(SessionError::AlreadyRecording(active.id.to_string()));
        }
        let live = self.shared.live_sources();
        if control.draining || !live.is_empty() {
            return Err(SessionError::StillDraining(live));
        }

        let id = control.next_id(SessionId::now(), |id| self.shared.files_exist(id));
        let generation = self.shared.begin(id.clone());
        info!("Session {} started", id);
        control.active = Some(ActiveSession {
            id: id.clone(),
            generation,
            started: Instant::now(),
        });
        Ok(id)
    }

    /// Lowers the flag and blocks until every source has stopped writing, or until the
    /// cancel token fires and the grace period runs out.
    pub fn stop_session(&self) -> Result<SessionReport, SessionError> {
        let active = {
            let mut control = self.control.lock();
            let active = control.active.take().ok_or(SessionError::NotRecording)?;
            self.shared.lower_flag();
            control.draining = true;
            active
        };

        let drained = self.wait_for_drain();
        self.control.lock().draining = false;
        drained?;

        let report = self
            .shared
            .report(active.id.clone(), active.generation, active.started.elapsed());
        for source in &report.sources {
            if let Some(err) = &source.error {
                warn!("Session {}: {} ended early: {}", active.id, source.kind, err);
            }
        }
        info!("Session {} stopped after {:.1?}", active.id, report.elapsed);
        Ok(report)
    }

    fn wait_for_drain(&self) -> Result<(), SessionError> {
        loop {
            let live = self.shared.live_sources();
            if live.is_empty() {
                return Ok(());
            }
            if self.cancel.is_cancelled() {
                return self.drain_after_cancel();
            }
            info!("Waiting for {} to finish...", live.join(", "));
            self.cancel.sleep(self.completion_poll);
        }
    }

    fn drain_after_cancel(&self) -> Result<(), SessionError> {
        let deadline = Instant::now() + CANCEL_GRACE;
        loop {
            let live = self.shared.live_sources();
            if live.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Stop cancelled; abandoning {}", live.join(", "));
                return Err(SessionError::DrainAbandoned(live));
            }
            thread::sleep(GRACE_POLL);
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.is_recording()
    }

    /// Stops any running session, then ends the capture threads.
    pub fn shutdown(self) -> Option<SessionReport> {
        let report = match self.stop_session() {
            Ok(report) => Some(report),
            Err(SessionError::NotRecording) => None,
            Err(e) => {
                error!("Stop during shutdown failed: {}", e);
                None
            }
        };
        self.join_tasks();
        report
    }

    /// Joins the capture threads that stop within `CANCEL_GRACE`; stuck ones are detached.
    fn join_tasks(&self) {
        self.cancel.cancel();
        let mut pending = mem::take(&mut *self.handles.lock());
        let deadline = Instant::now() + CANCEL_GRACE;
        loop {
            let (done, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|h| h.is_finished());
            for h in done {
                if h.join().is_err() {
                    error!("A capture thread exited with a panic");
                }
            }
            pending = rest;
            if pending.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                warn!("{} capture thread(s) did not stop; detaching", pending.len());
                return;
            }
            thread::sleep(GRACE_POLL);
        }
    }
}

impl Drop for RecordingOrchestrator {
    fn drop(&mut self) {
        self.shared.lower_flag();
        self.join_tasks();
    }
}
