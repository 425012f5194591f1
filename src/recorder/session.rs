//! Session bookkeeping shared between the orchestrator and its capture tasks.
//!
//! `recording` is the start/stop flag every task polls. `generation` increments once per
//! session so a task that already finished (or faulted out of) a session does not start
//! it again. Each source has a slot with its liveness bit, the file it produced and the
//! last error it hit.
//!
//! Liveness ordering: a task raises its bit *then* re-reads `recording`; stop lowers
//! `recording` *then* reads the bits. Both sides use `SeqCst`, so at least one of them
//! observes the other and a stop can never return while a task is about to write.

use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Gripper,
    Audio,
    Robot,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Gripper => "gripper",
            SourceKind::Audio => "audio",
            SourceKind::Robot => "robot",
        }
    }

    pub fn file_suffix(&self) -> &'static str {
        match self {
            SourceKind::Gripper => "gripper.json",
            SourceKind::Audio => "audio.wav",
            SourceKind::Robot => "rtde.csv",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session identifier derived from the session-start wall clock, e.g. `2025July02_143015`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn from_time<Tz: TimeZone>(t: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(t.format("%Y%B%d_%H%M%S").to_string())
    }

    pub fn now() -> Self {
        Self::from_time(&Local::now())
    }

    /// Same id with a numeric suffix, used when two sessions start within one second.
    pub fn with_suffix(&self, n: u64) -> Self {
        Self(format!("{}-{}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_path(&self, dir: &Path, kind: SourceKind) -> PathBuf {
        dir.join(format!("{}_{}", self.0, kind.file_suffix()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct SlotRecord {
    generation: u64,
    file: Option<PathBuf>,
    error: Option<String>,
}

pub struct SourceSlot {
    kind: SourceKind,
    live: AtomicBool,
    record: Mutex<SlotRecord>,
    last_error: Mutex<Option<String>>,
}

impl SourceSlot {
    fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            live: AtomicBool::new(false),
            record: Mutex::new(SlotRecord::default()),
            last_error: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn record_file(&self, generation: u64, path: PathBuf) {
        let mut rec = self.record.lock();
        if rec.generation != generation {
            *rec = SlotRecord {
                generation,
                ..SlotRecord::default()
            };
        }
        rec.file = Some(path);
    }

    pub fn record_error(&self, generation: u64, error: String) {
        {
            let mut rec = self.record.lock();
            if rec.generation != generation {
                *rec = SlotRecord {
                    generation,
                    ..SlotRecord::default()
                };
            }
            rec.error = Some(error.clone());
        }
        *self.last_error.lock() = Some(error);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn clear_last_error(&self) {
        *self.last_error.lock() = None;
    }

    fn report(&self, generation: u64) -> SourceReport {
        let rec = self.record.lock();
        let (file, error) = if rec.generation == generation {
            (rec.file.clone(), rec.error.clone())
        } else {
            (None, None)
        };
        SourceReport {
            kind: self.kind,
            file,
            error,
        }
    }
}

/// Holds a source's liveness bit high for its lifetime, including during unwinding.
pub struct LivenessGuard<'a> {
    slot: &'a SourceSlot,
}

impl<'a> LivenessGuard<'a> {
    pub fn raise(slot: &'a SourceSlot) -> Self {
        slot.live.store(true, Ordering::SeqCst);
        Self { slot }
    }
}

impl Drop for LivenessGuard<'_> {
    fn drop(&mut self) {
        self.slot.live.store(false, Ordering::SeqCst);
    }
}

pub struct SessionShared {
    recording: AtomicBool,
    generation: AtomicU64,
    session: Mutex<Option<SessionId>>,
    output_dir: PathBuf,
    flag_poll: Duration,
    slots: Vec<SourceSlot>,
}

impl SessionShared {
    pub fn new(output_dir: PathBuf, flag_poll: Duration, kinds: &[SourceKind]) -> Self {
        Self {
            recording: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            session: Mutex::new(None),
            output_dir,
            flag_poll,
            slots: kinds.iter().map(|&k| SourceSlot::new(k)).collect(),
        }
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.lock().clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn flag_poll(&self) -> Duration {
        self.flag_poll
    }

    pub fn slot(&self, index: usize) -> &SourceSlot {
        &self.slots[index]
    }

    pub fn slots(&self) -> &[SourceSlot] {
        &self.slots
    }

    pub fn live_sources(&self) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|s| s.is_live())
            .map(|s| s.kind.name())
            .collect()
    }

    /// True when any source's file for `id` is already on disk.
    pub fn files_exist(&self, id: &SessionId) -> bool {
        self.slots
            .iter()
            .any(|s| id.file_path(&self.output_dir, s.kind).exists())
    }

    /// Publishes a new session and raises the flag. Returns the new generation.
    /// Errors left over from earlier sessions are cleared.
    pub(crate) fn begin(&self, id: SessionId) -> u64 {
        for slot in &self.slots {
            slot.clear_last_error();
        }
        *self.session.lock() = Some(id);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.recording.store(true, Ordering::SeqCst);
        generation
    }

    pub(crate) fn lower_flag(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            recording: self.is_recording(),
            session_id: self.session_id(),
            sources: self
                .slots
                .iter()
                .map(|s| SourceStatus {
                    kind: s.kind,
                    live: s.is_live(),
                    last_error: s.last_error(),
                })
                .collect(),
        }
    }

    pub fn report(&self, session_id: SessionId, generation: u64, elapsed: Duration) -> SessionReport {
        SessionReport {
            session_id,
            elapsed,
            sources: self.slots.iter().map(|s| s.report(generation)).collect(),
        }
    }
}

/// Descriptor view returned by the control surface.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub recording: bool,
    pub session_id: Option<SessionId>,
    pub sources: Vec<SourceStatus>,
}

impl SessionStatus {
    pub fn any_live(&self) -> bool {
        self.sources.iter().any(|s| s.live)
    }

    pub fn source(&self, kind: SourceKind) -> Option<&SourceStatus> {
        self.sources.iter().find(|s| s.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    pub kind: SourceKind,
    pub live: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub elapsed: Duration,
    pub sources: Vec<SourceReport>,
}

impl SessionReport {
    pub fn source(&self, kind: SourceKind) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub kind: SourceKind,
    pub file: Option<PathBuf>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn session_id_comes_from_wall_clock() {
        let t = Utc.with_ymd_and_hms(2025, 7, 2, 14, 30, 15).unwrap();
        let id = SessionId::from_time(&t);
        assert_eq!(id.as_str(), "2025July02_143015");
        assert_eq!(
            id.file_path(Path::new("/data"), SourceKind::Robot),
            PathBuf::from("/data/2025July02_143015_rtde.csv")
        );
        assert_eq!(id.with_suffix(2).as_str(), "2025July02_143015-2");
    }

    #[test]
    fn liveness_guard_clears_on_drop_and_panic() {
        let slot = SourceSlot::new(SourceKind::Audio);
        {
            let _guard = LivenessGuard::raise(&slot);
            assert!(slot.is_live());
        }
        assert!(!slot.is_live());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = LivenessGuard::raise(&slot);
            panic!("capture blew up");
        }));
        assert!(result.is_err());
        assert!(!slot.is_live());
    }

    #[test]
    fn report_only_shows_current_generation() {
        let shared = SessionShared::new(PathBuf::from("."), Duration::from_millis(5), &[SourceKind::Gripper]);
        let slot = shared.slot(0);
        slot.record_error(1, "lost".into());
        slot.record_file(2, PathBuf::from("b.json"));

        let report = shared.report(SessionId("x".into()), 2, Duration::ZERO);
        let gripper = report.source(SourceKind::Gripper).unwrap();
        assert_eq!(gripper.file.as_deref(), Some(Path::new("b.json")));
        assert_eq!(gripper.error, None);
        assert_eq!(slot.last_error().as_deref(), Some("lost"));
    }

    #[test]
    fn new_session_clears_stale_errors() {
        let shared = SessionShared::new(PathBuf::from("."), Duration::from_millis(5), &[SourceKind::Robot]);
        shared.slot(0).record_error(1, "robot went away".into());
        assert!(shared.status().source(SourceKind::Robot).unwrap().last_error.is_some());

        let generation = shared.begin(SessionId("next".into()));
        assert_eq!(generation, 1);
        assert_eq!(shared.status().source(SourceKind::Robot).unwrap().last_error, None);

        shared.slot(0).record_error(generation, "again".into());
        assert_eq!(shared.slot(0).last_error().as_deref(), Some("again"));
    }

    #[test]
    fn existing_session_files_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SessionShared::new(
            dir.path().to_path_buf(),
            Duration::from_millis(5),
            &[SourceKind::Gripper, SourceKind::Audio],
        );
        let id = SessionId("2025July02_143015".into());
        assert!(!shared.files_exist(&id));
        std::fs::write(id.file_path(dir.path(), SourceKind::Audio), b"RIFF").unwrap();
        assert!(shared.files_exist(&id));
        assert!(!shared.files_exist(&id.with_suffix(2)));
    }
}
