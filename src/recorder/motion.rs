//! motion.rs
//! Robot motion-state capture into `<id>_rtde.csv`.
//!
//! The controller streams fixed-layout samples at `frequency_hz` once its output recipe
//! is set up. `MotionDriver` covers that handshake and the per-sample receive; rows are
//! written space-delimited with a `timestamp` column followed by the recipe fields.

use rand::Rng;
use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    thread,
    time::{Duration, Instant},
};
use log::{debug, info};

use crate::recorder::{capture::SessionRecorder, session::SourceKind};
use crate::utils::error::SourceFault;

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);
const JOINTS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    /// Controller time in seconds since power-on.
    pub timestamp: f64,
    pub values: Vec<f64>,
}

pub trait MotionDriver: Send {
    /// Negotiates the output recipe and starts the stream. Returns the field names.
    fn connect(&mut self) -> Result<Vec<String>, SourceFault>;

    /// Next sample, or `None` if nothing arrived within `timeout`.
    fn receive(&mut self, timeout: Duration) -> Result<Option<MotionSample>, SourceFault>;

    fn disconnect(&mut self);
}

/// Six joints following slow sinusoids, sampled at the controller rate.
pub struct SimulatedMotion {
    target: String,
    period: Duration,
    started: Option<Instant>,
    next_due: Instant,
    sent: u64,
    fail_after: Option<u64>,
}

impl SimulatedMotion {
    pub fn new(target: impl Into<String>, frequency_hz: u32) -> Self {
        Self {
            target: target.into(),
            period: Duration::from_secs_f64(1.0 / f64::from(frequency_hz.max(1))),
            started: None,
            next_due: Instant::now(),
            sent: 0,
            fail_after: None,
        }
    }

    /// The controller drops the connection after `n` samples.
    pub fn with_failure_after(mut self, n: u64) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn field_names() -> Vec<String> {
        let q = (0..JOINTS).map(|j| format!("actual_q_{}", j));
        let qd = (0..JOINTS).map(|j| format!("actual_qd_{}", j));
        q.chain(qd).collect()
    }
}

impl MotionDriver for SimulatedMotion {
    fn connect(&mut self) -> Result<Vec<String>, SourceFault> {
        let now = Instant::now();
        self.started = Some(now);
        self.next_due = now;
        self.sent = 0;
        info!("[robot] streaming from {} every {:?}", self.target, self.period);
        Ok(Self::field_names())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<MotionSample>, SourceFault> {
        let started = self.started.ok_or(SourceFault::Closed)?;
        if self.fail_after.is_some_and(|n| self.sent >= n) {
            self.started = None;
            return Err(SourceFault::Closed);
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        let t = self.next_due.duration_since(started).as_secs_f64();
        self.next_due += self.period;
        self.sent += 1;

        let mut rng = rand::rng();
        let mut values = Vec::with_capacity(JOINTS * 2);
        for j in 0..JOINTS {
            let w = 0.2 + 0.05 * j as f64;
            values.push((w * t).sin() + rng.random_range(-1e-4..1e-4));
        }
        for j in 0..JOINTS {
            let w = 0.2 + 0.05 * j as f64;
            values.push(w * (w * t).cos());
        }
        Ok(Some(MotionSample { timestamp: t, values }))
    }

    fn disconnect(&mut self) {
        self.started = None;
    }
}

pub struct MotionRecorder {
    driver: Box<dyn MotionDriver>,
    fields: Option<Vec<String>>,
    writer: Option<csv::Writer<BufWriter<File>>>,
    flush_every: u64,
    rows: u64,
}

impl MotionRecorder {
    /// `flush_every` is usually the controller frequency, so at most a second is buffered.
    pub fn new(driver: Box<dyn MotionDriver>, flush_every: u32) -> Self {
        Self {
            driver,
            fields: None,
            writer: None,
            flush_every: u64::from(flush_every.max(1)),
            rows: 0,
        }
    }
}

impl SessionRecorder for MotionRecorder {
    fn kind(&self) -> SourceKind {
        SourceKind::Robot
    }

    fn begin_session(&mut self, path: &Path) -> Result<(), SourceFault> {
        let fields = match self.fields.take() {
            Some(f) => f,
            None => self.driver.connect()?,
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(BufWriter::new(File::create(path)?));
        writer.write_field("timestamp")?;
        writer.write_record(&fields)?;

        self.fields = Some(fields);
        self.writer = Some(writer);
        self.rows = 0;
        Ok(())
    }

    fn capture(&mut self) -> Result<(), SourceFault> {
        let Some(sample) = self.driver.receive(RECEIVE_TIMEOUT)? else {
            return Ok(());
        };
        let writer = self.writer.as_mut().ok_or(SourceFault::Closed)?;

        writer.write_field(sample.timestamp.to_string())?;
        writer.write_record(sample.values.iter().map(|v| v.to_string()))?;
        self.rows += 1;
        if self.rows % self.flush_every == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), SourceFault> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        debug!("[robot] {} rows this session", self.rows);
        Ok(())
    }

    fn reset(&mut self) {
        self.driver.disconnect();
        self.fields = None;
    }

    fn disconnect(&mut self) {
        self.driver.disconnect();
        self.fields = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn samples_arrive_at_the_controller_rate() {
        let mut driver = SimulatedMotion::new("sim", 200);
        driver.connect().unwrap();
        let start = Instant::now();
        let mut got = 0;
        while got < 10 {
            if driver.receive(Duration::from_millis(100)).unwrap().is_some() {
                got += 1;
            }
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn rows_are_space_delimited_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s_rtde.csv");
        let mut rec = MotionRecorder::new(Box::new(SimulatedMotion::new("sim", 500)), 500);

        rec.begin_session(&path).unwrap();
        for _ in 0..5 {
            rec.capture().unwrap();
        }
        rec.end_session().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header: Vec<&str> = lines.next().unwrap().split(' ').collect();
        assert_eq!(header[0], "timestamp");
        assert_eq!(header[1], "actual_q_0");
        assert_eq!(header.len(), 1 + 2 * JOINTS);

        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), 5);
        for row in rows {
            let cols: Vec<f64> = row.split(' ').map(|c| c.parse().unwrap()).collect();
            assert_eq!(cols.len(), header.len());
        }
    }

    #[test]
    fn dropped_controller_is_a_fault_and_reconnects_next_session() {
        let dir = tempdir().unwrap();
        let mut rec = MotionRecorder::new(Box::new(SimulatedMotion::new("sim", 500).with_failure_after(2)), 500);

        rec.begin_session(&dir.path().join("a_rtde.csv")).unwrap();
        rec.capture().unwrap();
        rec.capture().unwrap();
        assert!(matches!(rec.capture(), Err(SourceFault::Closed)));
        rec.end_session().unwrap();
        rec.reset();

        rec.begin_session(&dir.path().join("b_rtde.csv")).unwrap();
        rec.capture().unwrap();
        rec.end_session().unwrap();
    }
}
