//! audio.rs
//! Timecode audio capture into `<id>_audio.wav`.
//!
//! `AudioDriver` is the sound-card boundary: it opens an input stream on a numbered
//! device and hands back interleaved 16-bit chunks. `SimulatedTimecode` stands in for
//! the card by producing a bi-phase-mark timecode signal in real time on its own thread.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TrySendError};
use rand::Rng;
use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use log::{debug, warn};

use crate::recorder::{capture::SessionRecorder, session::SourceKind, wav::WavWriter};
use crate::utils::{cancel::CancelToken, config::AudioConfig, error::SourceFault};

const READ_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per chunk.
    pub chunk: usize,
}

impl From<&AudioConfig> for AudioFormat {
    fn from(c: &AudioConfig) -> Self {
        Self {
            sample_rate: c.sample_rate,
            channels: c.channels,
            chunk: c.chunk,
        }
    }
}

pub trait AudioDriver: Send {
    /// Input device names, indexed as `open` expects.
    fn devices(&self) -> Vec<String>;

    fn open(&mut self, device: usize, format: AudioFormat) -> Result<(), SourceFault>;

    /// Next chunk, or `None` if nothing arrived within `timeout`.
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>, SourceFault>;

    fn close(&mut self);
}

/// LTC-style generator: 80 bits per frame, 30 frames per second.
pub struct SimulatedTimecode {
    fail_after_chunks: Option<u64>,
    stream: Option<(Receiver<Vec<i16>>, CancelToken, JoinHandle<()>)>,
}

const BITS_PER_FRAME: u32 = 80;
const FRAMES_PER_SEC: u32 = 30;
const AMPLITUDE: i16 = 8_000;

impl SimulatedTimecode {
    pub fn new() -> Self {
        Self {
            fail_after_chunks: None,
            stream: None,
        }
    }

    /// The stream ends after `n` chunks, as if the card was unplugged.
    pub fn with_failure_after(mut self, n: u64) -> Self {
        self.fail_after_chunks = Some(n);
        self
    }
}

impl Default for SimulatedTimecode {
    fn default() -> Self {
        Self::new()
    }
}

/// Bi-phase-mark encoder state carried across chunks.
struct TimecodeSignal {
    samples_per_bit: f64,
    phase: f64,
    bit: u64,
    level: bool,
    half_flipped: bool,
}

impl TimecodeSignal {
    fn new(sample_rate: u32) -> Self {
        Self {
            samples_per_bit: f64::from(sample_rate) / f64::from(BITS_PER_FRAME * FRAMES_PER_SEC),
            phase: 0.0,
            bit: 0,
            level: false,
            half_flipped: false,
        }
    }

    fn current_bit(&self) -> bool {
        let frame = self.bit / u64::from(BITS_PER_FRAME);
        let index = self.bit % u64::from(BITS_PER_FRAME);
        index < 32 && (frame >> index) & 1 == 1
    }

    fn next_sample(&mut self, rng: &mut impl Rng) -> i16 {
        if self.current_bit() && !self.half_flipped && self.phase >= self.samples_per_bit / 2.0 {
            self.level = !self.level;
            self.half_flipped = true;
        }
        let out = if self.level { AMPLITUDE } else { -AMPLITUDE };

        self.phase += 1.0;
        if self.phase >= self.samples_per_bit {
            self.phase -= self.samples_per_bit;
            self.bit += 1;
            self.level = !self.level;
            self.half_flipped = false;
        }
        out + rng.random_range(-64..=64)
    }
}

impl AudioDriver for SimulatedTimecode {
    fn devices(&self) -> Vec<String> {
        vec!["Simulated timecode generator".to_string()]
    }

    fn open(&mut self, device: usize, format: AudioFormat) -> Result<(), SourceFault> {
        if device >= self.devices().len() {
            return Err(SourceFault::Driver(format!("no audio input device {}", device)));
        }
        self.close();

        let (tx, rx) = channel::bounded::<Vec<i16>>(8);
        let stop = CancelToken::new();
        let producer_stop = stop.clone();
        let fail_after = self.fail_after_chunks;
        let chunk_period = Duration::from_secs_f64(format.chunk as f64 / f64::from(format.sample_rate));

        let handle = thread::Builder::new()
            .name("timecode-gen".into())
            .spawn(move || {
                let mut rng = rand::rng();
                let mut signal = TimecodeSignal::new(format.sample_rate);
                let mut next = Instant::now() + chunk_period;
                let mut produced = 0u64;

                while producer_stop.sleep_until(next) {
                    if fail_after.is_some_and(|n| produced >= n) {
                        break;
                    }
                    let mut chunk = Vec::with_capacity(format.chunk * usize::from(format.channels));
                    for _ in 0..format.chunk {
                        let s = signal.next_sample(&mut rng);
                        for _ in 0..format.channels {
                            chunk.push(s);
                        }
                    }
                    match tx.try_send(chunk) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => warn!("[audio] input overflow, chunk dropped"),
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                    produced += 1;
                    next += chunk_period;
                }
            })?;

        self.stream = Some((rx, stop, handle));
        Ok(())
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>, SourceFault> {
        let (rx, _, _) = self.stream.as_ref().ok_or(SourceFault::Closed)?;
        match rx.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceFault::Closed),
        }
    }

    fn close(&mut self) {
        if let Some((rx, stop, handle)) = self.stream.take() {
            stop.cancel();
            drop(rx);
            let _ = handle.join();
        }
    }
}

pub struct AudioRecorder {
    driver: Box<dyn AudioDriver>,
    device: usize,
    format: AudioFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl AudioRecorder {
    pub fn new(driver: Box<dyn AudioDriver>, device: usize, format: AudioFormat) -> Self {
        Self {
            driver,
            device,
            format,
            writer: None,
        }
    }
}

impl SessionRecorder for AudioRecorder {
    fn kind(&self) -> SourceKind {
        SourceKind::Audio
    }

    fn begin_session(&mut self, path: &Path) -> Result<(), SourceFault> {
        self.driver.open(self.device, self.format)?;
        let file = BufWriter::new(File::create(path)?);
        self.writer = Some(WavWriter::new(file, self.format.channels, self.format.sample_rate)?);
        Ok(())
    }

    fn capture(&mut self) -> Result<(), SourceFault> {
        if let Some(samples) = self.driver.read_chunk(READ_TIMEOUT)? {
            let writer = self.writer.as_mut().ok_or(SourceFault::Closed)?;
            writer.write_samples(&samples)?;
        }
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), SourceFault> {
        self.driver.close();
        if let Some(writer) = self.writer.take() {
            let bytes = writer.data_len();
            writer.finalize()?;
            debug!("[audio] {} bytes of samples this session", bytes);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.driver.close();
    }

    fn disconnect(&mut self) {
        self.driver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn format() -> AudioFormat {
        AudioFormat {
            sample_rate: 8_000,
            channels: 1,
            chunk: 80,
        }
    }

    #[test]
    fn unknown_device_is_rejected() {
        let mut driver = SimulatedTimecode::new();
        assert!(matches!(driver.open(3, format()), Err(SourceFault::Driver(_))));
    }

    #[test]
    fn generator_delivers_chunks_in_real_time() {
        let mut driver = SimulatedTimecode::new();
        driver.open(0, format()).unwrap();
        let chunk = driver.read_chunk(Duration::from_millis(500)).unwrap().unwrap();
        assert_eq!(chunk.len(), 80);
        assert!(chunk.iter().all(|s| s.unsigned_abs() >= (AMPLITUDE - 64) as u16));
        driver.close();
        assert!(matches!(driver.read_chunk(Duration::from_millis(1)), Err(SourceFault::Closed)));
    }

    #[test]
    fn recorder_writes_a_valid_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s_audio.wav");
        let mut rec = AudioRecorder::new(Box::new(SimulatedTimecode::new()), 0, format());

        rec.begin_session(&path).unwrap();
        for _ in 0..3 {
            rec.capture().unwrap();
        }
        rec.end_session().unwrap();

        let bytes = fs::read(&path).unwrap();
        let data_len = u32::from_le_bytes(bytes[40..44].try_into().unwrap()) as usize;
        assert!(data_len >= 80 * 2);
        assert_eq!(bytes.len(), 44 + data_len);
    }

    #[test]
    fn unplugged_card_ends_capture() {
        let mut driver = SimulatedTimecode::new().with_failure_after(1);
        driver.open(0, format()).unwrap();
        assert!(driver.read_chunk(Duration::from_millis(500)).unwrap().is_some());
        assert!(matches!(
            driver.read_chunk(Duration::from_millis(500)),
            Err(SourceFault::Closed)
        ));
    }
}
