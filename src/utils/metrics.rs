//! Live counters for the hand interface.
//!
//! Shared mutex buffer updated by the sampler, the stream server and the input
//! watchers; exported once at shutdown by `metrics_export`. Jitter history is
//! bounded to `MAX_POINTS` entries.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Default, Clone, Debug)]
pub struct Metrics {
    /// Sampler cycles completed (including faulted ones)
    pub samples: u64,
    pub sample_faults: u64,

    /// Sampler release jitter (microseconds, last 1000 cycles)
    pub jitter_us: VecDeque<u64>,

    /// Deadline miss counters per component
    pub miss_sampler: u64,
    pub miss_stream: u64,

    /// Total deadline misses across all components
    pub deadline_miss: u64,

    pub frames_sent: u64,
    pub encode_failures: u64,
    pub clients_served: u64,

    pub heartbeats_sent: u64,
    pub heartbeat_failures: u64,

    pub actuations: u64,
    pub actuation_faults: u64,
}

/// Component identifier for deadline miss attribution.
pub enum DeadlineComponent {
    Sampler,
    Stream,
}

impl Metrics {
    /// Records deadline miss for specified component; updates total count.
    pub fn record_deadline_miss(&mut self, component: DeadlineComponent) {
        match component {
            DeadlineComponent::Sampler => self.miss_sampler += 1,
            DeadlineComponent::Stream => self.miss_stream += 1,
        }
        self.deadline_miss += 1;
    }
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub fn shared_metrics() -> SharedMetrics {
    Arc::new(Mutex::new(Metrics::default()))
}

/// Locks the metrics, recovering the guard if a writer panicked.
#[inline]
pub fn lock_metrics(metrics: &SharedMetrics) -> MutexGuard<'_, Metrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub const MAX_POINTS: usize = 1_000;

/// Appends u64 value to metrics buffer; removes oldest if at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for u64 buffer (cast to f64).
pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_buffer_drops_oldest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS as u64 + 5) {
            push_capped_u64(&mut buf, i);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front(), Some(&5));
    }

    #[test]
    fn stats_over_jitter() {
        let buf: VecDeque<u64> = [10, 20, 30].into_iter().collect();
        let stats = calculate_stats_u64(&buf).unwrap();
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.mean, 20.0);
        assert_eq!(stats.count, 3);
        assert!(calculate_stats_u64(&VecDeque::new()).is_none());
    }

    #[test]
    fn deadline_misses_are_attributed() {
        let mut m = Metrics::default();
        m.record_deadline_miss(DeadlineComponent::Sampler);
        m.record_deadline_miss(DeadlineComponent::Stream);
        m.record_deadline_miss(DeadlineComponent::Stream);
        assert_eq!(m.miss_sampler, 1);
        assert_eq!(m.miss_stream, 2);
        assert_eq!(m.deadline_miss, 3);
    }
}
