//! CSV export of the hand-interface run summary.
//!
//! Appends one row per run: started_at, samples, sample_faults, deadline misses, miss rate (%),
//! max/mean sampler jitter, frames sent, clients served, actuations, actuation faults.
//! Header is written only when the file is new so repeated runs accumulate.

use crate::utils::metrics::{SharedMetrics, calculate_stats_u64, lock_metrics};
use serde::Serialize;
use std::{
    fs::{OpenOptions, create_dir_all},
    io,
    path::Path,
};
use log::info;

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    started_at: &'a str,
    samples: u64,
    sample_faults: u64,
    deadline_miss: u64,
    deadline_miss_rate: String,
    max_jitter_us: u64,
    mean_jitter_us: String,
    frames_sent: u64,
    clients_served: u64,
    heartbeats_sent: u64,
    actuations: u64,
    actuation_faults: u64,
}

/// Appends the run summary to `csv_path`, creating parent directories as needed.
pub fn export_summary_csv(
    metrics: &SharedMetrics,
    started_at: &str,
    csv_path: &Path,
) -> Result<(), csv::Error> {
    if let Some(parent) = csv_path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent).map_err(csv::Error::from)?;
        }
    }
    let file_exists = csv_path.exists();

    let m = lock_metrics(metrics);

    let jitter = calculate_stats_u64(&m.jitter_us);
    let miss_rate = if m.samples > 0 {
        (m.deadline_miss as f64 / m.samples as f64) * 100.0
    } else {
        0.0
    };

    let row = SummaryRow {
        started_at,
        samples: m.samples,
        sample_faults: m.sample_faults,
        deadline_miss: m.deadline_miss,
        deadline_miss_rate: format!("{:.2}", miss_rate),
        max_jitter_us: jitter.as_ref().map(|s| s.max as u64).unwrap_or(0),
        mean_jitter_us: format!("{:.1}", jitter.as_ref().map(|s| s.mean).unwrap_or(0.0)),
        frames_sent: m.frames_sent,
        clients_served: m.clients_served,
        heartbeats_sent: m.heartbeats_sent,
        actuations: m.actuations,
        actuation_faults: m.actuation_faults,
    };
    drop(m);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)
        .map_err(csv::Error::from)?;

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(io::BufWriter::new(file));
    wtr.serialize(&row)?;
    wtr.flush()?;

    info!("Summary exported to: {}", csv_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::{push_capped_u64, shared_metrics};
    use std::fs;

    #[test]
    fn header_written_once_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/summary.csv");
        let metrics = shared_metrics();
        {
            let mut m = lock_metrics(&metrics);
            m.samples = 8;
            m.deadline_miss = 2;
            push_capped_u64(&mut m.jitter_us, 40);
            push_capped_u64(&mut m.jitter_us, 60);
        }

        export_summary_csv(&metrics, "run-a", &path).unwrap();
        export_summary_csv(&metrics, "run-b", &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3, "{text}");
        assert!(lines[0].starts_with("started_at,samples,"));
        assert!(lines[1].starts_with("run-a,8,0,2,25.00,60,50.0,"));
        assert!(lines[2].starts_with("run-b,"));
    }
}
