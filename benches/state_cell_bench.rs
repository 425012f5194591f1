/*
This benchmark measures how the snapshot cell behaves when the stream server and other
readers hammer read_snapshot() while the sampler keeps replacing it. Readers copy the
whole snapshot under the lock, so the cost should stay flat as reader count grows.
*/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use testcell_telemetry::component_a::state_cell::{SharedStateCell, Snapshot};
use std::{
    hint::black_box,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::SystemTime,
};

//Number of concurrent reader threads contending with one writer
const READER_COUNTS: &[usize] = &[1, 2, 4, 8];

//Reads each reader performs per iteration
const READS_PER_THREAD: usize = 20_000;

fn bench_snapshot_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_read_under_write");

    for &readers in READER_COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(readers), &readers, |b, &readers| {
            let cell = Arc::new(SharedStateCell::new());

            // writer runs for the whole measurement, like the sampler
            let running = Arc::new(AtomicBool::new(true));
            let writer = {
                let cell = Arc::clone(&cell);
                let running = Arc::clone(&running);
                thread::spawn(move || {
                    let mut seq = 0u64;
                    while running.load(Ordering::Relaxed) {
                        seq += 1;
                        let mut snap = Snapshot::initial(SystemTime::now());
                        snap.seq = seq;
                        snap.position_raw = (seq % 256) as i32;
                        cell.replace_snapshot(snap);
                    }
                })
            };

            b.iter(|| {
                let handles: Vec<_> = (0..readers)
                    .map(|_| {
                        let cell = Arc::clone(&cell);
                        thread::spawn(move || {
                            for _ in 0..READS_PER_THREAD {
                                black_box(cell.read_snapshot());
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    let _ = h.join();
                }
            });

            running.store(false, Ordering::Relaxed);
            let _ = writer.join();
        });
    }

    group.finish();
}

fn bench_command_toggle(c: &mut Criterion) {
    let cell = SharedStateCell::new();
    c.bench_function("command_toggle", |b| b.iter(|| black_box(cell.toggle_command())));
}

criterion_group!(benches, bench_snapshot_contention, bench_command_toggle);
criterion_main!(benches);
