use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use connwatch::cleanup::{AuditLog, CleanupEngine, CleanupPolicy};
use connwatch::clock::ManualClock;
use connwatch::network::SuspiciousTracker;
use connwatch::recorder::ActivityRecorder;
use connwatch::tracking::ConnectionStore;

fn loaded_engine(connections: usize) -> CleanupEngine {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(ConnectionStore::new(clock.clone(), 30));
    let tracker = Arc::new(SuspiciousTracker::new(clock.clone()));
    let recorder = ActivityRecorder::new(store.clone(), tracker.clone());

    for i in 0..connections {
        let ip = format!("10.{}.{}.{}", i % 4, (i / 4) % 256, i % 251);
        recorder.record(&ip, "bench", "/api/webhook/");
    }
    clock.advance_secs(31);

    CleanupEngine::new(store, tracker, Arc::new(AuditLog::new()), CleanupPolicy::default())
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("plan_1k", |b| {
        let engine = loaded_engine(1_000);
        b.iter(|| black_box(engine.plan()));
    });

    c.bench_function("plan_10k", |b| {
        let engine = loaded_engine(10_000);
        b.iter(|| black_box(engine.plan()));
    });

    c.bench_function("summary_10k", |b| {
        let engine = loaded_engine(10_000);
        b.iter(|| black_box(engine.store().summary()));
    });

    c.bench_function("record_plain_reuse", |b| {
        let clock = Arc::new(ManualClock::starting_now());
        let store = ConnectionStore::new(clock, 30);
        b.iter(|| black_box(store.record_plain_activity(black_box("192.0.2.1"), "bench")));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
