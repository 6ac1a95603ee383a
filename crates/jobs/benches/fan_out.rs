// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fans a batch of independent jobs out across the runner pool and waits
//! for them all to join, the job-runtime analogue of `kasync`'s
//! `ping_pong` benchmark: a minimal workload whose cost is almost entirely
//! scheduling overhead rather than the jobs' own work.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use jobs::{ExecuteResult, Job, JobBatch, JobManager, JobManagerConfig, Runner, ANY_RUNNER};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn fan_out(manager: &'static JobManager, count: usize) {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut batch = JobBatch::new();
    for _ in 0..count {
        let counter = counter.clone();
        let job = Job::new("bench", jobs::Priority::from_ordinal(10), ANY_RUNNER, move |_: &Runner| {
            counter.fetch_add(1, Ordering::Relaxed);
            ExecuteResult::Finished
        });
        batch.add(job);
    }
    batch.submit(manager).unwrap();
    batch.wait();
    assert_eq!(counter.load(Ordering::Relaxed), count);
}

fn bench_fan_out(c: &mut Criterion) {
    let manager: &'static JobManager =
        Box::leak(Box::new(JobManager::new(JobManagerConfig::default())));
    manager.start();

    let mut group = c.benchmark_group("fan_out");
    for count in [64usize, 1024, 8192] {
        group.bench_with_input(format!("{count}_jobs"), &count, |b, &count| {
            b.iter_batched(|| (), |()| fan_out(manager, count), BatchSize::SmallInput);
        });
    }
    group.finish();

    manager.shutdown_and_join();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
