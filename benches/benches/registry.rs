//! Benchmarks for the key registry.
//!
//! Performance-critical paths:
//! - `issue_token`: token generation plus map insertion under the write lock
//! - `is_expired`: the read-locked lookup gating every command
//! - `purge_expired`: snapshot-then-delete over a populated map
//! - `write`/`read`: path policy checks around small file I/O

#![allow(missing_docs)]

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use keyspace::{ManualClock, Registry, RegistryOptions};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);

fn populated(count: usize) -> (tempfile::TempDir, Arc<ManualClock>, Registry, Vec<String>) {
    let temp = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let options = RegistryOptions::new(temp.path().join("keys"), TIMEOUT).with_clock(clock.clone());
    let registry = Registry::with_options(options).unwrap();
    let tokens = (0..count).map(|_| registry.issue_token()).collect();
    (temp, clock, registry, tokens)
}

fn bench_issue_token(c: &mut Criterion) {
    let (_temp, _clock, registry, _) = populated(0);
    c.bench_function("registry/issue_token", |b| {
        b.iter(|| black_box(registry.issue_token()));
    });
}

fn bench_is_expired(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry/is_expired");

    for size in [10usize, 1_000, 100_000] {
        let (_temp, _clock, registry, tokens) = populated(size);
        let probe = tokens[size / 2].clone();
        group.bench_with_input(BenchmarkId::from_parameter(size), &probe, |b, token| {
            b.iter(|| black_box(registry.is_expired(black_box(token))));
        });
    }

    group.finish();
}

fn bench_purge_expired(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry/purge_expired");
    group.sample_size(20);

    for size in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let fixture = populated(size);
                    // Half the keys get a directory so purge has real work to do.
                    for token in fixture.3.iter().step_by(2) {
                        fixture.2.write(token, "f.txt", "x").unwrap();
                    }
                    fixture.1.advance(TIMEOUT + Duration::from_millis(1));
                    fixture
                },
                |fixture| {
                    let report = fixture.2.purge_expired();
                    // Returned so the tempdir is dropped outside the timing loop.
                    (fixture, report)
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_write_read(c: &mut Criterion) {
    let (_temp, _clock, registry, tokens) = populated(1);
    let token = &tokens[0];
    let payload = "a".repeat(4096);

    c.bench_function("registry/write_4kb", |b| {
        b.iter(|| registry.write(token, "nested/file.txt", black_box(&payload)).unwrap());
    });
    c.bench_function("registry/read_4kb", |b| {
        b.iter(|| black_box(registry.read(token, "nested/file.txt")));
    });
}

criterion_group!(
    benches,
    bench_issue_token,
    bench_is_expired,
    bench_purge_expired,
    bench_write_read
);
criterion_main!(benches);
