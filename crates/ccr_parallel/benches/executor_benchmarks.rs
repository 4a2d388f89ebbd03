//! Criterion benchmarks for the parallel executor.
//!
//! Benchmarks cover:
//! - `sum` over ranges of varying length and worker budgets
//! - `for_range` with vector-valued worker state
//! - `enumerate` over a stream of unknown length

use std::convert::Infallible;

use ccr_parallel::{ParallelConfig, ParallelExecutor, WorkerAllocation};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn executor(workers: usize) -> ParallelExecutor {
    ParallelExecutor::new(ParallelConfig::with_workers(WorkerAllocation::Fixed(workers))).unwrap()
}

/// Moderately expensive per-index work.
fn work(i: usize) -> f64 {
    let x = i as f64 * 1e-3;
    (0..32).fold(x, |acc, k| (acc + k as f64).sqrt().sin())
}

fn bench_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum");

    for len in [1_000, 100_000] {
        for workers in [1, 2, 4, 8] {
            let exec = executor(workers);
            let label = format!("{}items_{}workers", len, workers);
            group.bench_with_input(BenchmarkId::new("sum", &label), &len, |b, &len| {
                b.iter(|| exec.sum(0..black_box(len), work).unwrap());
            });
        }
    }

    group.finish();
}

fn bench_for_range_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("for_range_collect");

    for workers in [1, 4] {
        let exec = executor(workers);
        group.bench_function(format!("{}workers", workers), |b| {
            b.iter(|| {
                let mut out = Vec::with_capacity(50_000);
                exec.for_range(
                    0..50_000,
                    Vec::new,
                    |i, local: &mut Vec<f64>| {
                        local.push(work(i));
                        Ok::<_, Infallible>(())
                    },
                    |local| out.extend(local),
                )
                .unwrap();
                black_box(out)
            });
        });
    }

    group.finish();
}

fn bench_enumerate(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumerate");
    let exec = executor(4);

    group.bench_function("filtered_stream_4workers", |b| {
        b.iter(|| {
            let mut total = 0.0;
            exec.enumerate(
                (0..20_000usize).filter(|i| i % 3 != 0),
                || 0.0_f64,
                |_, item, acc: &mut f64| {
                    *acc += work(item);
                    Ok::<_, Infallible>(())
                },
                |acc| total += acc,
            )
            .unwrap();
            black_box(total)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sum, bench_for_range_collect, bench_enumerate);
criterion_main!(benches);
