//! Property tests for the parallel executor.
//!
//! # Test Coverage
//!
//! - Every index visited exactly once for budgets {1, 2, 4, N}
//! - Sums agree with the sequential sum within tolerance
//! - Worker states reduced once each, never on failure
//! - Streams of unknown length fully enumerated

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use ccr_parallel::{AggregateFailure, ParallelConfig, ParallelExecutor, WorkerAllocation};
use proptest::prelude::*;

fn executor(workers: usize) -> ParallelExecutor {
    ParallelExecutor::new(ParallelConfig::with_workers(WorkerAllocation::Fixed(workers))).unwrap()
}

fn budgets() -> Vec<usize> {
    vec![1, 2, 4, num_cpus::get().max(1)]
}

// ============================================================================
// Coverage
// ============================================================================

#[test]
fn test_every_index_visited_once_for_all_budgets() {
    for workers in budgets() {
        let exec = executor(workers);
        let hits: Vec<AtomicUsize> = (0..5_000).map(|_| AtomicUsize::new(0)).collect();

        exec.for_range(
            0..5_000,
            || (),
            |i, _| {
                hits[i].fetch_add(1, Ordering::Relaxed);
                Ok::<_, Infallible>(())
            },
            |_| {},
        )
        .unwrap();

        assert!(
            hits.iter().all(|h| h.load(Ordering::Relaxed) == 1),
            "budget {workers}"
        );
    }
}

#[test]
fn test_offset_range_collected_through_worker_states() {
    let exec = executor(4);
    let mut collected = Vec::new();

    exec.for_range(
        100..1_100,
        Vec::new,
        |i, local: &mut Vec<usize>| {
            local.push(i);
            Ok::<_, Infallible>(())
        },
        |local| collected.extend(local),
    )
    .unwrap();

    collected.sort_unstable();
    assert_eq!(collected, (100..1_100).collect::<Vec<_>>());
}

#[test]
fn test_sum_within_tolerance_of_sequential() {
    let eval = |i: usize| ((i as f64) * 0.37).sin() * 1e3;
    let expected: f64 = (0..20_000).map(eval).sum();

    for workers in budgets() {
        let total = executor(workers).sum(0..20_000, eval).unwrap();
        assert_relative_eq!(total, expected, epsilon = 1e-6, max_relative = 1e-12);
    }
}

#[test]
fn test_nested_parallel_calls_complete() {
    let exec = executor(4);
    let total = exec
        .reduce(
            0..16,
            || 0.0,
            |i, acc: &mut f64| -> Result<(), AggregateFailure> {
                let inner = exec.sum(0..100, |j| (i * j) as f64)?;
                *acc += inner;
                Ok(())
            },
            |a, b| a + b,
        )
        .unwrap();

    // Σ_i Σ_j i·j = (Σ i)(Σ j)
    assert_relative_eq!(total, 120.0 * 4_950.0);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_reduce_visits_each_index_once(
        start in 0usize..500,
        len in 0usize..2_000,
        workers in 1usize..9,
    ) {
        let exec = executor(workers);
        let mut visited = exec
            .reduce(
                start..start + len,
                Vec::new,
                |i, local: &mut Vec<usize>| {
                    local.push(i);
                    Ok::<_, Infallible>(())
                },
                |mut a, b| {
                    a.extend(b);
                    a
                },
            )
            .unwrap();

        visited.sort_unstable();
        prop_assert_eq!(visited, (start..start + len).collect::<Vec<_>>());
        prop_assert_eq!(exec.budget().in_use(), 0);
    }

    #[test]
    fn prop_states_reduced_once_per_init(
        len in 0usize..1_000,
        workers in 1usize..9,
    ) {
        let exec = executor(workers);
        let inits = AtomicUsize::new(0);
        let mut reduces = 0usize;
        let mut total = 0usize;

        exec.for_range(
            0..len,
            || {
                inits.fetch_add(1, Ordering::Relaxed);
                0usize
            },
            |_, count: &mut usize| {
                *count += 1;
                Ok::<_, Infallible>(())
            },
            |count| {
                reduces += 1;
                total += count;
            },
        )
        .unwrap();

        prop_assert_eq!(total, len);
        prop_assert_eq!(reduces, inits.load(Ordering::Relaxed));
        prop_assert!(reduces <= workers.min(len.max(1)));
    }

    #[test]
    fn prop_failure_never_reduces(
        len in 2usize..1_000,
        workers in 1usize..9,
        fail_at in 0usize..1_000,
    ) {
        let fail_at = fail_at % len;
        let exec = executor(workers);
        let mut reduces = 0usize;

        let result = exec.for_range(
            0..len,
            || (),
            |i, _| if i == fail_at { Err(i) } else { Ok(()) },
            |_| reduces += 1,
        );

        let err = result.unwrap_err();
        prop_assert_eq!(err.len(), 1);
        prop_assert_eq!(err.action_errors().next(), Some(&fail_at));
        prop_assert_eq!(reduces, 0);
    }

    #[test]
    fn prop_enumerate_covers_stream(
        len in 0usize..2_000,
        workers in 1usize..9,
    ) {
        let exec = executor(workers);
        let mut positions = Vec::new();

        exec.enumerate(
            (0..len).map(|x| x * 2),
            Vec::new,
            |position, item, local: &mut Vec<usize>| {
                assert_eq!(item, position * 2);
                local.push(position);
                Ok::<_, Infallible>(())
            },
            |local| positions.extend(local),
        )
        .unwrap();

        positions.sort_unstable();
        prop_assert_eq!(positions, (0..len).collect::<Vec<_>>());
    }
}
