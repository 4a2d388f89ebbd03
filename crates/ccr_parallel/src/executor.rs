//! Budgeted fork-join executor.
//!
//! Every operation follows the same shape:
//!
//! 1. Ranges shorter than two items, or a budget with fewer than two
//!    available workers, run sequentially on the calling thread with a single
//!    worker state.
//! 2. Otherwise `workers = min(available, len)` workers are leased from the
//!    budget. `workers - 1` background tasks are spawned into the executor's
//!    pool and one worker runs inline on the calling thread. Each worker
//!    creates its private state once and keeps claiming units from the shared
//!    [`WorkSource`] until it is exhausted. Stream workers create their state
//!    on the first claimed unit, so a worker that claims nothing contributes
//!    no state.
//! 3. The scope joins all background tasks. Failures from every worker are
//!    collected; if there is at least one, the call returns an
//!    [`AggregateFailure`] and no reduction happens.
//! 4. Otherwise worker states are reduced in a fixed order: background
//!    workers in dispatch order, then the inline worker.
//!
//! The reduction order is reproducible for a given worker count, but floating
//! point sums are not bitwise identical across different worker counts since
//! the grouping of terms changes with the partitioning.
//!
//! # Example
//!
//! ```
//! use ccr_parallel::{ParallelConfig, ParallelExecutor, WorkerAllocation};
//! use std::convert::Infallible;
//!
//! let executor = ParallelExecutor::new(ParallelConfig::with_workers(
//!     WorkerAllocation::Fixed(4),
//! )).unwrap();
//!
//! let mut squares = vec![0usize; 10];
//! executor
//!     .for_range(
//!         0..10,
//!         Vec::new,
//!         |i, local: &mut Vec<(usize, usize)>| {
//!             local.push((i, i * i));
//!             Ok::<_, Infallible>(())
//!         },
//!         |local| {
//!             for (i, v) in local {
//!                 squares[i] = v;
//!             }
//!         },
//!     )
//!     .unwrap();
//!
//! assert_eq!(squares, vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
//! ```

use std::convert::Infallible;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use crate::budget::WorkerBudget;
use crate::config::{ParallelConfig, WorkerAllocation};
use crate::error::{panic_message, AggregateFailure, ConfigError, WorkerFailure};
use crate::partition::split_range;
use crate::work_source::{RangeSource, StreamSource, WorkSource};

type WorkerOutcome<U, E> = Result<U, WorkerFailure<E>>;

/// Parallel executor owning a worker pool and its budget.
///
/// The executor is the explicit scheduling context of all parallel calls made
/// through it: nested calls issued from inside a worker consult the same
/// budget and fall back to sequential execution when it is exhausted.
pub struct ParallelExecutor {
    config: ParallelConfig,
    budget: WorkerBudget,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("config", &self.config)
            .field("budget", &self.budget)
            .field("pool_threads", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish()
    }
}

impl ParallelExecutor {
    /// Creates an executor from a configuration.
    ///
    /// The pool holds `allocated - 1` background threads; the calling thread
    /// is always the remaining worker. No pool is built when the allocation
    /// is a single worker.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the pool
    /// cannot be built.
    pub fn new(config: ParallelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let allocated = config.resolved_workers();

        let pool = if allocated >= 2 {
            let prefix = config.thread_name_prefix.clone();
            let pool = ThreadPoolBuilder::new()
                .num_threads(allocated - 1)
                .thread_name(move |i| format!("{}-{}", prefix, i))
                .build()
                .map_err(|e| ConfigError::PoolBuild(e.to_string()))?;
            Some(pool)
        } else {
            None
        };

        debug!(
            allocation = %config.workers,
            allocated,
            chunks_per_worker = config.chunks_per_worker,
            "parallel executor initialised"
        );

        Ok(Self {
            budget: WorkerBudget::new(allocated),
            config,
            pool,
        })
    }

    /// Creates an executor that always runs on the calling thread.
    pub fn sequential() -> Self {
        Self {
            config: ParallelConfig::with_workers(WorkerAllocation::Disabled),
            budget: WorkerBudget::new(1),
            pool: None,
        }
    }

    /// Returns the executor configuration.
    #[inline]
    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    /// Returns the worker budget.
    #[inline]
    pub fn budget(&self) -> &WorkerBudget {
        &self.budget
    }

    /// Returns the number of workers a call made now could use.
    #[inline]
    pub fn available_workers(&self) -> usize {
        self.budget.available()
    }

    // ========================================================================
    // Range operations
    // ========================================================================

    /// Runs `action(i, state)` for every `i` in `range`.
    ///
    /// Each worker creates its state once with `init`. When every worker has
    /// succeeded, `reduce` receives each worker state exactly once, in the
    /// fixed reduction order.
    ///
    /// An empty range is a no-op: neither `init` nor `reduce` is called.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregateFailure`] with one entry per failing worker.
    pub fn for_range<U, E, I, A, R>(
        &self,
        range: Range<usize>,
        init: I,
        action: A,
        mut reduce: R,
    ) -> Result<(), AggregateFailure<E>>
    where
        U: Send,
        E: Send,
        I: Fn() -> U + Sync,
        A: Fn(usize, &mut U) -> Result<(), E> + Sync,
        R: FnMut(U),
    {
        for state in self.range_states(range, &init, &action)? {
            reduce(state);
        }
        Ok(())
    }

    /// Runs `action(item, state)` for every element of `items`.
    ///
    /// Scheduling, failure and reduction semantics are those of
    /// [`for_range`](Self::for_range) over the item indices.
    pub fn for_each<T, U, E, I, A, R>(
        &self,
        items: &[T],
        init: I,
        action: A,
        reduce: R,
    ) -> Result<(), AggregateFailure<E>>
    where
        T: Sync,
        U: Send,
        E: Send,
        I: Fn() -> U + Sync,
        A: Fn(&T, &mut U) -> Result<(), E> + Sync,
        R: FnMut(U),
    {
        self.for_range(0..items.len(), init, |i, state| action(&items[i], state), reduce)
    }

    /// Runs `action` over `range` and folds the worker states with `combine`.
    ///
    /// States are folded left to right in the reduction order. An empty range
    /// returns `init()` unchanged.
    pub fn reduce<U, E, I, A, C>(
        &self,
        range: Range<usize>,
        init: I,
        action: A,
        combine: C,
    ) -> Result<U, AggregateFailure<E>>
    where
        U: Send,
        E: Send,
        I: Fn() -> U + Sync,
        A: Fn(usize, &mut U) -> Result<(), E> + Sync,
        C: Fn(U, U) -> U,
    {
        let mut states = self.range_states(range, &init, &action)?.into_iter();
        let first = match states.next() {
            Some(state) => state,
            None => return Ok(init()),
        };
        Ok(states.fold(first, combine))
    }

    /// Returns `Σ eval(i)` over `range`.
    ///
    /// # Errors
    ///
    /// Fails only if `eval` panics in some worker.
    pub fn sum<F>(&self, range: Range<usize>, eval: F) -> Result<f64, AggregateFailure>
    where
        F: Fn(usize) -> f64 + Sync,
    {
        self.reduce(
            range,
            || 0.0_f64,
            |i, acc| {
                *acc += eval(i);
                Ok::<_, Infallible>(())
            },
            |a, b| a + b,
        )
    }

    /// Returns the component-wise sums of a two-valued `eval(i)` over `range`.
    ///
    /// Typically used for a value and its square in one pass.
    pub fn sum2<F>(&self, range: Range<usize>, eval: F) -> Result<(f64, f64), AggregateFailure>
    where
        F: Fn(usize) -> (f64, f64) + Sync,
    {
        self.reduce(
            range,
            || (0.0_f64, 0.0_f64),
            |i, acc| {
                let (a, b) = eval(i);
                acc.0 += a;
                acc.1 += b;
                Ok::<_, Infallible>(())
            },
            |x, y| (x.0 + y.0, x.1 + y.1),
        )
    }

    // ========================================================================
    // Stream operations
    // ========================================================================

    /// Runs `action(position, item, state)` for every item of a stream.
    ///
    /// The stream is consumed through a shared cursor rather than pre-split
    /// ranges since its length may be unknown. Streams whose size hint
    /// guarantees fewer than two items run sequentially.
    pub fn enumerate<S, U, E, I, A, R>(
        &self,
        stream: S,
        init: I,
        action: A,
        mut reduce: R,
    ) -> Result<(), AggregateFailure<E>>
    where
        S: IntoIterator,
        S::IntoIter: Send,
        U: Send,
        E: Send,
        I: Fn() -> U + Sync,
        A: Fn(usize, S::Item, &mut U) -> Result<(), E> + Sync,
        R: FnMut(U),
    {
        let iter = stream.into_iter();
        let upper = iter.size_hint().1;
        if upper == Some(0) {
            return Ok(());
        }
        let available = self.budget.available();

        let states = if upper.is_some_and(|n| n < 2) || available < 2 || self.pool.is_none() {
            debug!(available, size_hint = ?upper, "enumerate: sequential branch");
            let outcome = run_worker(0, || -> Result<Option<U>, E> {
                let mut state = None;
                for (position, item) in iter.enumerate() {
                    action(position, item, state.get_or_insert_with(&init))?;
                }
                Ok(state)
            });
            collect_outcomes(vec![outcome])?
        } else {
            let workers = upper.map_or(available, |n| available.min(n));
            debug!(workers, size_hint = ?upper, "enumerate: parallel branch");
            let source = StreamSource::new(iter);
            let unit_action = |(position, item): (usize, S::Item), state: &mut U| -> Result<(), E> {
                action(position, item, state)
            };
            self.execute(workers, &|slot| {
                run_worker(slot, || drain_lazy(&source, &init, &unit_action))
            })?
        };

        for state in states {
            reduce(state);
        }
        Ok(())
    }

    // ========================================================================
    // Core
    // ========================================================================

    fn range_states<U, E, I, A>(
        &self,
        range: Range<usize>,
        init: &I,
        action: &A,
    ) -> Result<Vec<U>, AggregateFailure<E>>
    where
        U: Send,
        E: Send,
        I: Fn() -> U + Sync,
        A: Fn(usize, &mut U) -> Result<(), E> + Sync,
    {
        let len = range.end.saturating_sub(range.start);
        if len == 0 {
            return Ok(Vec::new());
        }

        let available = self.budget.available();
        if len < 2 || available < 2 || self.pool.is_none() {
            debug!(len, available, "for_range: sequential branch");
            let outcome = run_worker(0, || -> Result<Option<U>, E> {
                let mut state = init();
                for i in range {
                    action(i, &mut state)?;
                }
                Ok(Some(state))
            });
            return collect_outcomes(vec![outcome]);
        }

        let workers = available.min(len);
        let chunks = split_range(range, workers, self.config.chunks_per_worker);
        debug!(len, workers, chunks = chunks.len(), "for_range: parallel branch");

        let source = RangeSource::new(chunks);
        let chunk_action = |chunk: Range<usize>, state: &mut U| -> Result<(), E> {
            for i in chunk {
                action(i, state)?;
            }
            Ok(())
        };
        self.execute(workers, &|slot| {
            run_worker(slot, || -> Result<Option<U>, E> {
                let mut state = init();
                drain(&source, &chunk_action, &mut state)?;
                Ok(Some(state))
            })
        })
    }

    /// Runs `work(slot)` for `workers` slots; returns the produced states in
    /// reduction order.
    fn execute<U, E, W>(&self, workers: usize, work: &W) -> Result<Vec<U>, AggregateFailure<E>>
    where
        U: Send,
        E: Send,
        W: Fn(usize) -> WorkerOutcome<Option<U>, E> + Sync,
    {
        let pool = match &self.pool {
            Some(pool) if workers >= 2 => pool,
            _ => return collect_outcomes(vec![work(0)]),
        };

        let _lease = self.budget.acquire(workers);
        let inline_slot = workers - 1;
        let (tx, rx) = mpsc::channel::<(usize, WorkerOutcome<Option<U>, E>)>();

        let inline = pool.in_place_scope(|scope| {
            for slot in 0..inline_slot {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcome = work(slot);
                    trace!(slot, ok = outcome.is_ok(), "background worker finished");
                    // The receiver outlives the scope, so the send cannot fail.
                    let _ = tx.send((slot, outcome));
                });
            }
            let outcome = work(inline_slot);
            trace!(slot = inline_slot, ok = outcome.is_ok(), "inline worker finished");
            outcome
        });
        drop(tx);

        let mut background: Vec<(usize, WorkerOutcome<Option<U>, E>)> = rx.into_iter().collect();
        background.sort_by_key(|(slot, _)| *slot);
        debug_assert_eq!(background.len(), inline_slot);

        let mut outcomes: Vec<WorkerOutcome<Option<U>, E>> =
            background.into_iter().map(|(_, outcome)| outcome).collect();
        outcomes.push(inline);
        collect_outcomes(outcomes)
    }
}

/// Claims units from `source` until it is exhausted or `action` fails.
fn drain<S, U, E, A>(source: &S, action: &A, state: &mut U) -> Result<(), E>
where
    S: WorkSource,
    A: Fn(S::Unit, &mut U) -> Result<(), E>,
{
    while let Some(unit) = source.take() {
        action(unit, state)?;
    }
    Ok(())
}

/// Like [`drain`], but creates the state on the first claimed unit. Returns
/// `None` if the worker claimed nothing.
fn drain_lazy<S, U, E, I, A>(source: &S, init: &I, action: &A) -> Result<Option<U>, E>
where
    S: WorkSource,
    I: Fn() -> U,
    A: Fn(S::Unit, &mut U) -> Result<(), E>,
{
    let mut state = None;
    while let Some(unit) = source.take() {
        action(unit, state.get_or_insert_with(init))?;
    }
    Ok(state)
}

/// Runs one worker body, capturing errors and panics with the worker's slot.
fn run_worker<T, E, B>(slot: usize, body: B) -> WorkerOutcome<T, E>
where
    B: FnOnce() -> Result<T, E>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(body));

    match result {
        Ok(Ok(state)) => Ok(state),
        Ok(Err(source)) => Err(WorkerFailure::Action {
            worker: slot,
            source,
        }),
        Err(payload) => Err(WorkerFailure::Panicked {
            worker: slot,
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Splits outcomes into states or an aggregate failure. Workers that
/// produced no state are skipped.
fn collect_outcomes<U, E>(
    outcomes: Vec<WorkerOutcome<Option<U>, E>>,
) -> Result<Vec<U>, AggregateFailure<E>> {
    let mut states = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(Some(state)) => states.push(state),
            Ok(None) => {}
            Err(failure) => failures.push(failure),
        }
    }

    if failures.is_empty() {
        Ok(states)
    } else {
        debug!(failed = failures.len(), "parallel call failed");
        Err(AggregateFailure::new(failures))
    }
}
