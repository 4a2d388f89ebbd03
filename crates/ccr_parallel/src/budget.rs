//! Worker budget governor.
//!
//! Tracks how many workers are currently in use against the configured
//! allocation. The executor consults it before every call: when fewer than
//! two workers are available (because an enclosing parallel call already
//! holds them) the call runs sequentially instead of oversubscribing.
//!
//! The budget never blocks. Concurrent callers may briefly push `in_use`
//! above `allocated`; [`WorkerBudget::available`] saturates at one.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic count of workers in use versus the allocation.
///
/// # Example
///
/// ```
/// use ccr_parallel::WorkerBudget;
///
/// let budget = WorkerBudget::new(4);
/// assert_eq!(budget.available(), 4);
///
/// let lease = budget.acquire(3);
/// assert_eq!(budget.available(), 1);
///
/// drop(lease);
/// assert_eq!(budget.available(), 4);
/// ```
#[derive(Debug)]
pub struct WorkerBudget {
    allocated: usize,
    in_use: AtomicUsize,
}

impl WorkerBudget {
    /// Creates a budget with `allocated` workers (clamped to at least one).
    pub fn new(allocated: usize) -> Self {
        Self {
            allocated: allocated.max(1),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Returns the configured allocation.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Returns the number of workers currently leased.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Returns `max(1, allocated - in_use)`.
    #[inline]
    pub fn available(&self) -> usize {
        self.allocated.saturating_sub(self.in_use()).max(1)
    }

    /// Leases `workers` workers until the returned guard is dropped.
    pub fn acquire(&self, workers: usize) -> BudgetLease<'_> {
        self.in_use.fetch_add(workers, Ordering::AcqRel);
        BudgetLease {
            budget: self,
            workers,
        }
    }

    fn release(&self, workers: usize) {
        self.in_use.fetch_sub(workers, Ordering::AcqRel);
    }
}

/// RAII lease on part of a [`WorkerBudget`].
///
/// Releases its workers on drop, including while unwinding.
#[derive(Debug)]
#[must_use = "the workers are released as soon as the lease is dropped"]
pub struct BudgetLease<'a> {
    budget: &'a WorkerBudget,
    workers: usize,
}

impl BudgetLease<'_> {
    /// Returns the number of leased workers.
    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Drop for BudgetLease<'_> {
    fn drop(&mut self) {
        self.budget.release(self.workers);
    }
}
