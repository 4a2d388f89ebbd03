//! # CCR Parallel
//!
//! Budgeted fork-join execution over index ranges and streams.
//!
//! This crate provides:
//! - A worker budget shared by nested parallel calls
//! - Range partitioning into contiguous chunks
//! - Work sources with atomic "take next" semantics
//! - `for_range`, `for_each`, `enumerate`, `sum`, `sum2` and `reduce`
//!   with worker-private state and a fixed reduction order
//! - Aggregated worker failures
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ParallelExecutor               │
//! │  budget/      - WorkerBudget, lease     │
//! │  partition/   - split_range             │
//! │  work_source/ - RangeSource, Stream     │
//! │  rayon pool   - allocated - 1 threads   │
//! │  caller       - inline worker           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ccr_parallel::{ParallelConfig, ParallelExecutor, WorkerAllocation};
//!
//! let executor = ParallelExecutor::new(ParallelConfig::with_workers(
//!     WorkerAllocation::Fixed(4),
//! )).unwrap();
//!
//! let total = executor.sum(0..1_000, |i| i as f64).unwrap();
//! assert_eq!(total, 499_500.0);
//! ```

#![warn(missing_docs)]

pub mod budget;
pub mod config;
pub mod error;
pub mod executor;
pub mod partition;
pub mod work_source;

pub use budget::{BudgetLease, WorkerBudget};
pub use config::{ParallelConfig, WorkerAllocation, DEFAULT_CHUNKS_PER_WORKER};
pub use error::{AggregateFailure, ConfigError, WorkerFailure};
pub use executor::ParallelExecutor;
