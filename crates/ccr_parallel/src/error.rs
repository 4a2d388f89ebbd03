//! Error types for the parallel executor.
//!
//! Failures inside a worker are never raised where they happen. Each worker
//! records its own [`WorkerFailure`]; once every worker (background and
//! inline) has finished, the executor returns a single [`AggregateFailure`]
//! holding all of them.

use std::convert::Infallible;
use std::fmt;

use thiserror::Error;

/// Configuration errors raised while resolving the worker allocation.
///
/// These are fatal at start-up and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Worker count is neither `automatic`, `disabled` nor a positive integer.
    #[error("Invalid worker count '{0}': expected 'automatic', 'disabled' or a positive integer")]
    InvalidWorkerCount(String),

    /// Chunking factor must be at least one.
    #[error("Invalid chunks per worker {0}: must be at least 1")]
    InvalidChunksPerWorker(usize),

    /// Configuration file could not be read.
    #[error("Configuration file error: {0}")]
    FileError(String),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ParseError(String),

    /// The rayon worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    PoolBuild(String),
}

/// A failure captured inside a single worker.
///
/// `worker` is the dispatch slot of the worker: background workers are
/// numbered `0..n-1` in dispatch order and the inline worker (running on the
/// calling thread) takes slot `n-1`. The sequential branch uses slot `0`.
#[derive(Debug, Error)]
pub enum WorkerFailure<E> {
    /// The action (or initialiser) returned an error.
    #[error("worker {worker} failed: {source}")]
    Action {
        /// Dispatch slot of the failing worker.
        worker: usize,
        /// Error returned by the action.
        #[source]
        source: E,
    },

    /// The action (or initialiser) panicked.
    #[error("worker {worker} panicked: {message}")]
    Panicked {
        /// Dispatch slot of the failing worker.
        worker: usize,
        /// Panic payload rendered as text.
        message: String,
    },
}

impl<E> WorkerFailure<E> {
    /// Returns the dispatch slot of the failing worker.
    #[inline]
    pub fn worker(&self) -> usize {
        match self {
            Self::Action { worker, .. } | Self::Panicked { worker, .. } => *worker,
        }
    }

    /// Returns the action error, if this failure was not a panic.
    pub fn action_error(&self) -> Option<&E> {
        match self {
            Self::Action { source, .. } => Some(source),
            Self::Panicked { .. } => None,
        }
    }
}

/// All worker failures of one parallel call.
///
/// Returned only after every worker has terminated. Partial results from
/// workers that succeeded are discarded: a call either succeeds completely
/// or reports this error.
#[derive(Debug)]
pub struct AggregateFailure<E = Infallible> {
    failures: Vec<WorkerFailure<E>>,
}

impl<E> AggregateFailure<E> {
    /// Creates an aggregate from the collected worker failures.
    pub fn new(failures: Vec<WorkerFailure<E>>) -> Self {
        Self { failures }
    }

    /// Returns the captured failures, ordered by worker slot.
    #[inline]
    pub fn failures(&self) -> &[WorkerFailure<E>] {
        &self.failures
    }

    /// Returns the number of captured failures.
    #[inline]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns `true` if no failure was captured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Iterates over the action errors, skipping panics.
    pub fn action_errors(&self) -> impl Iterator<Item = &E> {
        self.failures.iter().filter_map(WorkerFailure::action_error)
    }

    /// Converts every action error with `f`, keeping worker slots and panics.
    pub fn map_action_errors<F>(self, mut f: impl FnMut(E) -> F) -> AggregateFailure<F> {
        let failures = self
            .failures
            .into_iter()
            .map(|failure| match failure {
                WorkerFailure::Action { worker, source } => WorkerFailure::Action {
                    worker,
                    source: f(source),
                },
                WorkerFailure::Panicked { worker, message } => {
                    WorkerFailure::Panicked { worker, message }
                }
            })
            .collect();
        AggregateFailure { failures }
    }
}

impl<E: fmt::Display> fmt::Display for AggregateFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} parallel worker(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for AggregateFailure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
