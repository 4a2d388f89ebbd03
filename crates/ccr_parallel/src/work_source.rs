//! Work sources shared by the workers of one parallel call.
//!
//! A work source hands out units with "take next" semantics: every unit is
//! claimed by exactly one worker, and a worker stops once `take` returns
//! `None`.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A source of work units shared between workers.
pub trait WorkSource: Sync {
    /// The unit handed to a worker.
    type Unit;

    /// Claims the next unit, or returns `None` once the source is exhausted.
    fn take(&self) -> Option<Self::Unit>;
}

/// Pre-split contiguous sub-ranges claimed through an atomic cursor.
///
/// # Example
///
/// ```
/// use ccr_parallel::work_source::{RangeSource, WorkSource};
///
/// let source = RangeSource::new(vec![0..4, 4..8]);
/// assert_eq!(source.take(), Some(0..4));
/// assert_eq!(source.take(), Some(4..8));
/// assert_eq!(source.take(), None);
/// ```
#[derive(Debug)]
pub struct RangeSource {
    chunks: Vec<Range<usize>>,
    cursor: AtomicUsize,
}

impl RangeSource {
    /// Creates a source over the given chunks.
    pub fn new(chunks: Vec<Range<usize>>) -> Self {
        Self {
            chunks,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the number of chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if the source holds no chunks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl WorkSource for RangeSource {
    type Unit = Range<usize>;

    #[inline]
    fn take(&self) -> Option<Range<usize>> {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.chunks.get(slot).cloned()
    }
}

/// A sequential stream of unknown length behind a shared cursor.
///
/// Each take pulls one item from the iterator together with its position in
/// the stream.
#[derive(Debug)]
pub struct StreamSource<I: Iterator> {
    cursor: Mutex<StreamCursor<I>>,
}

#[derive(Debug)]
struct StreamCursor<I> {
    iter: I,
    position: usize,
    exhausted: bool,
}

impl<I: Iterator> StreamSource<I> {
    /// Wraps an iterator.
    pub fn new(iter: I) -> Self {
        Self {
            cursor: Mutex::new(StreamCursor {
                iter,
                position: 0,
                exhausted: false,
            }),
        }
    }
}

impl<I> WorkSource for StreamSource<I>
where
    I: Iterator + Send,
{
    type Unit = (usize, I::Item);

    fn take(&self) -> Option<(usize, I::Item)> {
        // A panic inside `next` leaves the cursor usable; the panicking worker
        // reports it and the rest drain the stream.
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        if cursor.exhausted {
            return None;
        }
        match cursor.iter.next() {
            Some(item) => {
                let position = cursor.position;
                cursor.position += 1;
                Some((position, item))
            }
            None => {
                cursor.exhausted = true;
                None
            }
        }
    }
}
