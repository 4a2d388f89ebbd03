//! Range partitioning for load balancing.

use std::ops::Range;

/// Splits `range` into at most `chunks_per_worker * workers` contiguous,
/// non-empty chunks covering the range exactly once.
///
/// The chunk count never exceeds the range length. Chunk sizes differ by at
/// most one; the larger chunks come first.
///
/// # Example
///
/// ```
/// use ccr_parallel::partition::split_range;
///
/// let chunks = split_range(0..10, 2, 2);
/// assert_eq!(chunks, vec![0..3, 3..6, 6..8, 8..10]);
/// ```
pub fn split_range(range: Range<usize>, workers: usize, chunks_per_worker: usize) -> Vec<Range<usize>> {
    let len = range.end.saturating_sub(range.start);
    if len == 0 {
        return Vec::new();
    }

    let n_chunks = workers
        .max(1)
        .saturating_mul(chunks_per_worker.max(1))
        .min(len);
    let base = len / n_chunks;
    let remainder = len % n_chunks;

    let mut chunks = Vec::with_capacity(n_chunks);
    let mut begin = range.start;
    for k in 0..n_chunks {
        let size = base + usize::from(k < remainder);
        chunks.push(begin..begin + size);
        begin += size;
    }
    debug_assert_eq!(begin, range.end);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_range() {
        assert!(split_range(5..5, 4, 2).is_empty());
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = split_range(7..3, 4, 2);
        assert!(reversed.is_empty());
    }

    #[test]
    fn test_fewer_items_than_chunks() {
        let chunks = split_range(10..13, 4, 2);
        assert_eq!(chunks, vec![10..11, 11..12, 12..13]);
    }

    #[test]
    fn test_two_chunks_per_worker() {
        let chunks = split_range(0..100, 4, 2);
        assert_eq!(chunks.len(), 8);
        assert_eq!(chunks[0], 0..13);
        assert_eq!(chunks[7], 88..100);
    }

    #[test]
    fn test_single_worker() {
        let chunks = split_range(0..9, 1, 1);
        assert_eq!(chunks, vec![0..9]);
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_range_exactly(
            start in 0usize..1_000,
            len in 0usize..5_000,
            workers in 1usize..64,
            per_worker in 1usize..4,
        ) {
            let range = start..start + len;
            let chunks = split_range(range.clone(), workers, per_worker);

            prop_assert!(chunks.len() <= (workers * per_worker).min(len.max(1)));

            let mut expected = range.start;
            for chunk in &chunks {
                prop_assert_eq!(chunk.start, expected);
                prop_assert!(chunk.end > chunk.start);
                expected = chunk.end;
            }
            prop_assert_eq!(expected, range.end);

            if let (Some(max), Some(min)) = (
                chunks.iter().map(|c| c.len()).max(),
                chunks.iter().map(|c| c.len()).min(),
            ) {
                prop_assert!(max - min <= 1);
            }
        }
    }
}
