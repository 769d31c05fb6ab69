//! Folding small segments into one.
//!
//! When a map holds more than `max_files` segments, a run of adjacent
//! segments is merged to bring the count down to about half of `max_files`.
//! The run is the one with the fewest entries, and the merged segment takes
//! its place, so segments outside the run keep their age relative to it.
//! The merge streams through [`MergeIter`] and is written through the same
//! ranked placement as a buffer persist. The inputs are released only after
//! the merged segment is verified; on failure nothing changes.

use super::SpillingMap;
use crate::diagnostics::SpillEvent;
use crate::error::Result;
use crate::location::place;
use crate::segment::{KeyRange, Segment};
use crate::view::MergeIter;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

/// Picks the run of adjacent segments to merge, given each segment's size.
///
/// Returns an empty range if no compaction is needed. `max_files == 0`
/// disables compaction. Among runs of the needed length, the one with the
/// smallest total size wins; ties go to the oldest.
pub(crate) fn select_for_compaction(sizes: &[u64], max_files: usize) -> Range<usize> {
    let count = sizes.len();
    if max_files == 0 || count <= max_files {
        return 0..0;
    }

    // aim for max_files / 2; the +1 accounts for the merged segment itself
    let excess = count - max_files / 2;
    let take = (excess + 1).min(count);

    let mut window: u64 = sizes[..take].iter().sum();
    let mut best = (window, 0);
    for start in 1..=(count - take) {
        window = window - sizes[start - 1] + sizes[start + take - 1];
        if window < best.0 {
            best = (window, start);
        }
    }
    best.1..best.1 + take
}

impl<K: Ord + Clone, V: Clone> SpillingMap<K, V> {
    /// Merges a run of adjacent small segments if there are more than
    /// `max_files`.
    ///
    /// Does nothing when `max_files` is 0 or not exceeded. If the merged
    /// segment cannot be written anywhere, returns
    /// [`Error::Exhausted`](crate::Error::Exhausted) and leaves every segment
    /// in place.
    pub fn compact(&mut self, max_files: usize) -> Result<()> {
        let sizes: Vec<u64> = self.view.segments().iter().map(|s| s.approximate_len()).collect();
        let run = select_for_compaction(&sizes, max_files);
        if run.is_empty() {
            return Ok(());
        }

        log::debug!(
            "Compacting {} of {} segments (max {})",
            run.len(),
            sizes.len(),
            max_files
        );
        let start = Instant::now();

        // Step 1: merge the chosen segments into a new file
        let segments = self.view.segments();
        let codec = &self.codec;
        let rewrite = &self.rewrite;
        let placement = place(&self.factories, self.options.num_retries, self.sink.as_ref(), |file| {
            let merged = MergeIter::new(&segments[run.clone()], &KeyRange::all(), rewrite.clone())?;
            Segment::persist_from(merged, file, Arc::clone(codec), rewrite.clone())
        });
        let (_, compacted) = placement.into_result("compaction")?;

        let file = compacted.file().map(|f| f.label()).unwrap_or_default();
        let entries = compacted.approximate_len();

        // Step 2: swap the inputs for the merged segment, in their position
        let inputs = self.view.replace_run(run.clone(), compacted)?;

        // Step 3: release the input files
        for segment in inputs {
            if let Err(e) = segment.release() {
                log::warn!("Failed to delete compacted segment file: {}", e);
            }
        }

        self.sink.record(SpillEvent::Compacted {
            inputs: run.len(),
            file,
            entries,
            elapsed: start.elapsed(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compaction_within_limit() {
        assert!(select_for_compaction(&[5, 5, 5], 3).is_empty());
        assert!(select_for_compaction(&[5; 50], 0).is_empty());
        assert!(select_for_compaction(&[], 4).is_empty());
    }

    #[test]
    fn test_selects_smallest_run() {
        // 6 segments, max 4: excess = 6 - 2 = 4, take 5
        assert_eq!(select_for_compaction(&[100, 1, 50, 2, 3, 4], 4), 1..6);

        // 5 segments, max 4: excess = 5 - 2 = 3, take 4
        assert_eq!(select_for_compaction(&[10, 40, 20, 30, 50], 4), 0..4);
    }

    #[test]
    fn test_run_is_contiguous() {
        // The two smallest are not adjacent; the run spans the larger one between them
        assert_eq!(select_for_compaction(&[900, 1, 300, 2, 800], 4), 1..5);
        assert_eq!(select_for_compaction(&[1, 900, 2, 3, 800], 4), 0..4);
    }

    #[test]
    fn test_ties_prefer_oldest() {
        assert_eq!(select_for_compaction(&[5, 5, 5, 5, 5], 4), 0..4);
    }

    #[test]
    fn test_takes_everything_for_small_limits() {
        assert_eq!(select_for_compaction(&[1, 2, 3], 2), 0..3);
        assert_eq!(select_for_compaction(&[7, 8], 1), 0..2);
    }

    #[test]
    fn test_result_count_halves_limit() {
        for max in 2..20usize {
            for count in (max + 1)..(3 * max) {
                let sizes: Vec<u64> = (0..count as u64).rev().collect();
                let run = select_for_compaction(&sizes, max);
                assert!(run.end <= count);
                let remaining = count - run.len() + 1;
                assert!(remaining <= max, "count {} max {} left {}", count, max, remaining);
            }
        }
    }
}
