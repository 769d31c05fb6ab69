//! One logical sorted map over many segments.
//!
//! A [`MultiSegmentView`] holds an ordered list of child segments. Reads merge
//! the children on the fly with [`MergeIter`]; children later in the list are
//! treated as newer when the rewrite strategy resolves a duplicate key.
//!
//! All children must carry a rewrite strategy of the same type as the first
//! child (or all carry none). Only the type is compared: two instances of one
//! type configured differently are accepted, and it is up to the caller not
//! to mix them.

mod merge;

pub use self::merge::MergeIter;

use crate::error::{Error, Result};
use crate::rewrite::{combine, kind_of, SharedRewrite};
use crate::segment::{KeyRange, Segment};
use std::fmt;
use std::ops::Range;

/// An ordered collection of segments read as one map.
pub struct MultiSegmentView<K, V> {
    segments: Vec<Segment<K, V>>,
}

impl<K, V> Default for MultiSegmentView<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone, V: Clone> Clone for MultiSegmentView<K, V> {
    fn clone(&self) -> Self {
        Self { segments: self.segments.clone() }
    }
}

impl<K, V> fmt::Debug for MultiSegmentView<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSegmentView").field("segments", &self.segments).finish()
    }
}

impl<K, V> MultiSegmentView<K, V> {
    /// Creates an empty view.
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    /// Appends a child, making it the newest.
    ///
    /// Fails with [`Error::InvalidArgument`] if its rewrite strategy is of a
    /// different type than the first child's.
    pub fn add_segment(&mut self, segment: Segment<K, V>) -> Result<()> {
        self.check_compatible(&segment)?;
        self.segments.push(segment);
        Ok(())
    }

    /// Replaces the children in `run` with `segment`, which takes their
    /// place in the age order. Returns the replaced children.
    pub fn replace_run(&mut self, run: Range<usize>, segment: Segment<K, V>) -> Result<Vec<Segment<K, V>>> {
        if run.start > run.end || run.end > self.segments.len() {
            return Err(Error::invalid_argument(format!(
                "Run {:?} is outside the view's {} segments",
                run,
                self.segments.len()
            )));
        }
        self.check_compatible(&segment)?;
        Ok(self.segments.splice(run, std::iter::once(segment)).collect())
    }

    fn check_compatible(&self, segment: &Segment<K, V>) -> Result<()> {
        if let Some(first) = self.segments.first() {
            if kind_of(first.rewrite_strategy()) != kind_of(segment.rewrite_strategy()) {
                return Err(Error::invalid_argument(
                    "Segment rewrite strategy differs from the view's other segments",
                ));
            }
        }
        Ok(())
    }

    /// The strategy shared by all children.
    pub fn rewrite_strategy(&self) -> Option<&SharedRewrite<K, V>> {
        self.segments.first().and_then(|s| s.rewrite_strategy())
    }

    /// The children, oldest first.
    pub fn segments(&self) -> &[Segment<K, V>] {
        &self.segments
    }

    /// Mutable access to the children.
    pub fn segments_mut(&mut self) -> &mut [Segment<K, V>] {
        &mut self.segments
    }

    /// Number of children.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Removes every child without touching their files.
    pub fn take_all(&mut self) -> Vec<Segment<K, V>> {
        std::mem::take(&mut self.segments)
    }

    /// True if some child is a bounded view over a file.
    pub fn has_bounded_view(&self) -> bool {
        self.segments.iter().any(|s| s.is_bounded_view())
    }

    /// Empties every child, releasing their files, and drops them.
    pub fn clear(&mut self) -> Result<()> {
        let mut first_error = None;
        for segment in self.segments.drain(..) {
            if let Err(e) = segment.release() {
                log::warn!("Failed to release segment file: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<K: Ord + Clone, V: Clone> MultiSegmentView<K, V> {
    /// Streams all entries in key order.
    pub fn iter(&self) -> Result<MergeIter<'_, K, V>> {
        self.range(&KeyRange::all())
    }

    /// Streams entries in `range` in key order.
    pub fn range(&self, range: &KeyRange<K>) -> Result<MergeIter<'_, K, V>> {
        MergeIter::new(&self.segments, range, self.rewrite_strategy().cloned())
    }

    /// Smallest key over all children; every child is consulted.
    pub fn first_key(&self) -> Result<K> {
        let mut best: Option<K> = None;
        for segment in &self.segments {
            match segment.first_key() {
                Ok(key) => {
                    if best.as_ref().map_or(true, |b| &key < b) {
                        best = Some(key);
                    }
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        best.ok_or_else(|| Error::not_found("Map is empty"))
    }

    /// Largest key over all children; every child is consulted.
    pub fn last_key(&self) -> Result<K> {
        let mut best: Option<K> = None;
        for segment in &self.segments {
            match segment.last_key() {
                Ok(key) => {
                    if best.as_ref().map_or(true, |b| &key > b) {
                        best = Some(key);
                    }
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        best.ok_or_else(|| Error::not_found("Map is empty"))
    }

    /// Looks `key` up in every child and folds the hits.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let rewrite = self.rewrite_strategy();
        let mut value = None;
        for segment in &self.segments {
            if let Some(found) = segment.get(key)? {
                value = combine(rewrite, key, value, found);
            }
        }
        Ok(value)
    }

    /// True if any child holds `key`.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        for segment in &self.segments {
            if segment.contains_key(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Removes `key` from every child and folds the removed values.
    ///
    /// Every child must be in memory.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        let rewrite = self.rewrite_strategy().cloned();
        let mut value = None;
        for segment in &mut self.segments {
            if let Some(removed) = segment.remove(key)? {
                value = combine(rewrite.as_ref(), key, value, removed);
            }
        }
        Ok(value)
    }

    /// Number of distinct keys.
    ///
    /// A single child answers from its count; several children are merged
    /// so that keys present in more than one are counted once. Fails with
    /// [`Error::InvalidState`] if a child is a bounded view.
    pub fn len(&self) -> Result<usize> {
        if self.has_bounded_view() {
            return Err(Error::invalid_state(
                "Size of a bounded persisted view is unknown until it is loaded",
            ));
        }
        match self.segments.as_slice() {
            [] => Ok(0),
            [only] => only.len(),
            _ => {
                let mut count = 0;
                for entry in self.iter()? {
                    entry?;
                    count += 1;
                }
                Ok(count)
            }
        }
    }

    /// True if no child holds an entry.
    pub fn is_empty(&self) -> Result<bool> {
        for segment in &self.segments {
            if !segment.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BincodeCodec, SharedCodec};
    use crate::config::PersistOptions;
    use crate::rewrite::{KeepExisting, KeepGreatest, LastWriteWins, SharedRewrite};
    use crate::segment::SegmentFile;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn codec() -> SharedCodec<u32, u32> {
        Arc::new(BincodeCodec::new())
    }

    fn segment(entries: &[(u32, u32)], rewrite: Option<SharedRewrite<u32, u32>>) -> Segment<u32, u32> {
        let mut segment = Segment::new(codec()).with_rewrite(rewrite);
        for (k, v) in entries {
            segment.put(*k, *v).unwrap();
        }
        segment
    }

    #[test]
    fn test_add_segment_checks_strategy_type() {
        let mut view = MultiSegmentView::new();
        view.add_segment(segment(&[], Some(Arc::new(LastWriteWins)))).unwrap();
        view.add_segment(segment(&[], Some(Arc::new(LastWriteWins)))).unwrap();
        assert!(matches!(
            view.add_segment(segment(&[], Some(Arc::new(KeepExisting)))),
            Err(Error::InvalidArgument(_))
        ));
        assert!(view.add_segment(segment(&[], None)).is_err());
        assert_eq!(view.segment_count(), 2);
    }

    #[test]
    fn test_get_combines_all_children() {
        let greatest: SharedRewrite<u32, u32> = Arc::new(KeepGreatest);
        let mut view = MultiSegmentView::new();
        view.add_segment(segment(&[(1, 10), (2, 5)], Some(Arc::clone(&greatest)))).unwrap();
        view.add_segment(segment(&[(1, 3)], Some(Arc::clone(&greatest)))).unwrap();
        view.add_segment(segment(&[(1, 7), (3, 1)], Some(greatest))).unwrap();

        assert_eq!(view.get(&1).unwrap(), Some(10));
        assert_eq!(view.get(&4).unwrap(), None);
        assert!(view.contains_key(&3).unwrap());
        assert_eq!(view.len().unwrap(), 3);

        assert_eq!(view.remove(&1).unwrap(), Some(10));
        assert!(!view.contains_key(&1).unwrap());
    }

    #[test]
    fn test_first_and_last_key_skip_empty_children() {
        let mut view = MultiSegmentView::new();
        assert!(matches!(view.first_key(), Err(Error::NotFound(_))));

        view.add_segment(segment(&[(5, 0), (9, 0)], None)).unwrap();
        view.add_segment(segment(&[], None)).unwrap();
        view.add_segment(segment(&[(2, 0), (6, 0)], None)).unwrap();
        assert_eq!(view.first_key().unwrap(), 2);
        assert_eq!(view.last_key().unwrap(), 9);
    }

    #[test]
    fn test_len_refuses_bounded_views() {
        let store = MemoryStore::new("t");
        let mut seg = segment(&[(1, 1), (2, 2), (3, 3)], None);
        seg.persist(SegmentFile::new(Arc::new(store), "a.seg", PersistOptions::default())).unwrap();

        let mut view = MultiSegmentView::new();
        view.add_segment(seg.tail_map(2)).unwrap();
        assert!(matches!(view.len(), Err(Error::InvalidState(_))));
        assert_eq!(view.iter().unwrap().count(), 2);
    }

    #[test]
    fn test_replace_run_and_clear() {
        let store = MemoryStore::new("t");
        let mut view = MultiSegmentView::new();
        for i in 0..4u32 {
            let mut seg = segment(&[(i, i)], None);
            seg.persist(SegmentFile::new(
                Arc::new(store.clone()),
                format!("{}.seg", i),
                PersistOptions::default(),
            ))
            .unwrap();
            view.add_segment(seg).unwrap();
        }

        let replaced = view.replace_run(1..3, segment(&[(1, 1), (2, 2)], None)).unwrap();
        assert_eq!(replaced.len(), 2);
        assert_eq!(view.segment_count(), 3);
        let firsts: Vec<u32> = view.segments().iter().map(|s| s.first_key().unwrap()).collect();
        assert_eq!(firsts, vec![0, 1, 3]);

        assert!(matches!(view.replace_run(2..5, segment(&[], None)), Err(Error::InvalidArgument(_))));

        view.clear().unwrap();
        assert_eq!(view.segment_count(), 0);
        // Replaced children are not released by the view
        assert_eq!(store.file_count(), 2);
    }

    #[test]
    fn test_replace_run_keeps_newer_children_newer() {
        let latest: Option<SharedRewrite<u32, u32>> = Some(Arc::new(LastWriteWins));
        let mut view = MultiSegmentView::new();
        view.add_segment(segment(&[(1, 10)], latest.clone())).unwrap();
        view.add_segment(segment(&[(2, 20)], latest.clone())).unwrap();
        view.add_segment(segment(&[(1, 11)], latest.clone())).unwrap();

        // Fold the two oldest; the newest child still wins for key 1
        view.replace_run(0..2, segment(&[(1, 10), (2, 20)], latest.clone())).unwrap();
        assert_eq!(view.get(&1).unwrap(), Some(11));
        assert_eq!(view.get(&2).unwrap(), Some(20));
    }
}
