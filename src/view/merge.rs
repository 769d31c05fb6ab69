//! Streaming k-way merge over segment iterators.
//!
//! Each child contributes at most one head entry to a binary heap. After an
//! entry is emitted only the children that contributed to it are advanced;
//! the others keep their heads for the next round.

use crate::error::Result;
use crate::rewrite::{combine, SharedRewrite};
use crate::segment::{KeyRange, Segment, SegmentIter};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Entry in the merge heap
struct HeapEntry<K, V> {
    key: K,
    value: V,
    child: usize,
}

impl<K: Ord, V> PartialEq for HeapEntry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.child == other.child
    }
}

impl<K: Ord, V> Eq for HeapEntry<K, V> {}

impl<K: Ord, V> PartialOrd for HeapEntry<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V> Ord for HeapEntry<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest key first); for equal keys
        // the earlier child pops first so later children act as candidates.
        other.key.cmp(&self.key).then_with(|| other.child.cmp(&self.child))
    }
}

/// Merges sorted children into one sorted, deduplicated stream.
///
/// Duplicate keys are folded in child order through the rewrite strategy:
/// the value held so far is "existing", the next child's is the candidate.
pub struct MergeIter<'a, K, V> {
    children: Vec<SegmentIter<'a, K, V>>,
    heap: BinaryHeap<HeapEntry<K, V>>,
    rewrite: Option<SharedRewrite<K, V>>,
    /// Children to advance before the next entry is chosen.
    pending: Vec<usize>,
    failed: bool,
}

impl<'a, K: Ord + Clone, V: Clone> MergeIter<'a, K, V> {
    /// Opens one iterator per segment over `range`.
    pub fn new<I>(segments: I, range: &KeyRange<K>, rewrite: Option<SharedRewrite<K, V>>) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Segment<K, V>>,
    {
        let children = segments
            .into_iter()
            .map(|segment| segment.iter_range(range))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_iters(children, rewrite))
    }

    /// Merges already opened iterators.
    pub fn from_iters(children: Vec<SegmentIter<'a, K, V>>, rewrite: Option<SharedRewrite<K, V>>) -> Self {
        let pending = (0..children.len()).collect();
        Self { heap: BinaryHeap::with_capacity(children.len()), children, rewrite, pending, failed: false }
    }

    /// Number of children being merged.
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    fn advance(&mut self, child: usize) -> Result<()> {
        if let Some(entry) = self.children[child].next() {
            let (key, value) = entry?;
            self.heap.push(HeapEntry { key, value, child });
        }
        Ok(())
    }
}

impl<K: Ord + Clone, V: Clone> Iterator for MergeIter<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        for child in std::mem::take(&mut self.pending) {
            if let Err(e) = self.advance(child) {
                self.failed = true;
                return Some(Err(e));
            }
        }

        let first = self.heap.pop()?;
        let key = first.key;
        let mut value = Some(first.value);
        self.pending.push(first.child);

        while self.heap.peek().is_some_and(|next| next.key == key) {
            if let Some(dup) = self.heap.pop() {
                value = combine(self.rewrite.as_ref(), &key, value, dup.value);
                self.pending.push(dup.child);
            }
        }

        value.map(|value| Ok((key, value)))
    }
}
