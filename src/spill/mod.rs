//! The buffered spilling map.
//!
//! Writes go into an in-memory buffer segment. When the buffer reaches
//! `buffer_persist_threshold` entries it is written to a segment file chosen
//! from a ranked list of [`SegmentFileFactory`](crate::SegmentFileFactory)s
//! and folded into a [`MultiSegmentView`]. When the view holds more than
//! `max_open_files` segments, the smallest ones are merged into one.
//!
//! Reads merge the buffer with every persisted segment. Lookups on persisted
//! data are sequential scans; `remove` rewrites every segment holding the key
//! and is meant for occasional use only.
//!
//! A map is driven by one caller at a time. Independent maps share nothing
//! and may live on different threads.

mod compaction;
mod recovery;

pub use self::recovery::LocationSpillingMap;

use crate::codec::SharedCodec;
use crate::config::SpillOptions;
use crate::diagnostics::{default_sink, SharedSink, SpillEvent};
use crate::error::{Error, Result};
use crate::location::{place, SharedFactory};
use crate::rewrite::{combine, SharedRewrite};
use crate::segment::{KeyRange, Segment};
use crate::view::{MergeIter, MultiSegmentView};
use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Builds a [`SpillingMap`] or a [`LocationSpillingMap`].
pub struct SpillingMapBuilder<K, V> {
    codec: SharedCodec<K, V>,
    options: SpillOptions,
    factories: Vec<SharedFactory>,
    rewrite: Option<SharedRewrite<K, V>>,
    sink: SharedSink,
}

impl<K, V> SpillingMapBuilder<K, V> {
    /// Starts a builder with default options and no storage.
    pub fn new(codec: SharedCodec<K, V>) -> Self {
        Self {
            codec,
            options: SpillOptions::default(),
            factories: Vec::new(),
            rewrite: None,
            sink: default_sink(),
        }
    }

    /// Sets the map options.
    pub fn options(mut self, options: SpillOptions) -> Self {
        self.options = options;
        self
    }

    /// Appends a storage candidate; earlier candidates are preferred.
    pub fn factory(mut self, factory: SharedFactory) -> Self {
        self.factories.push(factory);
        self
    }

    /// Replaces the storage candidates.
    pub fn factories(mut self, factories: Vec<SharedFactory>) -> Self {
        self.factories = factories;
        self
    }

    /// Sets the strategy resolving repeated keys.
    pub fn rewrite(mut self, rewrite: SharedRewrite<K, V>) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    /// Sets the diagnostics sink.
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Builds an empty map.
    pub fn build(self) -> Result<SpillingMap<K, V>> {
        self.options.validate()?;
        Ok(SpillingMap {
            options: self.options,
            factories: self.factories,
            codec: self.codec,
            rewrite: self.rewrite,
            buffer: None,
            view: MultiSegmentView::new(),
            size: Cell::new(Some(0)),
            sink: self.sink,
        })
    }
}

/// A sorted map that spills to segment files.
pub struct SpillingMap<K, V> {
    options: SpillOptions,
    factories: Vec<SharedFactory>,
    codec: SharedCodec<K, V>,
    rewrite: Option<SharedRewrite<K, V>>,
    /// Active in-memory segment; `None` until the first put after a persist.
    buffer: Option<Segment<K, V>>,
    /// Persisted segments, oldest first.
    view: MultiSegmentView<K, V>,
    /// Cached distinct-key count; `None` when it must be recomputed.
    size: Cell<Option<usize>>,
    sink: SharedSink,
}

impl<K, V> fmt::Debug for SpillingMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillingMap")
            .field("options", &self.options)
            .field("factories", &self.factories)
            .field("buffer", &self.buffer)
            .field("view", &self.view)
            .finish()
    }
}

impl<K: Clone, V: Clone> Clone for SpillingMap<K, V> {
    /// Copies the buffer; persisted segment files are shared by reference
    /// count and deleted only when the last map holding them releases them.
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            factories: self.factories.clone(),
            codec: Arc::clone(&self.codec),
            rewrite: self.rewrite.clone(),
            buffer: self.buffer.clone(),
            view: self.view.clone(),
            size: self.size.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<K, V> SpillingMap<K, V> {
    /// Starts building a map that stores records with `codec`.
    pub fn builder(codec: SharedCodec<K, V>) -> SpillingMapBuilder<K, V> {
        SpillingMapBuilder::new(codec)
    }

    /// The map options.
    pub fn options(&self) -> &SpillOptions {
        &self.options
    }

    /// The storage candidates, most preferred first.
    pub fn factories(&self) -> &[SharedFactory] {
        &self.factories
    }

    /// The strategy resolving repeated keys.
    pub fn rewrite_strategy(&self) -> Option<&SharedRewrite<K, V>> {
        self.rewrite.as_ref()
    }

    /// The diagnostics sink.
    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Entries currently held in the buffer.
    pub fn buffer_len(&self) -> usize {
        self.buffer.as_ref().map_or(0, |b| b.memory_len())
    }

    /// Number of persisted segments.
    pub fn segment_count(&self) -> usize {
        self.view.segment_count()
    }

    /// The persisted segments, oldest first.
    pub fn segments(&self) -> &[Segment<K, V>] {
        self.view.segments()
    }

    /// True when nothing is waiting in a buffer.
    pub fn is_persisted(&self) -> bool {
        self.buffer.is_none()
    }

    /// True if at least one segment file backs this map.
    pub fn has_persisted_data(&self) -> bool {
        self.view.segments().iter().any(|s| s.is_persisted())
    }

    /// Drops the buffer and releases every segment file.
    pub fn clear(&mut self) -> Result<()> {
        self.buffer = None;
        self.size.set(Some(0));
        self.view.clear()
    }

    pub(crate) fn add_persisted(&mut self, segment: Segment<K, V>) -> Result<()> {
        self.view.add_segment(segment)?;
        self.size.set(None);
        Ok(())
    }
}

impl<K: Ord + Clone, V: Clone> SpillingMap<K, V> {
    /// Inserts an entry into the buffer, persisting it once full.
    ///
    /// Returns true if the key was not yet in the buffer.
    pub fn put(&mut self, key: K, value: V) -> Result<bool> {
        let codec = &self.codec;
        let rewrite = &self.rewrite;
        let buffer = self
            .buffer
            .get_or_insert_with(|| Segment::new(Arc::clone(codec)).with_rewrite(rewrite.clone()));

        let inserted = buffer.put(key, value)?;
        if inserted {
            self.size.set(None);
        }
        if buffer.memory_len() >= self.options.buffer_persist_threshold {
            self.persist()?;
        }
        Ok(inserted)
    }

    /// Inserts every entry of `entries`.
    pub fn put_all<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Writes the buffer to a segment file, then compacts if needed.
    ///
    /// On [`Error::Exhausted`] the buffer is kept in memory and the call may
    /// be retried.
    pub fn persist(&mut self) -> Result<()> {
        if self.buffer_len() == 0 {
            self.buffer = None;
            return Ok(());
        }
        let buffer = match self.buffer.as_mut() {
            Some(buffer) => buffer,
            None => return Ok(()),
        };

        let start = Instant::now();
        let placement = place(&self.factories, self.options.num_retries, self.sink.as_ref(), |file| {
            buffer.persist(file)
        });
        let (location, ()) = placement.into_result("buffer")?;

        if let Some(segment) = self.buffer.take() {
            self.sink.record(SpillEvent::Persisted {
                location: self.factories[location].label(),
                file: segment.file().map(|f| f.name().to_string()).unwrap_or_default(),
                entries: segment.approximate_len(),
                elapsed: start.elapsed(),
            });
            self.view.add_segment(segment)?;
        }

        self.compact(self.options.max_open_files)
    }

    /// Looks `key` up in every segment and the buffer.
    ///
    /// Hits are folded oldest to newest through the rewrite strategy.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let mut value = self.view.get(key)?;
        if let Some(buffer) = &self.buffer {
            if let Some(found) = buffer.get(key)? {
                value = combine(self.rewrite.as_ref(), key, value, found);
            }
        }
        Ok(value)
    }

    /// True if the key is present; the buffer is checked first.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        if let Some(buffer) = &self.buffer {
            if buffer.contains_key(key)? {
                return Ok(true);
            }
        }
        self.view.contains_key(key)
    }

    /// Removes `key` from the buffer and every segment.
    ///
    /// Each segment file holding the key is loaded, rewritten without it to a
    /// new file, and the old file is released. Costs a scan of every segment.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        let rewrite = self.rewrite.clone();
        let mut value = None;

        for segment in self.view.segments_mut() {
            if !segment.contains_key(key)? {
                continue;
            }
            let was_persisted = segment.is_persisted();
            segment.load()?;
            let removed = segment.remove(key)?;
            if was_persisted {
                place(&self.factories, self.options.num_retries, self.sink.as_ref(), |file| {
                    segment.persist(file)
                })
                .into_result("segment rewrite")?;
            }
            if let Some(removed) = removed {
                value = combine(rewrite.as_ref(), key, value, removed);
            }
        }

        if let Some(buffer) = self.buffer.as_mut() {
            if let Some(removed) = buffer.remove(key)? {
                value = combine(rewrite.as_ref(), key, value, removed);
            }
        }

        if value.is_some() {
            self.size.set(None);
        }
        Ok(value)
    }

    /// Number of distinct keys.
    ///
    /// Cached until the next write. Recomputing merges all segments when
    /// more than one holds data. Fails with [`Error::InvalidState`] if a
    /// bounded view was added to the map.
    pub fn len(&self) -> Result<usize> {
        if let Some(size) = self.size.get() {
            return Ok(size);
        }
        if self.view.has_bounded_view() {
            return Err(Error::invalid_state(
                "Size of a bounded persisted view is unknown until it is loaded",
            ));
        }

        let size = match (self.view.segment_count(), self.buffer_len()) {
            (0, buffered) => buffered,
            (_, 0) => self.view.len()?,
            _ => {
                let mut count = 0;
                for entry in self.merged(&KeyRange::all())? {
                    entry?;
                    count += 1;
                }
                count
            }
        };
        self.size.set(Some(size));
        Ok(size)
    }

    /// True if the map holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        if self.buffer_len() > 0 {
            return Ok(false);
        }
        self.view.is_empty()
    }

    fn merged(&self, range: &KeyRange<K>) -> Result<MergeIter<'_, K, V>> {
        let children = self.view.segments().iter().chain(self.buffer.iter());
        MergeIter::new(children, range, self.rewrite.clone())
    }

    /// Streams every entry in key order.
    ///
    /// If both persisted data and buffered entries exist, the buffer is
    /// persisted first so the merge opens at most `max_open_files` files
    /// plus one.
    pub fn iter(&mut self) -> Result<MergeIter<'_, K, V>> {
        if self.has_persisted_data() && self.buffer_len() > 0 {
            self.persist()?;
        }
        self.merged(&KeyRange::all())
    }

    /// Collects every entry in key order.
    pub fn entries(&mut self) -> Result<Vec<(K, V)>> {
        self.iter()?.collect()
    }

    /// Streams every key in order.
    pub fn keys(&mut self) -> Result<impl Iterator<Item = Result<K>> + '_> {
        Ok(self.iter()?.map(|entry| entry.map(|(k, _)| k)))
    }

    /// Streams every value in key order.
    pub fn values(&mut self) -> Result<impl Iterator<Item = Result<V>> + '_> {
        Ok(self.iter()?.map(|entry| entry.map(|(_, v)| v)))
    }

    /// Streams entries with keys in `[from, to)` without persisting the buffer.
    pub fn range(&self, from: K, to: K) -> Result<MergeIter<'_, K, V>> {
        if from > to {
            return Err(Error::invalid_argument("range: from is greater than to"));
        }
        self.merged(&KeyRange::new(Some(from), Some(to)))
    }

    /// Streams entries inside `range` without persisting the buffer.
    pub fn iter_range(&self, range: &KeyRange<K>) -> Result<MergeIter<'_, K, V>> {
        self.merged(range)
    }

    /// Smallest key, or [`Error::NotFound`] when empty.
    pub fn first_key(&self) -> Result<K> {
        let mut best = present(self.view.first_key())?;
        if let Some(buffer) = &self.buffer {
            best = pick(best, present(buffer.first_key())?, Ordering::Less);
        }
        best.ok_or_else(|| Error::not_found("Map is empty"))
    }

    /// Largest key, or [`Error::NotFound`] when empty.
    pub fn last_key(&self) -> Result<K> {
        let mut best = present(self.view.last_key())?;
        if let Some(buffer) = &self.buffer {
            best = pick(best, present(buffer.last_key())?, Ordering::Greater);
        }
        best.ok_or_else(|| Error::not_found("Map is empty"))
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> SpillingMap<K, V> {
    /// True if some key maps to `value`. Scans every segment.
    pub fn contains_value(&self, value: &V) -> Result<bool> {
        for entry in self.merged(&KeyRange::all())? {
            if &entry?.1 == value {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Turns `NotFound` into `None`.
fn present<K>(result: Result<K>) -> Result<Option<K>> {
    match result {
        Ok(key) => Ok(Some(key)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Keeps whichever key compares as `wanted` against the other.
fn pick<K: Ord>(current: Option<K>, candidate: Option<K>, wanted: Ordering) -> Option<K> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(if b.cmp(&a) == wanted { b } else { a }),
        (a, None) => a,
        (None, b) => b,
    }
}
