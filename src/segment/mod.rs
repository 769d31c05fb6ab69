//! Sorted runs of entries, held in memory or in one segment file.
//!
//! A [`Segment`] is either:
//!
//! - **in memory**: a `BTreeMap` that accepts `put`/`remove`; it may remember
//!   the file it was loaded from so it can be [`unload`](Segment::unload)ed
//! - **persisted**: entries live only in a segment file; reads are sequential
//!   scans and mutations fail until the segment is [`load`](Segment::load)ed
//! - **a bounded view**: a `[from, to)` window over a persisted file, shared
//!   with the segment it was cut from. Its exact size is unknown without a
//!   scan, so [`len`](Segment::len) refuses it.
//!
//! Persisted files are shared through `Arc<SegmentFile>`; cloning a persisted
//! segment or taking a sub-map never copies data, and a file is deleted only
//! when the last segment referencing it is released.

mod file;
mod range;

pub use self::file::{SegmentFile, SegmentReader, COUNT_SIZE};
pub use self::range::KeyRange;

use self::file::SegmentWriter;
use crate::codec::SharedCodec;
use crate::error::{Error, Result};
use crate::rewrite::{should_replace, SharedRewrite};
use std::collections::{btree_map, BTreeMap};
use std::fmt;
use std::sync::Arc;

/// Where a segment's entries currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// In memory, never written.
    InMemory,
    /// In memory, loaded from a file that still exists.
    Loaded,
    /// Only in a segment file.
    Persisted,
    /// A key window over a segment file.
    BoundedView,
}

#[derive(Clone)]
enum SegmentState<K, V> {
    InMemory { entries: BTreeMap<K, V>, backing: Option<Arc<SegmentFile>> },
    Persisted { file: Arc<SegmentFile>, count: u64 },
    BoundedView { file: Arc<SegmentFile>, file_count: u64 },
}

/// One sorted run of entries.
pub struct Segment<K, V> {
    state: SegmentState<K, V>,
    range: KeyRange<K>,
    codec: SharedCodec<K, V>,
    rewrite: Option<SharedRewrite<K, V>>,
}

impl<K: Clone, V: Clone> Clone for Segment<K, V> {
    /// In-memory entries are copied; a backing file is shared.
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            range: self.range.clone(),
            codec: Arc::clone(&self.codec),
            rewrite: self.rewrite.clone(),
        }
    }
}

impl<K, V> fmt::Debug for Segment<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Segment");
        d.field("status", &self.status());
        match &self.state {
            SegmentState::InMemory { entries, backing } => {
                d.field("entries", &entries.len());
                if let Some(file) = backing {
                    d.field("file", &file.label());
                }
            }
            SegmentState::Persisted { file, count } => {
                d.field("file", &file.label()).field("entries", count);
            }
            SegmentState::BoundedView { file, .. } => {
                d.field("file", &file.label());
            }
        }
        d.finish()
    }
}

impl<K, V> Segment<K, V> {
    /// Creates an empty in-memory segment.
    pub fn new(codec: SharedCodec<K, V>) -> Self {
        Self {
            state: SegmentState::InMemory { entries: BTreeMap::new(), backing: None },
            range: KeyRange::all(),
            codec,
            rewrite: None,
        }
    }

    /// Sets the strategy applied when a key is put twice.
    pub fn with_rewrite(mut self, rewrite: Option<SharedRewrite<K, V>>) -> Self {
        self.rewrite = rewrite;
        self
    }

    /// Wraps an existing segment file, reading its record count.
    pub fn from_file(
        file: Arc<SegmentFile>,
        codec: SharedCodec<K, V>,
        rewrite: Option<SharedRewrite<K, V>>,
    ) -> Result<Self> {
        let count = file.read_count()?;
        Ok(Self { state: SegmentState::Persisted { file, count }, range: KeyRange::all(), codec, rewrite })
    }

    /// Current state.
    pub fn status(&self) -> SegmentStatus {
        match &self.state {
            SegmentState::InMemory { backing: None, .. } => SegmentStatus::InMemory,
            SegmentState::InMemory { backing: Some(_), .. } => SegmentStatus::Loaded,
            SegmentState::Persisted { .. } => SegmentStatus::Persisted,
            SegmentState::BoundedView { .. } => SegmentStatus::BoundedView,
        }
    }

    /// True if entries are only available from a file.
    pub fn is_persisted(&self) -> bool {
        !matches!(self.state, SegmentState::InMemory { .. })
    }

    /// True for a bounded window over a file.
    pub fn is_bounded_view(&self) -> bool {
        matches!(self.state, SegmentState::BoundedView { .. })
    }

    /// The file holding (or that held) this segment's entries.
    pub fn file(&self) -> Option<&Arc<SegmentFile>> {
        match &self.state {
            SegmentState::InMemory { backing, .. } => backing.as_ref(),
            SegmentState::Persisted { file, .. } | SegmentState::BoundedView { file, .. } => Some(file),
        }
    }

    /// The key window this segment is restricted to.
    pub fn range(&self) -> &KeyRange<K> {
        &self.range
    }

    /// The codec used for the backing file.
    pub fn codec(&self) -> &SharedCodec<K, V> {
        &self.codec
    }

    /// The strategy applied when a key is put twice.
    pub fn rewrite_strategy(&self) -> Option<&SharedRewrite<K, V>> {
        self.rewrite.as_ref()
    }

    /// Exact entry count.
    ///
    /// Fails with [`Error::InvalidState`] for a bounded view; load it first.
    pub fn len(&self) -> Result<usize> {
        match &self.state {
            SegmentState::InMemory { entries, .. } => Ok(entries.len()),
            SegmentState::Persisted { count, .. } => Ok(*count as usize),
            SegmentState::BoundedView { .. } => {
                Err(Error::invalid_state("Size of a bounded persisted view is unknown until it is loaded"))
            }
        }
    }

    /// Entry count, or for a bounded view the count of the whole file.
    ///
    /// Used to rank segments for compaction.
    pub fn approximate_len(&self) -> u64 {
        match &self.state {
            SegmentState::InMemory { entries, .. } => entries.len() as u64,
            SegmentState::Persisted { count, .. } => *count,
            SegmentState::BoundedView { file_count, .. } => *file_count,
        }
    }

    /// Number of entries held in memory.
    pub fn memory_len(&self) -> usize {
        match &self.state {
            SegmentState::InMemory { entries, .. } => entries.len(),
            _ => 0,
        }
    }

    /// Drops the in-memory copy of a loaded segment and reverts to its file.
    ///
    /// Changes made since [`load`](Self::load) are discarded.
    pub fn unload(&mut self) -> Result<()> {
        let file = match &self.state {
            SegmentState::InMemory { backing: Some(file), .. } => Arc::clone(file),
            SegmentState::InMemory { backing: None, .. } => {
                return Err(Error::invalid_state("Segment has no backing file to revert to"))
            }
            _ => return Ok(()),
        };
        let count = file.read_count()?;
        self.state = if self.range.is_bounded() {
            SegmentState::BoundedView { file, file_count: count }
        } else {
            SegmentState::Persisted { file, count }
        };
        Ok(())
    }

    /// Empties the segment and releases its file.
    pub fn clear(&mut self) -> Result<()> {
        let old = std::mem::replace(
            &mut self.state,
            SegmentState::InMemory { entries: BTreeMap::new(), backing: None },
        );
        release_state(old)
    }

    /// Consumes the segment, releasing its file.
    ///
    /// The file is deleted only if no clone or view still references it.
    pub fn release(self) -> Result<()> {
        release_state(self.state)
    }
}

fn release_state<K, V>(state: SegmentState<K, V>) -> Result<()> {
    let file = match state {
        SegmentState::InMemory { backing, .. } => backing,
        SegmentState::Persisted { file, .. } | SegmentState::BoundedView { file, .. } => Some(file),
    };
    if let Some(file) = file {
        SegmentFile::release(file)?;
    }
    Ok(())
}

/// Writes entries through `fill`, then verifies the file.
///
/// Any failure deletes the partial file.
fn write_verified<K, V, F>(file: &SegmentFile, codec: &SharedCodec<K, V>, fill: F) -> Result<u64>
where
    K: Ord,
    F: FnOnce(&mut SegmentWriter<'_, K, V>) -> Result<()>,
{
    let result = (|| {
        let mut writer = file.writer(codec.as_ref())?;
        fill(&mut writer)?;
        let summary = writer.finish()?;
        file.verify(codec, &summary)?;
        Ok(summary.count)
    })();

    if result.is_err() {
        if let Err(e) = file.delete() {
            log::warn!("Failed to delete partial segment file {}: {}", file.label(), e);
        }
    }
    result
}

impl<K: Ord + Clone, V: Clone> Segment<K, V> {
    /// Writes a sorted stream straight into a new persisted segment.
    ///
    /// The stream is not buffered; keys must arrive in strictly ascending
    /// order. A failed write deletes `file`.
    pub fn persist_from<I>(
        entries: I,
        file: SegmentFile,
        codec: SharedCodec<K, V>,
        rewrite: Option<SharedRewrite<K, V>>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Result<(K, V)>>,
    {
        let count = write_verified(&file, &codec, |writer| {
            let mut last: Option<K> = None;
            for entry in entries {
                let (key, value) = entry?;
                if last.as_ref().is_some_and(|prev| prev >= &key) {
                    return Err(Error::invalid_argument("Entries are not in ascending key order"));
                }
                writer.append(&key, &value)?;
                last = Some(key);
            }
            Ok(())
        })?;

        Ok(Self {
            state: SegmentState::Persisted { file: Arc::new(file), count },
            range: KeyRange::all(),
            codec,
            rewrite,
        })
    }

    /// Writes the in-memory entries to `file` and drops them from memory.
    ///
    /// If the segment was loaded from another file, that file is released
    /// once the new one is verified. On failure `file` is deleted and the
    /// segment is unchanged.
    pub fn persist(&mut self, file: SegmentFile) -> Result<()> {
        let entries = match &self.state {
            SegmentState::InMemory { entries, .. } => entries,
            _ => return Err(Error::invalid_state("Segment is already persisted")),
        };

        let count = write_verified(&file, &self.codec, |writer| {
            for (key, value) in entries {
                writer.append(key, value)?;
            }
            Ok(())
        })?;

        let old = std::mem::replace(
            &mut self.state,
            SegmentState::Persisted { file: Arc::new(file), count },
        );
        if let SegmentState::InMemory { backing: Some(previous), .. } = old {
            let label = previous.label();
            if let Err(e) = SegmentFile::release(previous) {
                log::warn!("Failed to delete replaced segment file {}: {}", label, e);
            }
        }
        Ok(())
    }

    /// Reads the entries inside this segment's range back into memory.
    ///
    /// The backing file is kept.
    pub fn load(&mut self) -> Result<()> {
        let file = match &self.state {
            SegmentState::InMemory { .. } => return Ok(()),
            SegmentState::Persisted { file, .. } | SegmentState::BoundedView { file, .. } => {
                Arc::clone(file)
            }
        };

        let mut entries = BTreeMap::new();
        for entry in file.reader(Arc::clone(&self.codec), self.range.clone())? {
            let (key, value) = entry?;
            entries.insert(key, value);
        }
        self.state = SegmentState::InMemory { entries, backing: Some(file) };
        Ok(())
    }

    fn entries_mut(&mut self) -> Result<&mut BTreeMap<K, V>> {
        match &mut self.state {
            SegmentState::InMemory { entries, .. } => Ok(entries),
            _ => Err(Error::invalid_state("Cannot modify a persisted segment; load it first")),
        }
    }

    /// Inserts an entry, consulting the rewrite strategy if the key exists.
    ///
    /// Returns true if the key was not present before.
    pub fn put(&mut self, key: K, value: V) -> Result<bool> {
        if !self.range.contains(&key) {
            return Err(Error::invalid_argument("Key is outside the segment's range"));
        }
        let rewrite = self.rewrite.clone();
        let entries = self.entries_mut()?;
        match entries.entry(key) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
            btree_map::Entry::Occupied(mut slot) => {
                if should_replace(rewrite.as_ref(), slot.key(), slot.get(), &value) {
                    slot.insert(value);
                }
                Ok(false)
            }
        }
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        let in_range = self.range.contains(key);
        let entries = self.entries_mut()?;
        if !in_range {
            return Ok(None);
        }
        Ok(entries.remove(key))
    }

    /// Streams every entry in key order.
    pub fn iter(&self) -> Result<SegmentIter<'_, K, V>> {
        self.iter_range(&KeyRange::all())
    }

    /// Streams entries of `range` (intersected with this segment's range).
    pub fn iter_range(&self, range: &KeyRange<K>) -> Result<SegmentIter<'_, K, V>> {
        let effective = self.range.intersect(range);
        if effective.is_empty() {
            return Ok(SegmentIter::Empty);
        }
        match &self.state {
            SegmentState::InMemory { entries, .. } => {
                Ok(SegmentIter::Memory(entries.range(effective.as_bounds())))
            }
            SegmentState::Persisted { file, .. } | SegmentState::BoundedView { file, .. } => {
                Ok(SegmentIter::File(file.reader(Arc::clone(&self.codec), effective)?))
            }
        }
    }

    /// Looks up a key. On a persisted segment this is a linear scan.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        if !self.range.contains(key) {
            return Ok(None);
        }
        if let SegmentState::InMemory { entries, .. } = &self.state {
            return Ok(entries.get(key).cloned());
        }
        // the scan starts at `key`, so the first hit decides
        match self.iter_range(&KeyRange::tail(key.clone()))?.next() {
            Some(entry) => {
                let (found, value) = entry?;
                Ok(if &found == key { Some(value) } else { None })
            }
            None => Ok(None),
        }
    }

    /// True if the key is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        if let SegmentState::InMemory { entries, .. } = &self.state {
            return Ok(self.range.contains(key) && entries.contains_key(key));
        }
        Ok(self.get(key)?.is_some())
    }

    /// Smallest key, or [`Error::NotFound`] when empty.
    pub fn first_key(&self) -> Result<K> {
        match self.iter()?.next() {
            Some(entry) => Ok(entry?.0),
            None => Err(Error::not_found("Segment is empty")),
        }
    }

    /// Largest key, or [`Error::NotFound`] when empty.
    ///
    /// Scans the whole range of a persisted segment.
    pub fn last_key(&self) -> Result<K> {
        if self.range.is_empty() {
            return Err(Error::not_found("Segment is empty"));
        }
        if let SegmentState::InMemory { entries, .. } = &self.state {
            return entries
                .range(self.range.as_bounds())
                .next_back()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| Error::not_found("Segment is empty"));
        }
        let mut last = None;
        for entry in self.iter()? {
            last = Some(entry?.0);
        }
        last.ok_or_else(|| Error::not_found("Segment is empty"))
    }

    /// True if the segment holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        match &self.state {
            SegmentState::InMemory { entries, .. } => Ok(entries.is_empty()),
            SegmentState::Persisted { count, .. } => Ok(*count == 0),
            SegmentState::BoundedView { .. } => match self.iter()?.next() {
                Some(entry) => entry.map(|_| false),
                None => Ok(true),
            },
        }
    }

    /// Entries in `[from, to)`.
    ///
    /// Persisted data is shared as a bounded view; in-memory data is copied.
    pub fn sub_map(&self, from: K, to: K) -> Result<Self> {
        if from > to {
            return Err(Error::invalid_argument("sub_map: from is greater than to"));
        }
        Ok(self.bounded(KeyRange::new(Some(from), Some(to))))
    }

    /// Entries below `to`.
    pub fn head_map(&self, to: K) -> Self {
        self.bounded(KeyRange::head(to))
    }

    /// Entries at or above `from`.
    pub fn tail_map(&self, from: K) -> Self {
        self.bounded(KeyRange::tail(from))
    }

    fn bounded(&self, range: KeyRange<K>) -> Self {
        let range = self.range.intersect(&range);
        let state = match &self.state {
            SegmentState::InMemory { entries, .. } => {
                let entries = if range.is_empty() {
                    BTreeMap::new()
                } else {
                    entries.range(range.as_bounds()).map(|(k, v)| (k.clone(), v.clone())).collect()
                };
                SegmentState::InMemory { entries, backing: None }
            }
            SegmentState::Persisted { file, count } => {
                SegmentState::BoundedView { file: Arc::clone(file), file_count: *count }
            }
            SegmentState::BoundedView { file, file_count } => {
                SegmentState::BoundedView { file: Arc::clone(file), file_count: *file_count }
            }
        };
        Self { state, range, codec: Arc::clone(&self.codec), rewrite: self.rewrite.clone() }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Segment<K, V> {
    /// True if some entry holds `value`. Always a full scan.
    pub fn contains_value(&self, value: &V) -> Result<bool> {
        for entry in self.iter()? {
            if &entry?.1 == value {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Iterator over a segment's entries.
pub enum SegmentIter<'a, K, V> {
    /// Nothing to yield.
    Empty,
    /// Entries held in memory.
    Memory(btree_map::Range<'a, K, V>),
    /// Entries read from a file.
    File(SegmentReader<K, V>),
}

impl<K: Ord + Clone, V: Clone> Iterator for SegmentIter<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SegmentIter::Empty => None,
            SegmentIter::Memory(range) => range.next().map(|(k, v)| Ok((k.clone(), v.clone()))),
            SegmentIter::File(reader) => reader.next(),
        }
    }
}
