//! Segment file format.
//!
//! A segment file is a sequence of codec records in key order followed by a
//! fixed trailer:
//!
//! ```text
//! [record 0][record 1]...[record n-1][count: u32 BE]
//! ```
//!
//! Sequential readers stop `COUNT_SIZE` bytes before the end; readers that
//! only need the count seek straight to the trailer.

use super::range::KeyRange;
use crate::codec::{Codec, SharedCodec};
use crate::config::PersistOptions;
use crate::error::{Error, Result};
use crate::store::{ReadSeek, SharedStore, StoreWriter};
use std::fmt;
use std::io::{Read, SeekFrom, Take, Write};
use std::sync::Arc;

/// Size of the trailing record count.
pub const COUNT_SIZE: u64 = 4;

/// Handle to one segment file in a store.
///
/// Segments hold this behind an `Arc`; a file is deleted through
/// [`SegmentFile::release`] only when the last reference lets go of it.
pub struct SegmentFile {
    store: SharedStore,
    name: String,
    options: PersistOptions,
}

impl fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentFile").field("file", &self.label()).finish()
    }
}

impl SegmentFile {
    /// Creates a handle; no I/O is performed.
    pub fn new(store: SharedStore, name: impl Into<String>, options: PersistOptions) -> Self {
        Self { store, name: name.into(), options }
    }

    /// File name within the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `store/name`, for diagnostics.
    pub fn label(&self) -> String {
        format!("{}/{}", self.store.label(), self.name)
    }

    /// The store holding the file.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Verification applied when writing this file.
    pub fn options(&self) -> &PersistOptions {
        &self.options
    }

    /// File length in bytes.
    pub fn len(&self) -> Result<u64> {
        self.store.file_len(&self.name)
    }

    /// Reads the record count from the trailer.
    pub fn read_count(&self) -> Result<u64> {
        let len = self.len()?;
        if len < COUNT_SIZE {
            return Err(Error::corruption(format!(
                "{} is too small to hold a record count ({} bytes)",
                self.label(),
                len
            )));
        }
        let mut input = self.store.open(&self.name)?;
        input.seek(SeekFrom::Start(len - COUNT_SIZE))?;
        let mut buf = [0u8; COUNT_SIZE as usize];
        input.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf) as u64)
    }

    /// Deletes the file.
    pub fn delete(&self) -> Result<()> {
        self.store.remove(&self.name)
    }

    /// Drops one reference; deletes the file if it was the last one.
    ///
    /// Returns true if the file was deleted.
    pub fn release(file: Arc<SegmentFile>) -> Result<bool> {
        match Arc::into_inner(file) {
            Some(file) => {
                file.delete()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn writer<'c, K, V>(&self, codec: &'c dyn Codec<K, V>) -> Result<SegmentWriter<'c, K, V>> {
        let out = self.store.create(&self.name)?;
        Ok(SegmentWriter {
            out,
            codec,
            buf: Vec::new(),
            count: 0,
            sample: Vec::new(),
            sample_limit: if self.options.verify_elements {
                self.options.num_elements_to_verify
            } else {
                0
            },
        })
    }

    /// Opens a reader over the records, skipping keys outside `range`.
    pub(crate) fn reader<K: Ord, V>(
        &self,
        codec: SharedCodec<K, V>,
        range: KeyRange<K>,
    ) -> Result<SegmentReader<K, V>> {
        let len = self.len()?;
        if len < COUNT_SIZE {
            return Err(Error::corruption(format!(
                "{} is too small to be a segment ({} bytes)",
                self.label(),
                len
            )));
        }
        let input = self.store.open(&self.name)?.take(len - COUNT_SIZE);
        Ok(SegmentReader { input, codec, range, done: false })
    }

    /// Re-reads a freshly written file and compares it with what was written.
    pub(crate) fn verify<K: Ord, V>(
        &self,
        codec: &SharedCodec<K, V>,
        written: &WriteSummary,
    ) -> Result<()> {
        if self.len()? == 0 {
            return Err(Error::verification(self.label(), "file is empty"));
        }

        if self.options.verify_elements && !written.sample.is_empty() {
            let mut reader = self.reader(Arc::clone(codec), KeyRange::all())?;
            let mut buf = Vec::new();
            for (index, expected) in written.sample.iter().enumerate() {
                let (key, value) = match reader.next() {
                    Some(entry) => entry.map_err(|e| {
                        Error::verification(self.label(), format!("element {}: {}", index + 1, e))
                    })?,
                    None => {
                        return Err(Error::verification(
                            self.label(),
                            format!("element {} is missing", index + 1),
                        ))
                    }
                };
                buf.clear();
                codec.encode(&key, &value, &mut buf)?;
                if &buf != expected {
                    return Err(Error::verification(
                        self.label(),
                        format!("element {} does not match", index + 1),
                    ));
                }
            }
        }

        if self.options.verify_size {
            let count = self
                .read_count()
                .map_err(|e| Error::verification(self.label(), e.to_string()))?;
            if count != written.count {
                return Err(Error::verification(
                    self.label(),
                    format!("trailer count {} != {} written", count, written.count),
                ));
            }
        }

        Ok(())
    }
}

/// What a writer produced.
#[derive(Debug, Default)]
pub(crate) struct WriteSummary {
    /// Records written.
    pub count: u64,
    /// Encodings of the leading records, for verification.
    pub sample: Vec<Vec<u8>>,
}

/// Streams records into a new segment file.
pub(crate) struct SegmentWriter<'c, K, V> {
    out: Box<dyn StoreWriter>,
    codec: &'c dyn Codec<K, V>,
    buf: Vec<u8>,
    count: u64,
    sample: Vec<Vec<u8>>,
    sample_limit: usize,
}

impl<'c, K, V> SegmentWriter<'c, K, V> {
    pub fn append(&mut self, key: &K, value: &V) -> Result<()> {
        if self.count >= u32::MAX as u64 {
            return Err(Error::invalid_argument("Segment holds more records than fit the trailer"));
        }
        self.buf.clear();
        self.codec.encode(key, value, &mut self.buf)?;
        self.out.write_all(&self.buf)?;
        if self.sample.len() < self.sample_limit {
            self.sample.push(self.buf.clone());
        }
        self.count += 1;
        Ok(())
    }

    /// Writes the trailer and syncs the file.
    pub fn finish(mut self) -> Result<WriteSummary> {
        self.out.write_all(&(self.count as u32).to_be_bytes())?;
        self.out.sync()?;
        Ok(WriteSummary { count: self.count, sample: self.sample })
    }
}

/// Sequential reader over a segment file.
pub struct SegmentReader<K, V> {
    input: Take<Box<dyn ReadSeek>>,
    codec: SharedCodec<K, V>,
    range: KeyRange<K>,
    done: bool,
}

impl<K: Ord, V> Iterator for SegmentReader<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.codec.decode(&mut self.input) {
                Ok(Some((key, value))) => {
                    if self.range.is_before_start(&key) {
                        continue;
                    }
                    if self.range.is_past_end(&key) {
                        self.done = true;
                        return None;
                    }
                    return Some(Ok((key, value)));
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
