//! In-memory store for tests and ephemeral maps.

use super::{Capacity, FileStore, ReadSeek, StoreWriter};
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::Arc;

/// Default total size of a memory store (1 GiB).
pub const DEFAULT_MEMORY_CAPACITY: u64 = 1024 * 1024 * 1024;

#[derive(Debug)]
struct Inner {
    files: BTreeMap<String, Bytes>,
    total_bytes: u64,
    reported: Option<Capacity>,
    fail_creates: usize,
    fail_writes: usize,
    truncate_writes: bool,
    creates: usize,
    syncs: usize,
}

impl Inner {
    fn used(&self) -> u64 {
        self.files.values().map(|f| f.len() as u64).sum()
    }
}

/// A store that keeps files in memory.
///
/// Cloning a `MemoryStore` yields another handle to the same files, which
/// lets a test "restart" a map over the data of a previous instance.
///
/// Faults can be injected to exercise retry and fallback paths:
/// - [`fail_next_creates`](Self::fail_next_creates): `create` returns an error
/// - [`fail_next_writes`](Self::fail_next_writes): the writer errors on first write
/// - [`set_truncate_writes`](Self::set_truncate_writes): committed files lose their last byte
/// - [`report_capacity`](Self::report_capacity): override the capacity query
#[derive(Debug, Clone)]
pub struct MemoryStore {
    label: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store with the default capacity.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_capacity(label, DEFAULT_MEMORY_CAPACITY)
    }

    /// Creates an empty store holding at most `total_bytes`.
    pub fn with_capacity(label: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            label: label.into(),
            inner: Arc::new(Mutex::new(Inner {
                files: BTreeMap::new(),
                total_bytes,
                reported: None,
                fail_creates: 0,
                fail_writes: 0,
                truncate_writes: false,
                creates: 0,
                syncs: 0,
            })),
        }
    }

    /// Makes the next `n` calls to `create` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.inner.lock().fail_creates = n;
    }

    /// Makes the writers returned by the next `n` calls to `create` fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.lock().fail_writes = n;
    }

    /// When enabled, every committed file is missing its final byte.
    pub fn set_truncate_writes(&self, enabled: bool) {
        self.inner.lock().truncate_writes = enabled;
    }

    /// Overrides the capacity reported by [`FileStore::capacity`].
    pub fn report_capacity(&self, capacity: Option<Capacity>) {
        self.inner.lock().reported = capacity;
    }

    /// Number of successful `create` calls so far.
    pub fn create_count(&self) -> usize {
        self.inner.lock().creates
    }

    /// Number of successful writer syncs so far.
    pub fn sync_count(&self) -> usize {
        self.inner.lock().syncs
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.inner.lock().files.len()
    }

    /// Returns a copy of a file's contents.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.lock().files.get(name).map(|b| b.to_vec())
    }

    /// Replaces a file's contents directly.
    pub fn put_file(&self, name: &str, data: Vec<u8>) {
        self.inner.lock().files.insert(name.to_string(), Bytes::from(data));
    }
}

impl FileStore for MemoryStore {
    fn label(&self) -> String {
        format!("mem:{}", self.label)
    }

    fn open(&self, name: &str) -> Result<Box<dyn ReadSeek>> {
        let inner = self.inner.lock();
        let data = inner.files.get(name).cloned().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", name)))
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn create(&self, name: &str) -> Result<Box<dyn StoreWriter>> {
        let mut inner = self.inner.lock();
        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "injected create failure")));
        }
        let fail = inner.fail_writes > 0;
        if fail {
            inner.fail_writes -= 1;
        }
        inner.creates += 1;
        inner.files.insert(name.to_string(), Bytes::new());

        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            buf: Vec::new(),
            fail,
            dirty: false,
        }))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.inner.lock().files.remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().files.keys().cloned().collect())
    }

    fn file_len(&self, name: &str) -> Result<u64> {
        let inner = self.inner.lock();
        inner.files.get(name).map(|f| f.len() as u64).ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", name)))
        })
    }

    fn capacity(&self) -> Result<Capacity> {
        let inner = self.inner.lock();
        if let Some(reported) = inner.reported {
            return Ok(reported);
        }
        Ok(Capacity {
            free_bytes: inner.total_bytes.saturating_sub(inner.used()),
            total_bytes: inner.total_bytes,
        })
    }
}

/// Buffers writes and commits them to the store on flush and on drop.
struct MemoryWriter {
    inner: Arc<Mutex<Inner>>,
    name: String,
    buf: Vec<u8>,
    fail: bool,
    dirty: bool,
}

impl MemoryWriter {
    fn commit(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock();
        let existing = inner.files.get(&self.name).map_or(0, |f| f.len() as u64);
        let used = inner.used() - existing;
        if used + self.buf.len() as u64 > inner.total_bytes {
            return Err(io::Error::new(io::ErrorKind::Other, "memory store is full"));
        }

        let mut data = self.buf.clone();
        if inner.truncate_writes {
            data.pop();
        }
        inner.files.insert(self.name.clone(), Bytes::from(data));
        self.dirty = false;
        Ok(())
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        self.buf.extend_from_slice(data);
        self.dirty = true;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        self.commit()
    }
}

impl StoreWriter for MemoryWriter {
    fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.inner.lock().syncs += 1;
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        // Best effort commit on drop
        if self.dirty && !self.fail {
            let _ = self.commit();
        }
    }
}
