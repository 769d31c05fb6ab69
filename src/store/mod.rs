//! Storage backends for segment files.
//!
//! A [`FileStore`] is a flat namespace of files plus a capacity query. The
//! engine never interprets a store's layout beyond file names; scoping files
//! to one map instance is done by creating the store on a dedicated sub-path.
//!
//! # Implementors
//!
//! - [`LocalStore`] - a directory on the local filesystem
//! - [`MemoryStore`] - in-process, with fault injection for tests

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::error::Result;
use std::fmt;
use std::io::{Read, Seek, Write};
use std::sync::Arc;

/// A readable, seekable file handle.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// A file handle being written.
pub trait StoreWriter: Write + Send {
    /// Flushes buffered data and makes it durable.
    fn sync(&mut self) -> Result<()>;
}

/// Free and total space reported by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    /// Bytes available for new files.
    pub free_bytes: u64,
    /// Total bytes of the underlying device.
    pub total_bytes: u64,
}

impl Capacity {
    /// Free space as a percentage of the total (0 when the total is unknown).
    pub fn free_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.free_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

/// A capacity-aware flat file store.
pub trait FileStore: fmt::Debug + Send + Sync {
    /// A short label for diagnostics.
    fn label(&self) -> String;

    /// Opens an existing file for reading.
    fn open(&self, name: &str) -> Result<Box<dyn ReadSeek>>;

    /// Creates (or truncates) a file for writing.
    ///
    /// Written data must be visible to [`open`](Self::open) once the writer
    /// has been flushed, and must survive a crash once it has been synced.
    fn create(&self, name: &str) -> Result<Box<dyn StoreWriter>>;

    /// Deletes a file. Deleting a missing file is not an error.
    fn remove(&self, name: &str) -> Result<()>;

    /// Lists file names in the store.
    fn list(&self) -> Result<Vec<String>>;

    /// Returns the length of a file in bytes.
    fn file_len(&self, name: &str) -> Result<u64>;

    /// Returns the store's current capacity.
    fn capacity(&self) -> Result<Capacity>;
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn FileStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_percent() {
        let cap = Capacity { free_bytes: 25, total_bytes: 100 };
        assert_eq!(cap.free_percent(), 25.0);

        let unknown = Capacity { free_bytes: 25, total_bytes: 0 };
        assert_eq!(unknown.free_percent(), 0.0);
    }
}
