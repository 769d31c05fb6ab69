//! Storage locations and segment file placement.
//!
//! A [`SegmentFileFactory`] hands out new, uniquely named segment files in one
//! store, after checking that the store still has room. Maps hold a ranked
//! list of factories; [`place`] walks that list with a bounded number of
//! attempts per factory and reports where a write landed.

mod placement;

pub use self::placement::{place, Placement};

use crate::config::LocationOptions;
use crate::error::{Error, Result};
use crate::segment::SegmentFile;
use crate::store::{LocalStore, SharedStore};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// File name extension of segment files.
pub const SEGMENT_EXTENSION: &str = "seg";

/// Creates segment files in one store.
pub trait SegmentFileFactory: fmt::Debug + Send + Sync {
    /// A short label for diagnostics.
    fn label(&self) -> String;

    /// Checks that a new file may be created here.
    ///
    /// An error describes why the factory should be skipped; it is not
    /// propagated to the caller of `persist`.
    fn check(&self) -> Result<()>;

    /// True if [`check`](Self::check) passes.
    fn is_valid(&self) -> bool {
        self.check().is_ok()
    }

    /// Returns a handle to a new, not yet written, segment file.
    fn create_file(&self) -> Result<SegmentFile>;
}

/// Shared handle to a factory.
pub type SharedFactory = Arc<dyn SegmentFileFactory>;

/// A capacity-checked store with a per-location file counter.
///
/// File names are `{counter:06}-{unix_millis}.seg`. The counter only grows,
/// and [`restore_counter`](Self::restore_counter) moves it past files left
/// behind by an earlier run.
pub struct StorageLocation {
    store: SharedStore,
    options: LocationOptions,
    counter: AtomicU64,
}

impl fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLocation")
            .field("store", &self.store.label())
            .field("min_free_bytes", &self.options.min_free_bytes)
            .field("min_free_percent", &self.options.min_free_percent)
            .field("counter", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageLocation {
    /// Creates a location over an existing store.
    pub fn new(store: SharedStore, options: LocationOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { store, options, counter: AtomicU64::new(0) })
    }

    /// Creates a location in `base/sub_path` on the local filesystem.
    pub fn local<P: AsRef<Path>>(base: P, options: LocationOptions) -> Result<Self> {
        options.validate()?;
        let store = LocalStore::with_sub_path(base, &options.sub_path)?;
        Self::new(Arc::new(store), options)
    }

    /// The underlying store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// This location's options.
    pub fn options(&self) -> &LocationOptions {
        &self.options
    }

    /// The counter value the next file will use.
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Moves the counter past `seen` if it is not already.
    pub fn restore_counter(&self, seen: u64) {
        self.counter.fetch_max(seen.saturating_add(1), Ordering::SeqCst);
    }

    fn next_file_name(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis());
        format!("{:06}-{}.{}", counter, millis, SEGMENT_EXTENSION)
    }

    /// Names of the segment files in this location, ordered by counter.
    pub fn segment_files(&self) -> Result<Vec<String>> {
        let mut files: Vec<(u64, String)> = self
            .store
            .list()?
            .into_iter()
            .filter_map(|name| parse_segment_name(&name).map(|(counter, _)| (counter, name)))
            .collect();
        files.sort();
        Ok(files.into_iter().map(|(_, name)| name).collect())
    }

    /// Wraps an existing file of this location.
    pub fn existing_file(&self, name: &str) -> SegmentFile {
        SegmentFile::new(Arc::clone(&self.store), name, self.options.persist.clone())
    }
}

impl SegmentFileFactory for StorageLocation {
    fn label(&self) -> String {
        self.store.label()
    }

    fn check(&self) -> Result<()> {
        let capacity = self.store.capacity()?;
        if capacity.free_bytes < self.options.min_free_bytes {
            return Err(Error::invalid_state(format!(
                "{} bytes free, {} required",
                capacity.free_bytes, self.options.min_free_bytes
            )));
        }
        let percent = capacity.free_percent();
        if percent < self.options.min_free_percent {
            return Err(Error::invalid_state(format!(
                "{:.1}% free, {:.1}% required",
                percent, self.options.min_free_percent
            )));
        }
        Ok(())
    }

    fn create_file(&self) -> Result<SegmentFile> {
        Ok(SegmentFile::new(Arc::clone(&self.store), self.next_file_name(), self.options.persist.clone()))
    }
}

/// Extracts `(counter, unix_millis)` from a segment file name.
///
/// Returns `None` for names that are not segment files.
pub fn parse_segment_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    let (counter, millis) = stem.split_once('-')?;
    if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((counter.parse().ok()?, millis.parse().ok()?))
}
