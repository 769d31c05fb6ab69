//! # spillmap - An External Sorted-Map Engine
//!
//! spillmap provides sorted maps that keep a bounded number of entries in
//! memory and spill the rest to sorted segment files. Reads see one ordered
//! map, merged on the fly from the in-memory buffer and every segment file.
//!
//! ## Architecture
//!
//! The engine consists of several components:
//!
//! - **Codec**: Encodes one `(key, value)` record to bytes and back
//! - **FileStore**: A flat, capacity-aware file namespace (local disk or memory)
//! - **StorageLocation**: A store with free-space thresholds and unique file naming
//! - **Segment**: One sorted run, in memory or in a segment file
//! - **MultiSegmentView**: Many segments read as one map via a k-way merge
//! - **SpillingMap**: Buffers writes, persists at a threshold, compacts segments
//! - **LocationSpillingMap**: A spilling map that recovers its files on reopen
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use spillmap::{BincodeCodec, LocationOptions, SpillOptions, SpillingMap, StorageLocation};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), spillmap::Error> {
//! let location = StorageLocation::local("/tmp/spill", LocationOptions::default())?;
//! let mut map = SpillingMap::builder(Arc::new(BincodeCodec::<u64, String>::new()))
//!     .options(SpillOptions::new().buffer_persist_threshold(10_000))
//!     .factory(Arc::new(location))
//!     .build()?;
//!
//! for i in 0..100_000u64 {
//!     map.put(i, format!("value-{}", i))?;
//! }
//!
//! if let Some(value) = map.get(&42)? {
//!     println!("Found: {}", value);
//! }
//!
//! for entry in map.iter()? {
//!     let (key, value) = entry?;
//!     println!("{} => {}", key, value);
//! }
//!
//! map.clear()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod location;
pub mod rewrite;
pub mod segment;
pub mod spill;
pub mod store;
pub mod view;

// Re-exports
pub use codec::{BincodeCodec, Codec, RawCodec, SharedCodec};
pub use config::{LocationOptions, PersistOptions, SpillOptions};
pub use diagnostics::{CollectingSink, EventSink, LogSink, SharedSink, SpillEvent};
pub use error::{Error, Result};
pub use location::{place, Placement, SegmentFileFactory, SharedFactory, StorageLocation};
pub use rewrite::{
    KeepExisting, KeepGreatest, LastWriteWins, RewriteFn, RewriteStrategy, SharedRewrite,
};
pub use segment::{KeyRange, Segment, SegmentFile, SegmentIter, SegmentStatus};
pub use spill::{LocationSpillingMap, SpillingMap, SpillingMapBuilder};
pub use store::{Capacity, FileStore, LocalStore, MemoryStore, SharedStore, StoreWriter};
pub use view::{MergeIter, MultiSegmentView};
