//! A spilling map bound to storage locations, with restart recovery.

use super::{SpillingMap, SpillingMapBuilder};
use crate::diagnostics::SpillEvent;
use crate::error::Result;
use crate::location::{parse_segment_name, SegmentFileFactory, SharedFactory, StorageLocation};
use crate::segment::{Segment, COUNT_SIZE};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A [`SpillingMap`] writing to a ranked list of [`StorageLocation`]s.
///
/// Opening the map registers every segment file already present in the
/// locations, so a map reopened over the same sub-paths sees the data a
/// previous instance persisted. Files are ranked oldest first by the
/// creation time in their names, whichever location holds them. Buffered entries that were never persisted
/// are not recovered.
///
/// All map operations are available through `Deref`; [`clear`](Self::clear)
/// additionally deletes unregistered segment files.
#[derive(Debug)]
pub struct LocationSpillingMap<K, V> {
    map: SpillingMap<K, V>,
    locations: Vec<Arc<StorageLocation>>,
}

impl<K: Ord + Clone, V: Clone> LocationSpillingMap<K, V> {
    /// Opens a map over `locations`, recovering their segment files.
    ///
    /// Factories configured on `builder` are replaced by the locations.
    pub fn open(builder: SpillingMapBuilder<K, V>, locations: Vec<Arc<StorageLocation>>) -> Result<Self> {
        let factories: Vec<SharedFactory> =
            locations.iter().map(|l| Arc::clone(l) as SharedFactory).collect();
        let mut map = builder.factories(factories).build()?;

        // Counters are per location; creation time orders files across them
        let mut found = Vec::new();
        for (rank, location) in locations.iter().enumerate() {
            for name in location.segment_files()? {
                if let Some((counter, millis)) = parse_segment_name(&name) {
                    location.restore_counter(counter);
                    found.push((millis, counter, rank, name));
                }
            }
        }
        found.sort();

        let mut recovered = vec![0usize; locations.len()];
        for (_, _, rank, name) in found {
            if recover_file(&mut map, &locations[rank], name)? {
                recovered[rank] += 1;
            }
        }
        for (location, files) in locations.iter().zip(recovered) {
            if files > 0 {
                map.sink.record(SpillEvent::Recovered { location: location.label(), files });
            }
        }

        // Recovered files may exceed the limit
        let max_open_files = map.options.max_open_files;
        map.compact(max_open_files)?;

        Ok(Self { map, locations })
    }
}

impl<K, V> LocationSpillingMap<K, V> {
    /// The locations, most preferred first.
    pub fn locations(&self) -> &[Arc<StorageLocation>] {
        &self.locations
    }

    /// Clears the map and deletes every segment file in every location.
    pub fn clear(&mut self) -> Result<()> {
        self.map.clear()?;
        for location in &self.locations {
            for name in location.segment_files()? {
                location.store().remove(&name)?;
            }
        }
        Ok(())
    }

    /// Unwraps the inner map.
    pub fn into_inner(self) -> SpillingMap<K, V> {
        self.map
    }
}

/// Registers one segment file; returns false if it was skipped.
fn recover_file<K: Ord + Clone, V: Clone>(
    map: &mut SpillingMap<K, V>,
    location: &StorageLocation,
    name: String,
) -> Result<bool> {
    let label = location.label();
    let file = location.existing_file(&name);
    let len = file.len()?;
    if len < COUNT_SIZE {
        map.sink.record(SpillEvent::RecoverySkipped {
            location: label,
            file: name,
            reason: format!("{} bytes is shorter than the record count trailer", len),
        });
        return Ok(false);
    }

    match Segment::from_file(Arc::new(file), Arc::clone(&map.codec), map.rewrite.clone()) {
        Ok(segment) => {
            log::info!("Recovered segment file {}/{}", label, name);
            map.add_persisted(segment)?;
            Ok(true)
        }
        Err(e) => {
            map.sink.record(SpillEvent::RecoverySkipped {
                location: label,
                file: name,
                reason: e.to_string(),
            });
            Ok(false)
        }
    }
}

impl<K, V> Deref for LocationSpillingMap<K, V> {
    type Target = SpillingMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl<K, V> DerefMut for LocationSpillingMap<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.map
    }
}
