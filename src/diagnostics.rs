//! Structured diagnostics for spill, compaction, and recovery.
//!
//! Every map and storage location is handed an [`EventSink`] when it is
//! built. The default [`LogSink`] forwards events to the `log` facade;
//! [`CollectingSink`] keeps them in memory so callers (and tests) can inspect
//! which location was used or skipped.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An event emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SpillEvent {
    /// A storage location was not used because it failed validation.
    LocationSkipped {
        /// Location label.
        location: String,
        /// Why it was skipped.
        reason: String,
    },
    /// A write attempt against a location failed.
    WriteFailed {
        /// Location label.
        location: String,
        /// Attempt number, starting at 1.
        attempt: usize,
        /// Error description.
        cause: String,
    },
    /// A buffer was written to a segment file.
    Persisted {
        /// Location label.
        location: String,
        /// Segment file name.
        file: String,
        /// Number of records written.
        entries: u64,
        /// Wall time spent.
        elapsed: Duration,
    },
    /// Several segments were merged into one.
    Compacted {
        /// Number of input segments.
        inputs: usize,
        /// Output segment file name.
        file: String,
        /// Number of records written.
        entries: u64,
        /// Wall time spent.
        elapsed: Duration,
    },
    /// Segment files from a previous run were registered.
    Recovered {
        /// Location label.
        location: String,
        /// Number of segment files found.
        files: usize,
    },
    /// A segment file could not be recovered and was ignored.
    RecoverySkipped {
        /// Location label.
        location: String,
        /// Segment file name.
        file: String,
        /// Why it was ignored.
        reason: String,
    },
}

impl fmt::Display for SpillEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpillEvent::LocationSkipped { location, reason } => {
                write!(f, "skipping location {}: {}", location, reason)
            }
            SpillEvent::WriteFailed { location, attempt, cause } => {
                write!(f, "write attempt {} on {} failed: {}", attempt, location, cause)
            }
            SpillEvent::Persisted { location, file, entries, elapsed } => write!(
                f,
                "persisted {} entries to {}/{} in {}ms",
                entries,
                location,
                file,
                elapsed.as_millis()
            ),
            SpillEvent::Compacted { inputs, file, entries, elapsed } => write!(
                f,
                "compacted {} segments into {} ({} entries) in {}ms",
                inputs,
                file,
                entries,
                elapsed.as_millis()
            ),
            SpillEvent::Recovered { location, files } => {
                write!(f, "recovered {} segment files from {}", files, location)
            }
            SpillEvent::RecoverySkipped { location, file, reason } => {
                write!(f, "ignoring segment file {}/{}: {}", location, file, reason)
            }
        }
    }
}

/// Receives engine events.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: SpillEvent);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn EventSink>;

/// Forwards events to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: SpillEvent) {
        match &event {
            SpillEvent::LocationSkipped { .. } | SpillEvent::WriteFailed { .. } => {
                log::warn!("{}", event)
            }
            SpillEvent::RecoverySkipped { .. } => log::warn!("{}", event),
            SpillEvent::Compacted { .. } | SpillEvent::Recovered { .. } => log::info!("{}", event),
            SpillEvent::Persisted { .. } => log::debug!("{}", event),
        }
    }
}

/// The sink used when none is supplied.
pub fn default_sink() -> SharedSink {
    Arc::new(LogSink)
}

/// Keeps every event in memory, and also forwards it to the `log` crate.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SpillEvent>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<SpillEvent> {
        self.events.lock().clone()
    }

    /// Counts recorded events matching a predicate.
    pub fn count(&self, predicate: impl Fn(&SpillEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CollectingSink {
    fn record(&self, event: SpillEvent) {
        LogSink.record(event.clone());
        self.events.lock().push(event);
    }
}
