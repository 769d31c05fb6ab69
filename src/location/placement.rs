//! Ranked placement with bounded retries.

use super::SharedFactory;
use crate::diagnostics::{EventSink, SpillEvent};
use crate::error::{Error, Result};
use crate::segment::SegmentFile;

/// Where a write ended up.
#[derive(Debug)]
pub enum Placement<T> {
    /// The write succeeded on the factory at `location`.
    Placed {
        /// Index into the factory list.
        location: usize,
        /// What the write produced.
        value: T,
    },
    /// Every factory was skipped or ran out of attempts.
    Exhausted {
        /// One entry per factory, `(label, last cause)`.
        causes: Vec<(String, String)>,
    },
}

impl<T> Placement<T> {
    /// Converts an exhausted placement into [`Error::Exhausted`].
    pub fn into_result(self, what: &str) -> Result<(usize, T)> {
        match self {
            Placement::Placed { location, value } => Ok((location, value)),
            Placement::Exhausted { causes } => Err(Error::Exhausted { what: what.to_string(), causes }),
        }
    }

    /// True if the write succeeded.
    pub fn is_placed(&self) -> bool {
        matches!(self, Placement::Placed { .. })
    }
}

/// Tries `write` against each factory in order.
///
/// Each factory gets up to `num_retries + 1` attempts, and its capacity check
/// runs before every one of them. A failed check skips the rest of that
/// factory's attempts; a passed check creates a new file for `write`. The
/// first success stops the walk. `write` is responsible for deleting the file
/// it was given when it fails.
pub fn place<T, F>(
    factories: &[SharedFactory],
    num_retries: usize,
    sink: &dyn EventSink,
    mut write: F,
) -> Placement<T>
where
    F: FnMut(SegmentFile) -> Result<T>,
{
    let mut causes = Vec::new();

    for (index, factory) in factories.iter().enumerate() {
        let label = factory.label();
        let mut last_cause = String::new();

        for attempt in 1..=num_retries + 1 {
            if let Err(e) = factory.check() {
                last_cause = e.to_string();
                sink.record(SpillEvent::LocationSkipped { location: label.clone(), reason: last_cause.clone() });
                break;
            }

            match factory.create_file().and_then(&mut write) {
                Ok(value) => return Placement::Placed { location: index, value },
                Err(e) => {
                    last_cause = e.to_string();
                    sink.record(SpillEvent::WriteFailed {
                        location: label.clone(),
                        attempt,
                        cause: last_cause.clone(),
                    });
                }
            }
        }
        causes.push((label, last_cause));
    }

    Placement::Exhausted { causes }
}
