//! Half-open key ranges used by bounded views.

use std::ops::Bound;

/// A key range `[from, to)`; a missing end is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange<K> {
    from: Option<K>,
    to: Option<K>,
}

impl<K> Default for KeyRange<K> {
    fn default() -> Self {
        Self::all()
    }
}

impl<K> KeyRange<K> {
    /// The unbounded range.
    pub fn all() -> Self {
        Self { from: None, to: None }
    }

    /// Builds a range from optional bounds.
    pub fn new(from: Option<K>, to: Option<K>) -> Self {
        Self { from, to }
    }

    /// Keys strictly below `to`.
    pub fn head(to: K) -> Self {
        Self { from: None, to: Some(to) }
    }

    /// Keys at or above `from`.
    pub fn tail(from: K) -> Self {
        Self { from: Some(from), to: None }
    }

    /// Inclusive lower bound.
    pub fn from(&self) -> Option<&K> {
        self.from.as_ref()
    }

    /// Exclusive upper bound.
    pub fn to(&self) -> Option<&K> {
        self.to.as_ref()
    }

    /// True if either end is set.
    pub fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Bounds in the form `BTreeMap::range` accepts.
    pub(crate) fn as_bounds(&self) -> (Bound<&K>, Bound<&K>) {
        let start = self.from.as_ref().map_or(Bound::Unbounded, Bound::Included);
        let end = self.to.as_ref().map_or(Bound::Unbounded, Bound::Excluded);
        (start, end)
    }
}

impl<K: Ord> KeyRange<K> {
    /// True if the range can contain no key.
    pub fn is_empty(&self) -> bool {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) => from >= to,
            _ => false,
        }
    }

    /// True if `key` lies below the lower bound.
    pub fn is_before_start(&self, key: &K) -> bool {
        self.from.as_ref().is_some_and(|from| key < from)
    }

    /// True if `key` lies at or above the upper bound.
    pub fn is_past_end(&self, key: &K) -> bool {
        self.to.as_ref().is_some_and(|to| key >= to)
    }

    /// True if `key` lies inside the range.
    pub fn contains(&self, key: &K) -> bool {
        !self.is_before_start(key) && !self.is_past_end(key)
    }
}

impl<K: Ord + Clone> KeyRange<K> {
    /// The overlap of two ranges: the later start and the earlier end.
    pub fn intersect(&self, other: &KeyRange<K>) -> KeyRange<K> {
        let from = match (&self.from, &other.from) {
            (Some(a), Some(b)) => Some(if a > b { a.clone() } else { b.clone() }),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b.clone(),
        };
        let to = match (&self.to, &other.to) {
            (Some(a), Some(b)) => Some(if a < b { a.clone() } else { b.clone() }),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b.clone(),
        };
        KeyRange { from, to }
    }
}
