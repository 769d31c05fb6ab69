//! Policies for choosing between two values seen for the same key.

use std::fmt;
use std::sync::Arc;

/// Decides whether a newly observed value replaces the one already held for
/// a key.
///
/// The strategy is consulted by [`Segment::put`](crate::Segment::put), when
/// [`get`](crate::MultiSegmentView::get)/[`remove`](crate::SpillingMap::remove)
/// combine hits from several segments, and when the merge iterator collapses
/// duplicate keys. Without a strategy the candidate always wins.
pub trait RewriteStrategy<K, V>: Send + Sync {
    /// Returns true if `candidate` should replace `existing`.
    fn rewrite(&self, key: &K, existing: &V, candidate: &V) -> bool;

    /// Identifies the implementation type.
    ///
    /// A [`MultiSegmentView`](crate::MultiSegmentView) only accepts children
    /// whose strategies report the same kind. Two differently configured
    /// instances of one type are not told apart.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a strategy.
pub type SharedRewrite<K, V> = Arc<dyn RewriteStrategy<K, V>>;

/// The newest value always wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl<K, V> RewriteStrategy<K, V> for LastWriteWins {
    fn rewrite(&self, _key: &K, _existing: &V, _candidate: &V) -> bool {
        true
    }
}

/// The first value seen for a key is kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepExisting;

impl<K, V> RewriteStrategy<K, V> for KeepExisting {
    fn rewrite(&self, _key: &K, _existing: &V, _candidate: &V) -> bool {
        false
    }
}

/// Keeps the larger value under `V: Ord`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepGreatest;

impl<K, V: Ord> RewriteStrategy<K, V> for KeepGreatest {
    fn rewrite(&self, _key: &K, existing: &V, candidate: &V) -> bool {
        candidate > existing
    }
}

/// Adapts a closure into a strategy.
pub struct RewriteFn<F>(pub F);

impl<F> fmt::Debug for RewriteFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RewriteFn")
    }
}

impl<K, V, F> RewriteStrategy<K, V> for RewriteFn<F>
where
    F: Fn(&K, &V, &V) -> bool + Send + Sync + 'static,
{
    fn rewrite(&self, key: &K, existing: &V, candidate: &V) -> bool {
        (self.0)(key, existing, candidate)
    }
}

/// Applies an optional strategy: true if `candidate` should replace `existing`.
pub(crate) fn should_replace<K, V>(
    strategy: Option<&SharedRewrite<K, V>>,
    key: &K,
    existing: &V,
    candidate: &V,
) -> bool {
    strategy.map_or(true, |s| s.rewrite(key, existing, candidate))
}

/// Folds `candidate` into `current` following the strategy.
pub(crate) fn combine<K, V>(
    strategy: Option<&SharedRewrite<K, V>>,
    key: &K,
    current: Option<V>,
    candidate: V,
) -> Option<V> {
    match current {
        None => Some(candidate),
        Some(existing) => {
            if should_replace(strategy, key, &existing, &candidate) {
                Some(candidate)
            } else {
                Some(existing)
            }
        }
    }
}

/// The kind of an optional strategy, `None` meaning "no strategy".
pub(crate) fn kind_of<K, V>(strategy: Option<&SharedRewrite<K, V>>) -> Option<&'static str> {
    strategy.map(|s| s.kind())
}
