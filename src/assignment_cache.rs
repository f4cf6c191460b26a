//! Deduplication of assignment log events.
use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use crate::Str;

/// Identity of a logged assignment. A subject seeing the same variation of the same allocation
/// again produces an equal key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AssignmentCacheKey {
    pub subject_key: Str,
    pub flag_key: Str,
    pub allocation_key: Option<Str>,
    pub variation_key: Option<Str>,
}

impl AssignmentCacheKey {
    /// Keys with an absent or empty allocation or variation can't be told apart reliably, so they
    /// are never deduplicated.
    fn is_cacheable(&self) -> bool {
        let present = |key: &Option<Str>| key.as_ref().is_some_and(|k| !k.is_empty());
        present(&self.allocation_key) && present(&self.variation_key)
    }
}

/// Decides whether an assignment should be passed on to the
/// [`AssignmentLogger`](crate::AssignmentLogger).
pub trait AssignmentCache {
    /// Return `true` if the assignment identified by `key` has not been logged before. Must be
    /// atomic: concurrent calls with the same key return `true` exactly once.
    fn should_log(&self, key: &AssignmentCacheKey) -> bool;
}

/// Unbounded in-memory [`AssignmentCache`].
#[derive(Debug, Default)]
pub struct InMemoryAssignmentCache {
    seen: Mutex<HashSet<AssignmentCacheKey>>,
}

impl InMemoryAssignmentCache {
    #[allow(missing_docs)]
    pub fn new() -> InMemoryAssignmentCache {
        InMemoryAssignmentCache::default()
    }
}

impl AssignmentCache for InMemoryAssignmentCache {
    fn should_log(&self, key: &AssignmentCacheKey) -> bool {
        if !key.is_cacheable() {
            return true;
        }
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone())
    }
}

/// [`AssignmentCache`] that lets every assignment through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAssignmentCache;

impl AssignmentCache for NoopAssignmentCache {
    fn should_log(&self, _key: &AssignmentCacheKey) -> bool {
        true
    }
}
