//! Identity-keyed cache of read-only wrappers.

use crate::{node::Branch, view::Readonly};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

const MIN_PRUNE_THRESHOLD: usize = 64;

struct Entries {
    by_addr: HashMap<usize, Weak<Readonly>>,
    prune_at: usize,
}

/// Maps each wrapped [`Branch`] to its [`Readonly`] wrapper.
///
/// Entries are weak: the cache keeps neither the wrapper nor the wrapped
/// container alive. While someone holds a wrapper, wrapping the same branch
/// again returns that exact instance.
#[derive(Clone)]
pub struct WrapperCache {
    entries: Arc<Mutex<Entries>>,
}

impl WrapperCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                by_addr: HashMap::new(),
                prune_at: MIN_PRUNE_THRESHOLD,
            })),
        }
    }

    /// Returns the wrapper for `target`, creating and caching one if needed.
    #[must_use]
    pub fn wrap(&self, target: &Branch) -> Arc<Readonly> {
        let addr = target.addr();
        let mut entries = self.entries.lock();

        // A live wrapper keeps its container allocated, so the address
        // cannot have been reused by another branch.
        if let Some(existing) = entries.by_addr.get(&addr).and_then(Weak::upgrade) {
            if existing.target().ptr_eq(target) {
                return existing;
            }
        }

        if entries.by_addr.len() >= entries.prune_at {
            entries.by_addr.retain(|_, wrapper| wrapper.strong_count() > 0);
            entries.prune_at = (entries.by_addr.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }

        let wrapper = Arc::new(Readonly::new(target.clone(), self.clone()));
        entries.by_addr.insert(addr, Arc::downgrade(&wrapper));
        wrapper
    }

    /// Number of wrappers that are still alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.entries
            .lock()
            .by_addr
            .values()
            .filter(|wrapper| wrapper.strong_count() > 0)
            .count()
    }

    /// Returns `true` if both handles refer to the same cache.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl Default for WrapperCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WrapperCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperCache").field("live", &self.live()).finish()
    }
}
