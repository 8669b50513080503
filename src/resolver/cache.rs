//! Symbol Ownership Cache
//!
//! Positive entries map an entry path to the key of the module that
//! provided it. Negative entries remember entry paths no enabled module
//! provides.
//!
//! # Design
//!
//! - Positive reads are lock-free via DashMap
//! - Every write and every invalidation takes the single mutation lock
//! - Negative entries live in a bounded LRU under the same lock
//! - Invalidations bump a generation counter; a write computed under an
//!   older generation is dropped

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;

use crate::modules::ModKey;

/// Generation observed at the start of a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Generation(u64);

struct Guarded {
    misses: LruCache<String, ()>,
}

pub(crate) struct SymbolCache {
    owners: DashMap<String, ModKey>,
    guarded: Mutex<Guarded>,
    /// Only incremented while `guarded` is held.
    generation: AtomicU64,
}

impl SymbolCache {
    pub(crate) fn new(miss_capacity: NonZeroUsize) -> Self {
        Self {
            owners: DashMap::new(),
            guarded: Mutex::new(Guarded {
                misses: LruCache::new(miss_capacity),
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    pub(crate) fn owner(&self, entry: &str) -> Option<ModKey> {
        self.owners.get(entry).map(|owner| owner.value().clone())
    }

    pub(crate) fn is_miss(&self, entry: &str) -> bool {
        self.guarded.lock().misses.contains(entry)
    }

    /// Record `entry -> owner` unless an invalidation happened since `seen`.
    pub(crate) fn record_owner(&self, entry: &str, owner: &ModKey, seen: Generation) -> bool {
        let _guard = self.guarded.lock();
        if self.generation() != seen {
            return false;
        }
        self.owners.insert(entry.to_string(), owner.clone());
        true
    }

    /// Record a miss unless an invalidation happened since `seen`.
    pub(crate) fn record_miss(&self, entry: &str, seen: Generation) -> bool {
        let mut guard = self.guarded.lock();
        if self.generation() != seen {
            return false;
        }
        guard.misses.put(entry.to_string(), ());
        true
    }

    /// Drop every positive entry owned by `owner` and every miss.
    pub(crate) fn purge_owner(&self, owner: &ModKey) -> usize {
        let mut guard = self.guarded.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = self.owners.len();
        self.owners.retain(|_, cached| cached != owner);
        guard.misses.clear();
        before - self.owners.len()
    }

    /// Drop every miss.
    pub(crate) fn clear_misses(&self) {
        let mut guard = self.guarded.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        guard.misses.clear();
    }

    pub(crate) fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub(crate) fn miss_count(&self) -> usize {
        self.guarded.lock().misses.len()
    }
}

impl std::fmt::Debug for SymbolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolCache")
            .field("owners", &self.owner_count())
            .field("misses", &self.miss_count())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
