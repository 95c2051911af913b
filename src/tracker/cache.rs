//! Foreign-object cache spanning several imports into one tracker.

use std::collections::HashMap;

use log::trace;

use crate::{
    object::{NodeId, ObjectRef, Value},
    tracker::Tracker,
};

/// Identity of a foreign item that has been imported.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ForeignKey {
    /// A foreign immutable node
    Node(NodeId),
    /// A foreign indirect object
    Reference(ObjectRef),
}

/// What a foreign item became locally.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// The local value standing for the foreign item
    pub local: Value,
    /// The local reference, when the item was an indirect object
    pub reference: Option<ObjectRef>,
}

/// Maps foreign identities to their local counterparts.
#[derive(Debug, Default)]
pub struct ForeignCache {
    entries: HashMap<ForeignKey, CacheEntry>,
}

impl ForeignCache {
    /// Creates an empty cache
    #[must_use]
    pub fn new() -> Self {
        ForeignCache::default()
    }

    /// Number of cached items
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The local counterpart of `key`, without validation
    #[must_use]
    pub fn get(&self, key: &ForeignKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn insert(&mut self, key: ForeignKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub(crate) fn remove(&mut self, key: &ForeignKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Forgets everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Tracker {
    /// Starts deduplicating imports: until [`Tracker::disable_cache`], every foreign
    /// reference or frozen node brought in by adoption or copy maps to the same local item.
    pub fn enable_cache(&mut self) {
        if self.cache.is_none() {
            self.cache = Some(ForeignCache::new());
        }
    }

    /// Stops deduplicating imports and drops the cache
    pub fn disable_cache(&mut self) {
        self.cache = None;
    }

    /// The active cache, if any
    #[must_use]
    pub fn cache(&self) -> Option<&ForeignCache> {
        self.cache.as_ref()
    }

    /// Looks `key` up, evicting the entry if its local counterpart no longer exists
    pub(crate) fn cache_lookup(&mut self, key: ForeignKey) -> Option<CacheEntry> {
        let entry = self.cache.as_ref()?.get(&key)?.clone();
        let valid = match (&entry.local, entry.reference) {
            (_, Some(reference)) => self.table.contains_key(&reference.id),
            (Value::Node(node), None) => self.arena.contains(*node),
            _ => true,
        };
        if valid {
            return Some(entry);
        }
        trace!("evicting stale cache entry for {:?}", key);
        if let Some(cache) = self.cache.as_mut() {
            cache.remove(&key);
        }
        None
    }

    pub(crate) fn cache_commit(&mut self, entries: Vec<(ForeignKey, CacheEntry)>) {
        if let Some(cache) = self.cache.as_mut() {
            for (key, entry) in entries {
                cache.insert(key, entry);
            }
        }
    }
}
