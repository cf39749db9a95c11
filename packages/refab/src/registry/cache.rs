//! Scoped in-memory cache for registry responses.
//!
//! The coordinator pushes a scope before each target and pops it after,
//! so metadata fetched while working one target does not accumulate
//! across a whole batch. Entries recorded in a scope are evicted when
//! that scope pops; entries from enclosing scopes survive.

use std::sync::Mutex;

use dashmap::DashMap;

/// Hierarchical response cache keyed by URL.
#[derive(Debug, Default)]
pub struct ScopedCache {
    entries: DashMap<String, CacheEntry>,
    depth: Mutex<usize>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    depth: usize,
    bytes: Vec<u8>,
}

impl ScopedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.entries.get(url).map(|entry| entry.bytes.clone())
    }

    pub fn put(&self, url: &str, bytes: Vec<u8>) {
        let depth = *self.depth.lock().expect("cache depth lock");
        self.entries
            .insert(url.to_string(), CacheEntry { depth, bytes });
    }

    /// Enter a new scope; entries recorded from here on are evicted by the
    /// matching [`ScopedCache::pop_scope`].
    pub fn push_scope(&self) {
        *self.depth.lock().expect("cache depth lock") += 1;
    }

    /// Leave the current scope, evicting everything it recorded.
    pub fn pop_scope(&self) {
        let mut depth = self.depth.lock().expect("cache depth lock");
        let current = *depth;
        self.entries.retain(|_, entry| entry.depth < current);
        *depth = current.saturating_sub(1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
