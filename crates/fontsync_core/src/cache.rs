//! The authoritative in-process cache.
//!
//! A bounded, access-ordered key/value store. Entries are either
//! absent (must be fetched) or equal to the last value known to have
//! been durably written or externally confirmed; the orchestrator is
//! responsible for keeping that invariant during in-flight writes.

use indexmap::IndexMap;
use std::fmt;
use std::hash::Hash;

/// Key space shared by the cache and the write queue: a simple font
/// field, or one glyph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    /// A top-level font field such as `axes` or `unitsPerEm`.
    Field(String),
    /// One glyph, by name.
    Glyph(String),
}

impl CacheKey {
    /// Creates a field key.
    pub fn field(name: impl Into<String>) -> Self {
        CacheKey::Field(name.into())
    }

    /// Creates a glyph key.
    pub fn glyph(name: impl Into<String>) -> Self {
        CacheKey::Glyph(name.into())
    }

    /// The top-level font field this key belongs to.
    pub fn root_field(&self) -> &str {
        match self {
            CacheKey::Field(name) => name,
            CacheKey::Glyph(_) => "glyphs",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Field(name) => write!(f, "{name}"),
            CacheKey::Glyph(name) => write!(f, "glyphs/{name}"),
        }
    }
}

/// A bounded key/value store with least-recently-used eviction.
///
/// `get` and `insert` promote the key to most-recently-used; exceeding
/// the capacity evicts the least-recently-used entry. There is no
/// eviction callback: callers that attach resources to cached values
/// must clean those up themselves.
#[derive(Debug)]
pub struct LruCache<K, V> {
    entries: IndexMap<K, V>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// A zero capacity is treated as one entry.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if `key` is cached. Does not promote.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the cached value and promotes the key.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get(key)
    }

    /// Returns the cached value without promoting the key.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Inserts or replaces a value, promoting the key. Evicts the
    /// least-recently-used entry when over capacity.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.entries.shift_remove(&key);
        self.entries.insert(key, value);
        if self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
        previous
    }

    /// Removes one entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates the cached keys, least-recently-used first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}
