//! The write-back queue.
//!
//! Accepted edits update the cache immediately; persistence happens
//! asynchronously through this queue. It holds at most one pending
//! write action per key: re-scheduling a key replaces the pending
//! action, because the cache already reflects the latest value
//! (last-writer-wins at the write-back layer). Entries drain one at a
//! time, in insertion order.

use crate::cache::CacheKey;
use fontsync_backend::BackendResult;
use fontsync_change::Pattern;
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;

/// A deferred backend write, ready to be awaited by the drain loop.
pub type WriteAction = Pin<Box<dyn Future<Output = BackendResult<()>> + Send>>;

/// One scheduled write.
pub struct PendingWrite {
    /// The backend call to perform.
    pub action: WriteAction,
    /// Session that caused the write, for revert notifications.
    pub session_id: Option<u64>,
    /// What the originating client must reload if the write fails.
    pub reload_pattern: Pattern,
}

impl std::fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWrite")
            .field("session_id", &self.session_id)
            .field("reload_pattern", &self.reload_pattern)
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered pending writes, at most one per key.
#[derive(Debug, Default)]
pub struct WriteQueue {
    entries: IndexMap<CacheKey, PendingWrite>,
}

impl WriteQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending writes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if a write is pending for `key`.
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Schedules a write, superseding any pending write for `key`.
    ///
    /// A superseded entry keeps its place in the drain order.
    pub fn schedule(&mut self, key: CacheKey, write: PendingWrite) {
        self.entries.insert(key, write);
    }

    /// Removes and returns the oldest pending write.
    pub fn pop_front(&mut self) -> Option<(CacheKey, PendingWrite)> {
        self.entries.shift_remove_index(0)
    }
}
