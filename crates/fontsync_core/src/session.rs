//! Connected-client sessions.
//!
//! A session is one connected editor client: a push sink to its
//! transport plus two subscription patterns, one for live (drag
//! feedback) changes, one for final changes. Sessions only ever talk
//! to the document through the handler.

use async_trait::async_trait;
use fontsync_change::{Change, Pattern};
use parking_lot::RwLock;
use std::sync::Arc;

/// Server-to-client push surface of one connection.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Delivers a change made by another session (or synthesized from
    /// an external modification). `is_live_change` marks non-persisted
    /// drag feedback.
    async fn external_change(&self, change: &Change, is_live_change: bool);

    /// Asks the client to reload data in scope. `None` means reload
    /// everything.
    async fn reload_data(&self, pattern: Option<&Pattern>);

    /// Tells the client its own edit was reverted, with a reason and
    /// the scope it must reload to re-render the reverted state.
    async fn edit_reverted(&self, message: &str, reload_pattern: &Pattern);
}

/// One connected client and its subscription state.
pub struct Session {
    id: u64,
    sink: Arc<dyn SessionSink>,
    live_pattern: RwLock<Pattern>,
    final_pattern: RwLock<Pattern>,
}

impl Session {
    pub(crate) fn new(id: u64, sink: Arc<dyn SessionSink>) -> Self {
        Self {
            id,
            sink,
            live_pattern: RwLock::new(Pattern::new()),
            final_pattern: RwLock::new(Pattern::new()),
        }
    }

    /// This session's identifier, unique within its handler.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The push sink for this session.
    pub fn sink(&self) -> Arc<dyn SessionSink> {
        Arc::clone(&self.sink)
    }

    /// Adds `pattern` to this session's subscriptions.
    pub fn subscribe(&self, pattern: &Pattern, want_live_changes: bool) {
        let slot = if want_live_changes {
            &self.live_pattern
        } else {
            &self.final_pattern
        };
        let mut current = slot.write();
        *current = current.union(pattern);
    }

    /// Removes `pattern` from this session's subscriptions.
    pub fn unsubscribe(&self, pattern: &Pattern, want_live_changes: bool) {
        let slot = if want_live_changes {
            &self.live_pattern
        } else {
            &self.final_pattern
        };
        let mut current = slot.write();
        *current = current.difference(pattern);
    }

    /// The live-changes subscription pattern.
    pub fn live_pattern(&self) -> Pattern {
        self.live_pattern.read().clone()
    }

    /// The final-changes subscription pattern.
    pub fn final_pattern(&self) -> Pattern {
        self.final_pattern.read().clone()
    }

    /// True if `change` should be pushed to this session.
    ///
    /// Final changes go to both live and final subscribers; live
    /// changes only to live subscribers.
    pub fn wants_change(&self, change: &Change, is_live_change: bool) -> bool {
        if self.live_pattern.read().matches_change(change) {
            return true;
        }
        !is_live_change && self.final_pattern.read().matches_change(change)
    }

    /// The union of both subscription patterns.
    pub fn subscribed_pattern(&self) -> Pattern {
        self.live_pattern.read().union(&self.final_pattern.read())
    }
}
