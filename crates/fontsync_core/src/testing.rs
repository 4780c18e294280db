//! Test doubles for sessions and handlers.

use crate::session::SessionSink;
use async_trait::async_trait;
use fontsync_change::{Change, Pattern};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One push delivered to a [`RecordingSink`].
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// A change pushed from another session or an external source.
    ExternalChange {
        /// The pushed change.
        change: Change,
        /// True for non-persisted drag feedback.
        is_live_change: bool,
    },
    /// A request to reload data. `None` means reload everything.
    ReloadData {
        /// The scope to reload.
        pattern: Option<Pattern>,
    },
    /// Notification that the session's own edit was rolled back.
    EditReverted {
        /// Human-readable reason.
        message: String,
        /// The scope the client must reload.
        reload_pattern: Pattern,
    },
}

/// A [`SessionSink`] that records every push for later assertions.
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    notify: Notify,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// All pushes recorded so far.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Number of pushes recorded so far.
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    /// Waits until at least `count` pushes have been recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.events.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn external_change(&self, change: &Change, is_live_change: bool) {
        self.record(SinkEvent::ExternalChange {
            change: change.clone(),
            is_live_change,
        });
    }

    async fn reload_data(&self, pattern: Option<&Pattern>) {
        self.record(SinkEvent::ReloadData {
            pattern: pattern.cloned(),
        });
    }

    async fn edit_reverted(&self, message: &str, reload_pattern: &Pattern) {
        self.record(SinkEvent::EditReverted {
            message: message.to_owned(),
            reload_pattern: reload_pattern.clone(),
        });
    }
}
