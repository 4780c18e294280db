//! # fontsync core
//!
//! The per-document orchestrator of the fontsync editor: an
//! authoritative in-process cache with write-back persistence,
//! connected-client sessions with pattern subscriptions, change
//! broadcast, and reconciliation of out-of-band backend
//! modifications.
//!
//! The entry point is [`FontHandler`]; everything else supports it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod handler;
mod session;
pub mod testing;
mod write_queue;

pub use cache::{CacheKey, LruCache};
pub use config::HandlerConfig;
pub use error::{CoreError, CoreResult};
pub use handler::{Connection, FontHandler};
pub use session::{Session, SessionSink};
pub use write_queue::{PendingWrite, WriteAction, WriteQueue};
