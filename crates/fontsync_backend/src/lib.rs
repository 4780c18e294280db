//! # fontsync backend
//!
//! The storage contract consumed by the fontsync editor core.
//!
//! A [`FontBackend`] owns the concrete font file format; the core only
//! sees decoded JSON trees and a narrow async read/write/watch
//! surface. [`MemoryBackend`] is the in-memory implementation used
//! throughout the test suites.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{FontBackend, GlyphMap};
pub use error::{BackendError, BackendResult};
pub use memory::{MemoryBackend, RecordedPut};
