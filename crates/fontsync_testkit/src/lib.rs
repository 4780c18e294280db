//! # fontsync Testkit
//!
//! Test utilities for fontsync.
//!
//! This crate provides:
//! - Canonical font fixtures and handler helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fontsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_handler() {
//!     let (handler, backend) = test_handler();
//!     // ... edit, flush, assert on backend
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
