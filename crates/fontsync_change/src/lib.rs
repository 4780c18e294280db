//! # fontsync change
//!
//! The change and pattern algebra of the fontsync editor core.
//!
//! This crate provides:
//! - [`Change`]: a serializable tree-shaped patch
//! - [`apply_change`]: the recursive driver that applies a change to a
//!   live JSON object graph
//! - [`Pattern`]: a tree describing subsets of possible changes, with
//!   lawful union/difference/intersection, matching, and filtering
//! - [`OutlineFunctions`]: the domain-specific outline edits, kept
//!   behind the [`CustomFunctions`] extension point

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod change;
mod error;
mod outline;
mod path;
mod pattern;
mod schema;

pub use apply::{apply_change, BuiltinFunc, ChangeFunc, CustomFunctions, NoCustomFunctions};
pub use change::Change;
pub use error::{ChangeError, ChangeResult};
pub use outline::{
    OutlineFunctions, POINT_OFF_CURVE_CUBIC, POINT_OFF_CURVE_QUAD, POINT_ON_CURVE,
    POINT_SMOOTH_FLAG,
};
pub use path::{format_path, path, Path, PathSegment};
pub use pattern::{Pattern, PatternNode};
pub use schema::{cast_for_field, Cast};
