//! Change paths.
//!
//! A path addresses a location in the font object tree: a sequence of
//! string keys (struct fields, map keys) and array indices. The empty
//! path addresses the root.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a [`Path`]: a string key or an array index.
///
/// On the wire a segment is either a JSON string or a JSON number,
/// matching the `"p"` array of a serialized change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// An index into a sequence.
    Index(usize),
    /// A field name or map key.
    Key(String),
}

impl PathSegment {
    /// Creates a key segment.
    pub fn key(name: impl Into<String>) -> Self {
        PathSegment::Key(name.into())
    }

    /// Returns the key name if this is a key segment.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(name) => Some(name),
            PathSegment::Index(_) => None,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(name) => write!(f, "{name}"),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        PathSegment::Key(name.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(name: String) -> Self {
        PathSegment::Key(name)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// A location in the object tree. Empty means the root.
pub type Path = Vec<PathSegment>;

/// Builds a [`Path`] from anything segment-like.
///
/// Convenience for tests and for synthesizing changes in the handler:
/// `path(["glyphs", "A"])`.
pub fn path<I, S>(segments: I) -> Path
where
    I: IntoIterator<Item = S>,
    S: Into<PathSegment>,
{
    segments.into_iter().map(Into::into).collect()
}

/// Formats a path for log and error messages, e.g. `glyphs/A/layers/0`.
pub fn format_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::new();
    for segment in path {
        out.push('/');
        out.push_str(&segment.to_string());
    }
    out
}
