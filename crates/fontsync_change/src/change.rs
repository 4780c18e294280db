//! The change record.
//!
//! A [`Change`] is a tree-shaped patch: one optional mutation at a path,
//! plus nested sub-changes whose paths are relative to the parent's
//! resolved subject. Changes are plain values; applying one never
//! mutates it.
//!
//! Wire shape: `{"p": [...], "f": "=", "a": [...], "c": [...]}` with
//! every key omitted when empty or absent.

use crate::path::{Path, PathSegment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// A serializable tree-shaped patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Path to the subject of this change, relative to the parent.
    #[serde(rename = "p", default, skip_serializing_if = "Vec::is_empty")]
    pub path: Path,

    /// Mutation function name. Absent means this node is purely
    /// structural and only its children matter.
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    /// Arguments for the mutation function.
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,

    /// Nested sub-changes, each relative to this node's subject.
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Change>,
}

impl Change {
    /// Creates a structural change carrying only children.
    pub fn structural(path: Path, children: Vec<Change>) -> Self {
        Self {
            path,
            function: None,
            arguments: Vec::new(),
            children,
        }
    }

    /// Creates an assignment: set `key` to `value` at `path`.
    pub fn assign(path: Path, key: impl Into<String>, value: Value) -> Self {
        Self {
            path,
            function: Some("=".to_owned()),
            arguments: vec![Value::String(key.into()), value],
            children: Vec::new(),
        }
    }

    /// Creates a key/attribute deletion at `path`.
    pub fn delete_attr(path: Path, key: impl Into<String>) -> Self {
        Self {
            path,
            function: Some("d".to_owned()),
            arguments: vec![Value::String(key.into())],
            children: Vec::new(),
        }
    }

    /// True if this change carries neither a function nor children.
    ///
    /// Such a change is a no-op; [`Change::normalized`] turns it into
    /// `None`.
    pub fn is_noop(&self) -> bool {
        self.function.is_none() && self.children.is_empty()
    }

    /// Normalizes the change tree.
    ///
    /// Recursively drops no-op children, and collapses a node that has
    /// no function of its own and exactly one remaining child into that
    /// child (concatenating paths). Returns `None` when nothing
    /// remains.
    pub fn normalized(&self) -> Option<Change> {
        let children: Vec<Change> = self
            .children
            .iter()
            .filter_map(Change::normalized)
            .collect();

        if self.function.is_none() {
            match children.len() {
                0 => return None,
                1 => {
                    let child = children.into_iter().next().unwrap();
                    let mut path = self.path.clone();
                    path.extend(child.path);
                    return Some(Change {
                        path,
                        function: child.function,
                        arguments: child.arguments,
                        children: child.children,
                    });
                }
                _ => {}
            }
        }

        Some(Change {
            path: self.path.clone(),
            function: self.function.clone(),
            arguments: self.arguments.clone(),
            children,
        })
    }

    /// Collects the distinct absolute path prefixes of length `depth`
    /// reachable through this change tree, sorted.
    ///
    /// With `depth == 1` this answers "which top-level fields does this
    /// edit touch" without applying it.
    pub fn collect_paths(&self, depth: usize) -> Vec<Path> {
        let mut found = BTreeSet::new();
        collect_into(self, depth, &[], &mut found);
        found.into_iter().collect()
    }
}

fn collect_into(change: &Change, depth: usize, prefix: &[PathSegment], found: &mut BTreeSet<Path>) {
    let mut absolute: Path = prefix.to_vec();
    absolute.extend(change.path.iter().cloned());
    if absolute.len() >= depth {
        absolute.truncate(depth);
        found.insert(absolute);
        return;
    }
    for child in &change.children {
        collect_into(child, depth, &absolute, found);
    }
}
