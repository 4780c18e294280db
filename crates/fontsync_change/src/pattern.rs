//! The pattern algebra.
//!
//! A [`Pattern`] describes a set of possible change locations: a tree
//! of path segments where a leaf means "everything below this prefix".
//! Patterns drive per-session subscriptions and scoped cache
//! invalidation; the orchestrator's correctness rests on these being
//! lawful set operations, so they are pure and exhaustively tested.
//!
//! Wire shape: a nested JSON object where `null` marks a leaf, e.g.
//! `{"glyphMap": null, "glyphs": {"A": null}}`. Object keys carry both
//! kinds of segment, so a key that is a canonical decimal number
//! always denotes an array index; patterns treat a digit-named map key
//! (a glyph literally called `"1"`, say) and the equivalent index as
//! the same segment, in lookups as well as on the wire.

use crate::change::Change;
use crate::path::PathSegment;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// A node of a [`Pattern`]: match everything below, or a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternNode {
    /// Everything under this prefix matches.
    Leaf,
    /// Matching continues in the subtree.
    Branch(Pattern),
}

/// A tree describing a subset of possible change locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    nodes: BTreeMap<PathSegment, PatternNode>,
}

impl Pattern {
    /// Creates an empty pattern, which matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a single-branch pattern from a flat path. Digit-string
    /// keys are stored as their canonical index segment.
    ///
    /// An empty path yields the empty pattern.
    pub fn from_path(path: &[PathSegment]) -> Self {
        let mut pattern = Pattern::new();
        let Some((first, rest)) = path.split_first() else {
            return pattern;
        };
        let node = if rest.is_empty() {
            PatternNode::Leaf
        } else {
            PatternNode::Branch(Pattern::from_path(rest))
        };
        pattern.nodes.insert(canonical_segment(first), node);
        pattern
    }

    /// True if the pattern matches nothing.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node stored for `segment`, if any. A digit-string key
    /// resolves to its canonical index segment.
    pub fn get(&self, segment: &PathSegment) -> Option<&PatternNode> {
        if let PathSegment::Key(key) = segment {
            if let Some(index) = canonical_index(key) {
                return self.nodes.get(&PathSegment::Index(index));
            }
        }
        self.nodes.get(segment)
    }

    /// Iterates the top-level entries.
    pub fn entries(&self) -> impl Iterator<Item = (&PathSegment, &PatternNode)> {
        self.nodes.iter()
    }

    /// Set union. A leaf on either side absorbs the other subtree.
    pub fn union(&self, other: &Pattern) -> Pattern {
        let mut nodes = self.nodes.clone();
        for (segment, theirs) in &other.nodes {
            let merged = match nodes.get(segment) {
                None => theirs.clone(),
                Some(PatternNode::Leaf) => PatternNode::Leaf,
                Some(PatternNode::Branch(ours)) => match theirs {
                    PatternNode::Leaf => PatternNode::Leaf,
                    PatternNode::Branch(branch) => PatternNode::Branch(ours.union(branch)),
                },
            };
            nodes.insert(segment.clone(), merged);
        }
        Pattern { nodes }
    }

    /// Set difference. A leaf in `other` removes the whole subtree; a
    /// leaf in `self` cannot be partially subtracted and is kept.
    pub fn difference(&self, other: &Pattern) -> Pattern {
        let mut nodes = BTreeMap::new();
        for (segment, ours) in &self.nodes {
            match other.nodes.get(segment) {
                None => {
                    nodes.insert(segment.clone(), ours.clone());
                }
                Some(PatternNode::Leaf) => {}
                Some(PatternNode::Branch(theirs)) => match ours {
                    PatternNode::Leaf => {
                        nodes.insert(segment.clone(), PatternNode::Leaf);
                    }
                    PatternNode::Branch(branch) => {
                        let remaining = branch.difference(theirs);
                        if !remaining.is_empty() {
                            nodes.insert(segment.clone(), PatternNode::Branch(remaining));
                        }
                    }
                },
            }
        }
        Pattern { nodes }
    }

    /// Set intersection. The deeper of the two structures survives,
    /// bounded by the shallower.
    pub fn intersect(&self, other: &Pattern) -> Pattern {
        let mut nodes = BTreeMap::new();
        for (segment, ours) in &self.nodes {
            let Some(theirs) = other.nodes.get(segment) else {
                continue;
            };
            let merged = match (ours, theirs) {
                (PatternNode::Leaf, other_node) => other_node.clone(),
                (our_node, PatternNode::Leaf) => our_node.clone(),
                (PatternNode::Branch(a), PatternNode::Branch(b)) => {
                    let common = a.intersect(b);
                    if common.is_empty() {
                        continue;
                    }
                    PatternNode::Branch(common)
                }
            };
            nodes.insert(segment.clone(), merged);
        }
        Pattern { nodes }
    }

    /// True if `change` (or any of its children) falls inside this
    /// pattern.
    ///
    /// A structural change with no function of its own matches only
    /// via its children. A function change whose first argument names
    /// a key stored as a leaf at the resolved node also matches; this
    /// lets `{"glyphMap": null}` match an assign to a single glyph map
    /// entry without enumerating names.
    pub fn matches_change(&self, change: &Change) -> bool {
        let mut node = self;
        for segment in &change.path {
            match node.get(segment) {
                None => return false,
                Some(PatternNode::Leaf) => return true,
                Some(PatternNode::Branch(pattern)) => node = pattern,
            }
        }
        if change.function.is_some() && first_argument_is_leaf(change, node) {
            return true;
        }
        change.children.iter().any(|child| node.matches_change(child))
    }

    /// Prunes `change` to the parts that fall inside this pattern, or,
    /// with `inverse`, to the parts that do not.
    ///
    /// Empty nodes are dropped, a lone remaining child is collapsed
    /// into its parent, and `None` is returned when nothing survives.
    /// For every change and pattern,
    /// `pattern.matches_change(&c) == pattern.filter_change(&c, false).is_some()`.
    pub fn filter_change(&self, change: &Change, inverse: bool) -> Option<Change> {
        let mut node = self;
        for segment in &change.path {
            match node.get(segment) {
                None => return inverse.then(|| change.clone()),
                Some(PatternNode::Leaf) => return (!inverse).then(|| change.clone()),
                Some(PatternNode::Branch(pattern)) => node = pattern,
            }
        }

        let own_match = change.function.is_some() && first_argument_is_leaf(change, node);
        let keep_function = change.function.is_some() && (own_match != inverse);
        let children: Vec<Change> = change
            .children
            .iter()
            .filter_map(|child| node.filter_change(child, inverse))
            .collect();

        if !keep_function && children.is_empty() {
            return None;
        }

        let mut filtered = Change {
            path: change.path.clone(),
            function: if keep_function { change.function.clone() } else { None },
            arguments: if keep_function { change.arguments.clone() } else { Vec::new() },
            children,
        };
        if filtered.function.is_none() && filtered.children.len() == 1 {
            let child = filtered.children.pop().unwrap();
            let mut path = filtered.path;
            path.extend(child.path);
            filtered = Change {
                path,
                function: child.function,
                arguments: child.arguments,
                children: child.children,
            };
        }
        Some(filtered)
    }

    /// Converts to the wire JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (segment, node) in &self.nodes {
            let value = match node {
                PatternNode::Leaf => Value::Null,
                PatternNode::Branch(pattern) => pattern.to_value(),
            };
            map.insert(segment.to_string(), value);
        }
        Value::Object(map)
    }

    /// Parses the wire JSON object. `null` values are leaves; keys
    /// that are canonical decimal numbers are array indices.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let map = value
            .as_object()
            .ok_or_else(|| "pattern must be an object".to_owned())?;
        let mut nodes = BTreeMap::new();
        for (key, child) in map {
            let node = if child.is_null() {
                PatternNode::Leaf
            } else {
                PatternNode::Branch(Pattern::from_value(child)?)
            };
            nodes.insert(segment_from_key(key), node);
        }
        Ok(Pattern { nodes })
    }
}

fn first_argument_is_leaf(change: &Change, node: &Pattern) -> bool {
    let Some(Value::String(key)) = change.arguments.first() else {
        return false;
    };
    matches!(node.nodes.get(&segment_from_key(key)), Some(PatternNode::Leaf))
}

/// The index a map key denotes, if it is a canonical decimal number.
/// `"01"` and `"1x"` stay keys; `"0"` and `"12"` are indices.
fn canonical_index(key: &str) -> Option<usize> {
    if key != "0" && (key.is_empty() || key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn segment_from_key(key: &str) -> PathSegment {
    match canonical_index(key) {
        Some(index) => PathSegment::Index(index),
        None => PathSegment::Key(key.to_owned()),
    }
}

fn canonical_segment(segment: &PathSegment) -> PathSegment {
    match segment {
        PathSegment::Key(key) => segment_from_key(key),
        PathSegment::Index(index) => PathSegment::Index(*index),
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.nodes.len()))?;
        for (segment, node) in &self.nodes {
            match node {
                PatternNode::Leaf => map.serialize_entry(&segment.to_string(), &Value::Null)?,
                PatternNode::Branch(pattern) => {
                    map.serialize_entry(&segment.to_string(), pattern)?
                }
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Pattern::from_value(&value).map_err(serde::de::Error::custom)
    }
}
