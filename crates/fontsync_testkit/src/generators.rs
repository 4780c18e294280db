//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random paths, patterns and
//! changes that stay within the shapes the algebra accepts.

use fontsync_change::{Change, Path, PathSegment, Pattern};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating a single path segment.
///
/// Keys come from a small alphabet so that independently generated
/// paths overlap often enough to exercise the interesting algebra
/// cases. The alphabet includes a digit-string key, which patterns
/// unify with the equivalent index segment.
pub fn path_segment_strategy() -> impl Strategy<Value = PathSegment> {
    prop_oneof![
        3 => prop::sample::select(vec!["glyphs", "glyphMap", "axes", "alpha", "beta", "1"])
            .prop_map(|key| PathSegment::Key(key.to_owned())),
        1 => (0usize..4).prop_map(PathSegment::Index),
    ]
}

/// Strategy for generating a path of bounded depth.
pub fn path_strategy(max_depth: usize) -> impl Strategy<Value = Path> {
    prop::collection::vec(path_segment_strategy(), 0..=max_depth)
}

/// Strategy for generating a non-empty path of bounded depth.
pub fn non_empty_path_strategy(max_depth: usize) -> impl Strategy<Value = Path> {
    prop::collection::vec(path_segment_strategy(), 1..=max_depth.max(1))
}

/// Strategy for generating a pattern as a union of leaf paths.
pub fn pattern_strategy(max_depth: usize) -> impl Strategy<Value = Pattern> {
    prop::collection::vec(non_empty_path_strategy(max_depth), 0..4).prop_map(|paths| {
        paths
            .iter()
            .fold(Pattern::new(), |pattern, path| {
                pattern.union(&Pattern::from_path(path))
            })
    })
}

/// Strategy for generating simple JSON argument values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{1,6}".prop_map(|s| json!(s)),
        Just(json!(null)),
        Just(json!([1, 2, 3])),
    ]
}

/// Strategy for generating a change tree of bounded depth.
///
/// Leaves are assignments or attribute deletions; inner nodes are
/// structural and carry one or two children.
pub fn change_strategy(max_depth: usize) -> impl Strategy<Value = Change> {
    let leaf = (path_strategy(2), "[a-z]{1,4}", value_strategy()).prop_flat_map(
        |(path, key, value)| {
            prop_oneof![
                Just(Change::assign(path.clone(), key.clone(), value.clone())),
                Just(Change::delete_attr(path, key)),
            ]
        },
    );
    leaf.prop_recursive(max_depth as u32, 16, 2, |inner| {
        (path_strategy(2), prop::collection::vec(inner, 1..=2))
            .prop_map(|(path, children)| Change::structural(path, children))
    })
}
