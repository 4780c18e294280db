//! Change application.
//!
//! [`apply_change`] walks a change's path into a live JSON object
//! graph and invokes the named mutation function on the resolved
//! subject, then recurses into the child changes against that same
//! subject.
//!
//! Built-in functions are a closed enum dispatched by pattern
//! matching; everything else goes through a [`CustomFunctions`]
//! registry so that domain-specific operations (outline edits) stay an
//! extension point of the algebra rather than part of it.

use crate::change::Change;
use crate::error::{ChangeError, ChangeResult};
use crate::path::{format_path, PathSegment};
use crate::schema::{self, Cast};
use serde_json::Value;

/// The built-in mutation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFunc {
    /// `=`: set a key or attribute.
    Assign,
    /// `d`: delete a key or attribute.
    DeleteAttr,
    /// `-`: delete a range of sequence items.
    DeleteRange,
    /// `+`: insert items into a sequence.
    InsertRange,
    /// `:`: replace a range of sequence items.
    SpliceRange,
}

/// A parsed change function name: built-in or custom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFunc {
    /// One of the closed set of built-ins.
    Builtin(BuiltinFunc),
    /// A registered domain-specific function.
    Custom(String),
}

impl ChangeFunc {
    /// Parses a wire function name.
    pub fn parse(name: &str) -> Self {
        match name {
            "=" => ChangeFunc::Builtin(BuiltinFunc::Assign),
            "d" => ChangeFunc::Builtin(BuiltinFunc::DeleteAttr),
            "-" => ChangeFunc::Builtin(BuiltinFunc::DeleteRange),
            "+" => ChangeFunc::Builtin(BuiltinFunc::InsertRange),
            ":" => ChangeFunc::Builtin(BuiltinFunc::SpliceRange),
            other => ChangeFunc::Custom(other.to_owned()),
        }
    }
}

/// Registry of domain-specific mutation functions.
///
/// Implementations receive the resolved subject and the raw arguments;
/// per-field casts apply to built-in functions only.
pub trait CustomFunctions: Send + Sync {
    /// Applies the function called `name` to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeError::UnknownFunction`] when `name` is not
    /// registered, and fails fast on bad arguments or subjects.
    fn apply(&self, name: &str, subject: &mut Value, arguments: &[Value]) -> ChangeResult<()>;
}

/// The empty registry: every custom name is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomFunctions;

impl CustomFunctions for NoCustomFunctions {
    fn apply(&self, name: &str, _subject: &mut Value, _arguments: &[Value]) -> ChangeResult<()> {
        Err(ChangeError::unknown_function(name))
    }
}

/// Applies `change` to `subject` in place.
///
/// The change itself is never mutated. Paths must reference existing
/// intermediate containers; a dangling path fails fast and leaves any
/// mutations from earlier siblings in place; recovery is the
/// orchestrator's concern, not the algebra's.
pub fn apply_change(
    subject: &mut Value,
    change: &Change,
    custom: &dyn CustomFunctions,
) -> ChangeResult<()> {
    apply_at(subject, change, custom, None)
}

fn apply_at(
    subject: &mut Value,
    change: &Change,
    custom: &dyn CustomFunctions,
    inherited: Option<Cast>,
) -> ChangeResult<()> {
    let (target, cast) = resolve(subject, &change.path, inherited)?;

    if let Some(name) = &change.function {
        match ChangeFunc::parse(name) {
            ChangeFunc::Builtin(builtin) => {
                apply_builtin(builtin, target, &change.arguments, cast)?
            }
            ChangeFunc::Custom(name) => custom.apply(&name, target, &change.arguments)?,
        }
    }

    for child in &change.children {
        apply_at(target, child, custom, cast)?;
    }
    Ok(())
}

/// Walks `path` into `subject`, tracking the value cast of the final
/// container. A cast is only valid for the immediate values of the
/// field that declared it, so every segment replaces it.
fn resolve<'a>(
    mut subject: &'a mut Value,
    path: &[PathSegment],
    inherited: Option<Cast>,
) -> ChangeResult<(&'a mut Value, Option<Cast>)> {
    let mut cast = inherited;
    for (walked, segment) in path.iter().enumerate() {
        match segment {
            PathSegment::Key(key) => {
                cast = schema::cast_for_field(key);
                let map = subject.as_object_mut().ok_or_else(|| ChangeError::TypeMismatch {
                    expected: "object",
                    path: format_path(&path[..walked]),
                })?;
                subject = map.get_mut(key).ok_or_else(|| ChangeError::MissingKey {
                    key: key.clone(),
                    path: format_path(&path[..walked]),
                })?;
            }
            PathSegment::Index(index) => {
                cast = None;
                let items = subject.as_array_mut().ok_or_else(|| ChangeError::TypeMismatch {
                    expected: "array",
                    path: format_path(&path[..walked]),
                })?;
                let len = items.len();
                subject = items.get_mut(*index).ok_or_else(|| ChangeError::IndexOutOfRange {
                    index: *index,
                    len,
                    path: format_path(&path[..walked]),
                })?;
            }
        }
    }
    Ok((subject, cast))
}

fn apply_builtin(
    builtin: BuiltinFunc,
    subject: &mut Value,
    arguments: &[Value],
    cast: Option<Cast>,
) -> ChangeResult<()> {
    match builtin {
        BuiltinFunc::Assign => {
            let key = arguments
                .first()
                .ok_or_else(|| ChangeError::bad_arguments("=", "missing key"))?;
            let raw = arguments
                .get(1)
                .ok_or_else(|| ChangeError::bad_arguments("=", "missing value"))?;
            match (subject, key) {
                (Value::Object(map), Value::String(name)) => {
                    let field_cast = schema::cast_for_field(name).or(cast);
                    let value = run_cast(field_cast, raw)?;
                    map.insert(name.clone(), value);
                }
                (Value::Array(items), Value::Number(_)) => {
                    let index = value_as_index(key, "=")?;
                    let len = items.len();
                    let slot = items.get_mut(index).ok_or(ChangeError::IndexOutOfRange {
                        index,
                        len,
                        path: String::new(),
                    })?;
                    *slot = run_cast(cast, raw)?;
                }
                _ => {
                    return Err(ChangeError::bad_arguments(
                        "=",
                        "key must be a string for objects or an index for arrays",
                    ))
                }
            }
        }
        BuiltinFunc::DeleteAttr => {
            let name = arguments
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| ChangeError::bad_arguments("d", "missing key"))?;
            let map = subject.as_object_mut().ok_or(ChangeError::TypeMismatch {
                expected: "object",
                path: String::new(),
            })?;
            map.remove(name).ok_or_else(|| ChangeError::MissingKey {
                key: name.to_owned(),
                path: String::new(),
            })?;
        }
        BuiltinFunc::DeleteRange => {
            let start = index_argument(arguments, 0, "-")?;
            let count = match arguments.get(1) {
                Some(value) => value_as_index(value, "-")?,
                None => 1,
            };
            splice(subject, start, count, &[], cast)?;
        }
        BuiltinFunc::InsertRange => {
            let start = index_argument(arguments, 0, "+")?;
            splice(subject, start, 0, &arguments[1..], cast)?;
        }
        BuiltinFunc::SpliceRange => {
            let start = index_argument(arguments, 0, ":")?;
            let count = index_argument(arguments, 1, ":")?;
            splice(subject, start, count, &arguments[2..], cast)?;
        }
    }
    Ok(())
}

/// The generalized splice all three range functions reduce to.
fn splice(
    subject: &mut Value,
    start: usize,
    delete_count: usize,
    items: &[Value],
    cast: Option<Cast>,
) -> ChangeResult<()> {
    let array = subject.as_array_mut().ok_or(ChangeError::TypeMismatch {
        expected: "array",
        path: String::new(),
    })?;
    let len = array.len();
    let end = start
        .checked_add(delete_count)
        .filter(|end| *end <= len)
        .ok_or(ChangeError::IndexOutOfRange {
            index: start.saturating_add(delete_count),
            len,
            path: String::new(),
        })?;
    let mut replacement = Vec::with_capacity(items.len());
    for item in items {
        replacement.push(run_cast(cast, item)?);
    }
    array.splice(start..end, replacement);
    Ok(())
}

fn run_cast(cast: Option<Cast>, raw: &Value) -> ChangeResult<Value> {
    match cast {
        Some(cast) => cast(raw),
        None => Ok(raw.clone()),
    }
}

fn index_argument(arguments: &[Value], position: usize, function: &str) -> ChangeResult<usize> {
    let value = arguments.get(position).ok_or_else(|| {
        ChangeError::bad_arguments(function, format!("missing argument {position}"))
    })?;
    value_as_index(value, function)
}

fn value_as_index(value: &Value, function: &str) -> ChangeResult<usize> {
    value
        .as_u64()
        .map(|index| index as usize)
        .ok_or_else(|| ChangeError::bad_arguments(function, "expected a non-negative index"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::path;
    use serde_json::json;

    fn apply(subject: &mut Value, change: &Change) -> ChangeResult<()> {
        apply_change(subject, change, &NoCustomFunctions)
    }

    #[test]
    fn assign_glyph_map_entry() {
        let mut font = json!({"glyphMap": {"A": [65, 97]}});
        let change: Change =
            serde_json::from_value(json!({"p": ["glyphMap"], "f": "=", "a": ["A", [97]]})).unwrap();
        let before = change.clone();

        apply(&mut font, &change).unwrap();
        assert_eq!(font, json!({"glyphMap": {"A": [97]}}));
        // Changes are values; application must not touch them.
        assert_eq!(change, before);
    }

    #[test]
    fn assign_applies_field_cast_at_root() {
        let mut font = json!({"unitsPerEm": 1000});
        let change = Change::assign(Vec::new(), "unitsPerEm", json!(2048.0));
        apply(&mut font, &change).unwrap();
        assert_eq!(font, json!({"unitsPerEm": 2048}));
    }

    #[test]
    fn assign_inherits_container_cast() {
        // New glyph map entries are cast to code point lists.
        let mut font = json!({"glyphMap": {}});
        let change = Change::assign(path(["glyphMap"]), "B", json!([66.0]));
        apply(&mut font, &change).unwrap();
        assert_eq!(font, json!({"glyphMap": {"B": [66]}}));
    }

    #[test]
    fn cast_does_not_leak_past_typed_container() {
        // "glyphs" declares record values, but assigning a number one
        // level deeper must not run through the record cast.
        let mut font = json!({"glyphs": {"A": {"xAdvance": 500}}});
        let change = Change::assign(path(["glyphs", "A"]), "xAdvance", json!(600));
        apply(&mut font, &change).unwrap();
        assert_eq!(font, json!({"glyphs": {"A": {"xAdvance": 600}}}));
    }

    #[test]
    fn delete_attr() {
        let mut font = json!({"glyphMap": {"A": [65], "B": [66]}});
        let change = Change::delete_attr(path(["glyphMap"]), "A");
        apply(&mut font, &change).unwrap();
        assert_eq!(font, json!({"glyphMap": {"B": [66]}}));
    }

    #[test]
    fn delete_missing_attr_fails() {
        let mut font = json!({"glyphMap": {}});
        let change = Change::delete_attr(path(["glyphMap"]), "Z");
        assert!(matches!(
            apply(&mut font, &change),
            Err(ChangeError::MissingKey { .. })
        ));
    }

    #[test]
    fn range_functions_share_the_splice() {
        let mut list = json!({"items": [1, 2, 3, 4]});

        let insert: Change =
            serde_json::from_value(json!({"p": ["items"], "f": "+", "a": [1, 9, 9]})).unwrap();
        apply(&mut list, &insert).unwrap();
        assert_eq!(list, json!({"items": [1, 9, 9, 2, 3, 4]}));

        let delete: Change =
            serde_json::from_value(json!({"p": ["items"], "f": "-", "a": [1, 2]})).unwrap();
        apply(&mut list, &delete).unwrap();
        assert_eq!(list, json!({"items": [1, 2, 3, 4]}));

        let single_delete: Change =
            serde_json::from_value(json!({"p": ["items"], "f": "-", "a": [0]})).unwrap();
        apply(&mut list, &single_delete).unwrap();
        assert_eq!(list, json!({"items": [2, 3, 4]}));

        let splice: Change =
            serde_json::from_value(json!({"p": ["items"], "f": ":", "a": [0, 2, 7]})).unwrap();
        apply(&mut list, &splice).unwrap();
        assert_eq!(list, json!({"items": [7, 4]}));
    }

    #[test]
    fn splice_out_of_range_fails() {
        let mut list = json!({"items": [1]});
        let change: Change =
            serde_json::from_value(json!({"p": ["items"], "f": "-", "a": [0, 2]})).unwrap();
        assert!(matches!(
            apply(&mut list, &change),
            Err(ChangeError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn children_apply_against_resolved_subject() {
        let mut font = json!({"glyphs": {"A": {"xAdvance": 500, "layers": {}}}});
        let change = Change::structural(
            path(["glyphs", "A"]),
            vec![
                Change::assign(Vec::new(), "xAdvance", json!(550)),
                Change::assign(path(["layers"]), "fg", json!({"y": 1})),
            ],
        );
        apply(&mut font, &change).unwrap();
        assert_eq!(
            font,
            json!({"glyphs": {"A": {"xAdvance": 550, "layers": {"fg": {"y": 1}}}}})
        );
    }

    #[test]
    fn unknown_function_fails_fast() {
        let mut font = json!({"glyphMap": {}});
        let change: Change =
            serde_json::from_value(json!({"p": ["glyphMap"], "f": "frobnicate"})).unwrap();
        assert!(matches!(
            apply(&mut font, &change),
            Err(ChangeError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn dangling_path_fails_fast() {
        let mut font = json!({"glyphs": {}});
        let change = Change::assign(path(["glyphs", "A"]), "xAdvance", json!(500));
        assert!(matches!(
            apply(&mut font, &change),
            Err(ChangeError::MissingKey { .. })
        ));
    }

    #[test]
    fn index_segments_walk_arrays() {
        let mut font = json!({"axes": [{"name": "wght"}, {"name": "wdth"}]});
        let change = Change::assign(vec![PathSegment::key("axes"), PathSegment::Index(1)],
            "name", json!("width"));
        apply(&mut font, &change).unwrap();
        assert_eq!(font["axes"][1]["name"], json!("width"));

        let out_of_range = Change::assign(
            vec![PathSegment::key("axes"), PathSegment::Index(5)],
            "name",
            json!("x"),
        );
        assert!(matches!(
            apply(&mut font, &out_of_range),
            Err(ChangeError::IndexOutOfRange { .. })
        ));
    }
}
