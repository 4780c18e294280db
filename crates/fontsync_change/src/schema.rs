//! Per-field value casts.
//!
//! The live object tree is untyped JSON, but several fields have a
//! known value shape: glyph map entries are code point lists, glyphs
//! are records, and so on. Built-in mutation functions run their value
//! arguments through the cast registered for the innermost typed field
//! on the change path, so a raw decoded argument lands in the tree in
//! its proper shape.
//!
//! The table is a static constant built from the data model, not
//! discovered at apply time.

use crate::error::{ChangeError, ChangeResult};
use serde_json::Value;

/// A normalization function for values stored under a typed field.
pub type Cast = fn(&Value) -> ChangeResult<Value>;

/// Field name to value cast, for the fields with a declared value type.
/// Fields not listed here store their arguments verbatim.
const FIELD_CASTS: &[(&str, Cast)] = &[
    ("glyphMap", cast_code_points),
    ("glyphs", cast_record),
    ("axes", cast_record_or_list),
    ("sources", cast_record_or_list),
    ("unitsPerEm", cast_unsigned),
];

/// Looks up the value cast declared for `field`, if any.
pub fn cast_for_field(field: &str) -> Option<Cast> {
    FIELD_CASTS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, cast)| *cast)
}

fn cast_code_points(value: &Value) -> ChangeResult<Value> {
    let items = value.as_array().ok_or(ChangeError::TypeMismatch {
        expected: "code point list",
        path: "glyphMap".to_owned(),
    })?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let code = item
            .as_u64()
            .or_else(|| {
                // Decoded JSON may carry whole floats for integers.
                item.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            })
            .ok_or(ChangeError::TypeMismatch {
                expected: "unsigned code point",
                path: "glyphMap".to_owned(),
            })?;
        out.push(Value::from(code));
    }
    Ok(Value::Array(out))
}

fn cast_record(value: &Value) -> ChangeResult<Value> {
    if value.is_object() {
        Ok(value.clone())
    } else {
        Err(ChangeError::TypeMismatch {
            expected: "record",
            path: String::new(),
        })
    }
}

fn cast_record_or_list(value: &Value) -> ChangeResult<Value> {
    match value {
        Value::Object(_) => Ok(value.clone()),
        Value::Array(items) if items.iter().all(Value::is_object) => Ok(value.clone()),
        _ => Err(ChangeError::TypeMismatch {
            expected: "record or record list",
            path: String::new(),
        }),
    }
}

fn cast_unsigned(value: &Value) -> ChangeResult<Value> {
    let number = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
        .ok_or(ChangeError::TypeMismatch {
            expected: "unsigned integer",
            path: String::new(),
        })?;
    Ok(Value::from(number))
}
