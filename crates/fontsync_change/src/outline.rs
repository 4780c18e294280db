//! Outline edit functions.
//!
//! The domain-specific half of the change-function registry: point and
//! contour edits on packed path data. These are registered separately
//! from the built-ins so the algebra itself stays agnostic of geometry.
//!
//! Packed path shape: flat `coordinates` (x/y interleaved), one point
//! type byte per point, and per-contour `{endPoint, isClosed}` records.

use crate::apply::CustomFunctions;
use crate::error::{ChangeError, ChangeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// On-curve point.
pub const POINT_ON_CURVE: u8 = 0x00;
/// Quadratic off-curve point.
pub const POINT_OFF_CURVE_QUAD: u8 = 0x01;
/// Cubic off-curve point.
pub const POINT_OFF_CURVE_CUBIC: u8 = 0x02;
/// Smooth connection flag, or-ed onto the point type.
pub const POINT_SMOOTH_FLAG: u8 = 0x08;

#[derive(Debug, Serialize, Deserialize)]
struct PackedPath {
    coordinates: Vec<f64>,
    #[serde(rename = "pointTypes")]
    point_types: Vec<u8>,
    #[serde(rename = "contourInfo")]
    contour_info: Vec<ContourInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContourInfo {
    #[serde(rename = "endPoint")]
    end_point: i64,
    #[serde(rename = "isClosed")]
    is_closed: bool,
}

/// An unpacked contour, as carried by `insertContour` arguments.
#[derive(Debug, Serialize, Deserialize)]
struct Contour {
    coordinates: Vec<f64>,
    #[serde(rename = "pointTypes")]
    point_types: Vec<u8>,
    #[serde(rename = "isClosed", default)]
    is_closed: bool,
}

impl PackedPath {
    fn parse(subject: &Value) -> ChangeResult<Self> {
        serde_json::from_value(subject.clone()).map_err(|_| ChangeError::TypeMismatch {
            expected: "packed path",
            path: String::new(),
        })
    }

    fn store(self, subject: &mut Value) -> ChangeResult<()> {
        *subject = serde_json::to_value(self).map_err(|_| ChangeError::TypeMismatch {
            expected: "packed path",
            path: String::new(),
        })?;
        Ok(())
    }

    fn num_points(&self) -> usize {
        self.point_types.len()
    }

    /// Absolute index of the first point of `contour_index`.
    fn contour_start(&self, contour_index: usize) -> ChangeResult<usize> {
        if contour_index >= self.contour_info.len() {
            return Err(ChangeError::IndexOutOfRange {
                index: contour_index,
                len: self.contour_info.len(),
                path: "contourInfo".to_owned(),
            });
        }
        Ok(if contour_index == 0 {
            0
        } else {
            (self.contour_info[contour_index - 1].end_point + 1) as usize
        })
    }

    fn contour_end(&self, contour_index: usize) -> usize {
        (self.contour_info[contour_index].end_point + 1) as usize
    }

    /// Shifts the end points of `contour_index` and everything after it.
    fn shift_end_points(&mut self, contour_index: usize, delta: i64) {
        for info in &mut self.contour_info[contour_index..] {
            info.end_point += delta;
        }
    }
}

/// The outline-edit registry used by the editor core.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineFunctions;

impl CustomFunctions for OutlineFunctions {
    fn apply(&self, name: &str, subject: &mut Value, arguments: &[Value]) -> ChangeResult<()> {
        match name {
            "=xy" => set_point_position(subject, arguments),
            "insertContour" => insert_contour(subject, arguments),
            "deleteContour" => delete_contour(subject, arguments),
            "insertPoint" => insert_point(subject, arguments),
            "deletePoint" => delete_point(subject, arguments),
            other => Err(ChangeError::unknown_function(other)),
        }
    }
}

fn set_point_position(subject: &mut Value, arguments: &[Value]) -> ChangeResult<()> {
    let point_index = usize_arg(arguments, 0, "=xy")?;
    let x = f64_arg(arguments, 1, "=xy")?;
    let y = f64_arg(arguments, 2, "=xy")?;

    let mut path = PackedPath::parse(subject)?;
    if point_index >= path.num_points() {
        return Err(ChangeError::IndexOutOfRange {
            index: point_index,
            len: path.num_points(),
            path: "pointTypes".to_owned(),
        });
    }
    path.coordinates[point_index * 2] = x;
    path.coordinates[point_index * 2 + 1] = y;
    path.store(subject)
}

fn insert_contour(subject: &mut Value, arguments: &[Value]) -> ChangeResult<()> {
    let contour_index = usize_arg(arguments, 0, "insertContour")?;
    let contour: Contour = arguments
        .get(1)
        .and_then(|raw| serde_json::from_value(raw.clone()).ok())
        .ok_or_else(|| ChangeError::bad_arguments("insertContour", "expected a contour record"))?;
    if contour.coordinates.len() != contour.point_types.len() * 2 {
        return Err(ChangeError::bad_arguments(
            "insertContour",
            "coordinate count does not match point count",
        ));
    }

    let mut path = PackedPath::parse(subject)?;
    if contour_index > path.contour_info.len() {
        return Err(ChangeError::IndexOutOfRange {
            index: contour_index,
            len: path.contour_info.len(),
            path: "contourInfo".to_owned(),
        });
    }
    let start = if contour_index == path.contour_info.len() {
        path.num_points()
    } else {
        path.contour_start(contour_index)?
    };
    let num_points = contour.point_types.len() as i64;

    path.coordinates
        .splice(start * 2..start * 2, contour.coordinates);
    path.point_types
        .splice(start..start, contour.point_types);
    path.contour_info.insert(
        contour_index,
        ContourInfo {
            end_point: start as i64 - 1,
            is_closed: contour.is_closed,
        },
    );
    path.shift_end_points(contour_index, num_points);
    path.store(subject)
}

fn delete_contour(subject: &mut Value, arguments: &[Value]) -> ChangeResult<()> {
    let contour_index = usize_arg(arguments, 0, "deleteContour")?;

    let mut path = PackedPath::parse(subject)?;
    let start = path.contour_start(contour_index)?;
    let end = path.contour_end(contour_index);
    let num_points = (end - start) as i64;

    path.coordinates.drain(start * 2..end * 2);
    path.point_types.drain(start..end);
    path.contour_info.remove(contour_index);
    path.shift_end_points(contour_index, -num_points);
    path.store(subject)
}

fn insert_point(subject: &mut Value, arguments: &[Value]) -> ChangeResult<()> {
    let contour_index = usize_arg(arguments, 0, "insertPoint")?;
    let contour_point_index = usize_arg(arguments, 1, "insertPoint")?;
    let point = arguments
        .get(2)
        .and_then(Value::as_object)
        .ok_or_else(|| ChangeError::bad_arguments("insertPoint", "expected a point record"))?;
    let x = point.get("x").and_then(Value::as_f64).ok_or_else(|| {
        ChangeError::bad_arguments("insertPoint", "point is missing x")
    })?;
    let y = point.get("y").and_then(Value::as_f64).ok_or_else(|| {
        ChangeError::bad_arguments("insertPoint", "point is missing y")
    })?;
    let mut point_type = match point.get("type").and_then(Value::as_str) {
        Some("cubic") => POINT_OFF_CURVE_CUBIC,
        Some("quad") => POINT_OFF_CURVE_QUAD,
        _ => POINT_ON_CURVE,
    };
    if point.get("smooth").and_then(Value::as_bool).unwrap_or(false) {
        point_type |= POINT_SMOOTH_FLAG;
    }

    let mut path = PackedPath::parse(subject)?;
    let start = path.contour_start(contour_index)?;
    let end = path.contour_end(contour_index);
    if contour_point_index > end - start {
        return Err(ChangeError::IndexOutOfRange {
            index: contour_point_index,
            len: end - start,
            path: "contour".to_owned(),
        });
    }
    let absolute = start + contour_point_index;

    path.coordinates.splice(absolute * 2..absolute * 2, [x, y]);
    path.point_types.insert(absolute, point_type);
    path.shift_end_points(contour_index, 1);
    path.store(subject)
}

fn delete_point(subject: &mut Value, arguments: &[Value]) -> ChangeResult<()> {
    let contour_index = usize_arg(arguments, 0, "deletePoint")?;
    let contour_point_index = usize_arg(arguments, 1, "deletePoint")?;

    let mut path = PackedPath::parse(subject)?;
    let start = path.contour_start(contour_index)?;
    let end = path.contour_end(contour_index);
    if contour_point_index >= end - start {
        return Err(ChangeError::IndexOutOfRange {
            index: contour_point_index,
            len: end - start,
            path: "contour".to_owned(),
        });
    }
    let absolute = start + contour_point_index;

    path.coordinates.drain(absolute * 2..absolute * 2 + 2);
    path.point_types.remove(absolute);
    path.shift_end_points(contour_index, -1);
    path.store(subject)
}

fn usize_arg(arguments: &[Value], position: usize, function: &str) -> ChangeResult<usize> {
    arguments
        .get(position)
        .and_then(Value::as_u64)
        .map(|index| index as usize)
        .ok_or_else(|| {
            ChangeError::bad_arguments(function, format!("argument {position} must be an index"))
        })
}

fn f64_arg(arguments: &[Value], position: usize, function: &str) -> ChangeResult<f64> {
    arguments
        .get(position)
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            ChangeError::bad_arguments(function, format!("argument {position} must be a number"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply_change;
    use crate::change::Change;
    use serde_json::json;

    fn square_path() -> Value {
        json!({
            "coordinates": [0.0, 0.0, 0.0, 100.0, 100.0, 100.0, 100.0, 0.0],
            "pointTypes": [0, 0, 0, 0],
            "contourInfo": [{"endPoint": 3, "isClosed": true}],
        })
    }

    fn glyph_with_path() -> Value {
        json!({"glyphs": {"A": {"path": square_path()}}})
    }

    fn apply(subject: &mut Value, wire: Value) {
        let change: Change = serde_json::from_value(wire).unwrap();
        apply_change(subject, &change, &OutlineFunctions).unwrap();
    }

    #[test]
    fn set_point_position() {
        let mut font = glyph_with_path();
        apply(
            &mut font,
            json!({"p": ["glyphs", "A", "path"], "f": "=xy", "a": [1, 10, 110]}),
        );
        let coordinates = &font["glyphs"]["A"]["path"]["coordinates"];
        assert_eq!(coordinates[2], json!(10.0));
        assert_eq!(coordinates[3], json!(110.0));
    }

    #[test]
    fn insert_and_delete_contour() {
        let mut font = glyph_with_path();
        apply(
            &mut font,
            json!({"p": ["glyphs", "A", "path"], "f": "insertContour", "a": [1, {
                "coordinates": [10.0, 10.0, 20.0, 20.0],
                "pointTypes": [0, 0],
                "isClosed": false,
            }]}),
        );
        let info = &font["glyphs"]["A"]["path"]["contourInfo"];
        assert_eq!(info, &json!([
            {"endPoint": 3, "isClosed": true},
            {"endPoint": 5, "isClosed": false},
        ]));

        apply(
            &mut font,
            json!({"p": ["glyphs", "A", "path"], "f": "deleteContour", "a": [0]}),
        );
        let path_value = &font["glyphs"]["A"]["path"];
        assert_eq!(path_value["contourInfo"], json!([{"endPoint": 1, "isClosed": false}]));
        assert_eq!(path_value["pointTypes"], json!([0, 0]));
        assert_eq!(path_value["coordinates"], json!([10.0, 10.0, 20.0, 20.0]));
    }

    #[test]
    fn insert_and_delete_point() {
        let mut font = glyph_with_path();
        apply(
            &mut font,
            json!({"p": ["glyphs", "A", "path"], "f": "insertPoint", "a": [0, 1, {
                "x": 50.0, "y": 50.0, "type": "cubic", "smooth": true,
            }]}),
        );
        let path_value = &font["glyphs"]["A"]["path"];
        assert_eq!(path_value["pointTypes"], json!([0, 10, 0, 0, 0]));
        assert_eq!(path_value["contourInfo"], json!([{"endPoint": 4, "isClosed": true}]));
        assert_eq!(path_value["coordinates"][2], json!(50.0));

        apply(
            &mut font,
            json!({"p": ["glyphs", "A", "path"], "f": "deletePoint", "a": [0, 1]}),
        );
        let path_value = &font["glyphs"]["A"]["path"];
        assert_eq!(path_value["pointTypes"], json!([0, 0, 0, 0]));
        assert_eq!(path_value["contourInfo"], json!([{"endPoint": 3, "isClosed": true}]));
    }

    #[test]
    fn unknown_outline_function() {
        let mut font = glyph_with_path();
        let change: Change = serde_json::from_value(
            json!({"p": ["glyphs", "A", "path"], "f": "reverseContour", "a": [0]}),
        )
        .unwrap();
        assert!(matches!(
            apply_change(&mut font, &change, &OutlineFunctions),
            Err(ChangeError::UnknownFunction { .. })
        ));
    }
}
