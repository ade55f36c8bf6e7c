//! Field values: text conversion, JSON validation and nested assignment.
//!
//! Messages travel as JSON objects. Everything that lands in one goes
//! through this module, so the backend only ever sees values that match the
//! declared field types.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::routing::schema::{FieldDescriptor, FieldKind, ScalarKind, Schema};

/// Convert one text value (path segment or query value) to a JSON scalar.
pub fn parse_scalar(kind: ScalarKind, text: &str) -> Result<Value, String> {
    let invalid = || format!("invalid {} value '{}'", kind.name(), text);

    match kind {
        ScalarKind::String => Ok(Value::String(text.to_string())),
        ScalarKind::Bool => match text {
            "true" | "True" | "TRUE" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "False" | "FALSE" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        ScalarKind::Int32 => text.parse::<i32>().map(Value::from).map_err(|_| invalid()),
        ScalarKind::Int64 => text.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        ScalarKind::UInt32 => text.parse::<u32>().map(Value::from).map_err(|_| invalid()),
        ScalarKind::UInt64 => text.parse::<u64>().map(Value::from).map_err(|_| invalid()),
        ScalarKind::Float | ScalarKind::Double => text
            .parse::<f64>()
            .ok()
            .filter(|v| kind != ScalarKind::Float || fits_f32(*v))
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        ScalarKind::Bytes => normalize_base64(text).map(Value::String).ok_or_else(invalid),
    }
}

/// Validate a JSON value against a field and normalize it.
///
/// `null` is handled by the caller (it means "unset").
pub fn coerce_field(schema: &Schema, field: &FieldDescriptor, value: Value) -> Result<Value, String> {
    if field.repeated {
        let Value::Array(items) = value else {
            return Err(format!("field '{}' expects an array", field.name));
        };
        return items
            .into_iter()
            .map(|item| coerce_single(schema, field, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    coerce_single(schema, field, value)
}

/// Validate a JSON object against a message type. Unknown fields are rejected.
pub fn coerce_message(schema: &Schema, message: &str, value: Value) -> Result<Map<String, Value>, String> {
    let descriptor = schema
        .message(message)
        .ok_or_else(|| format!("unknown message type '{message}'"))?;
    let Value::Object(object) = value else {
        return Err(format!("expected a JSON object for {message}"));
    };

    let mut out = Map::new();
    for (name, value) in object {
        let field = descriptor
            .field(&name)
            .ok_or_else(|| format!("unknown field '{name}' in {message}"))?;
        if value.is_null() {
            continue;
        }
        out.insert(name, coerce_field(schema, field, value)?);
    }
    Ok(out)
}

fn coerce_single(schema: &Schema, field: &FieldDescriptor, value: Value) -> Result<Value, String> {
    match &field.kind {
        FieldKind::Message(message) => coerce_message(schema, message, value).map(Value::Object),
        FieldKind::Scalar(kind) => coerce_scalar(*kind, value)
            .map_err(|e| format!("field '{}': {e}", field.name)),
    }
}

fn coerce_scalar(kind: ScalarKind, value: Value) -> Result<Value, String> {
    let mismatch = |value: &Value| format!("expected {}, got {}", kind.name(), json_type(value));

    match (kind, value) {
        (ScalarKind::String, v @ Value::String(_)) => Ok(v),
        (ScalarKind::Bool, v @ Value::Bool(_)) => Ok(v),
        (ScalarKind::Bytes, Value::String(s)) => parse_scalar(kind, &s),
        (ScalarKind::Double, v @ Value::Number(_)) => Ok(v),
        (ScalarKind::Float, Value::Number(n)) => {
            if n.as_f64().is_some_and(fits_f32) {
                Ok(Value::Number(n))
            } else {
                Err(format!("{n} is not a valid {}", kind.name()))
            }
        }
        (
            ScalarKind::Int32 | ScalarKind::Int64 | ScalarKind::UInt32 | ScalarKind::UInt64,
            Value::Number(n),
        ) => {
            let in_range = match kind {
                ScalarKind::Int32 => n.as_i64().is_some_and(|v| i32::try_from(v).is_ok()),
                ScalarKind::Int64 => n.as_i64().is_some(),
                ScalarKind::UInt32 => n.as_u64().is_some_and(|v| u32::try_from(v).is_ok()),
                _ => n.as_u64().is_some(),
            };
            if in_range {
                Ok(Value::Number(n))
            } else {
                Err(format!("{n} is not a valid {}", kind.name()))
            }
        }
        // 64-bit integers (and floats) may arrive quoted.
        (
            ScalarKind::Int32
            | ScalarKind::Int64
            | ScalarKind::UInt32
            | ScalarKind::UInt64
            | ScalarKind::Float
            | ScalarKind::Double,
            Value::String(s),
        ) => parse_scalar(kind, &s),
        (_, other) => Err(mismatch(&other)),
    }
}

/// Finite and within `f32` range; precision loss is accepted.
fn fits_f32(value: f64) -> bool {
    value.is_finite() && value.abs() <= f64::from(f32::MAX)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accept standard or URL-safe base64, padded or not; return standard form.
fn normalize_base64(text: &str) -> Option<String> {
    [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .map(|bytes| STANDARD.encode(bytes))
}

/// Set `path` in `message`, creating intermediate objects.
pub fn set_field(message: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = message;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

/// Read `path` from a message.
pub fn get_field<'a>(message: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(message, |current, segment| current.get(segment))
}
