//! Casting raw storage values to a property's semantic type.
//!
//! Casting is total and idempotent: every input produces a value, and casting
//! an already cast value returns it unchanged. Drivers hand back whatever
//! their storage produced (often text), so hydration and `refresh` cast every
//! column through here.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::property::PropertyType;
use crate::value::Value;

const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl PropertyType {
    /// Casts `value` to this type. `Null` always stays `Null`.
    pub fn cast(self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match self {
            PropertyType::String | PropertyType::Enum => cast_text(value),
            PropertyType::Integer => cast_integer(value),
            PropertyType::Float => cast_float(value),
            PropertyType::Boolean => cast_boolean(value),
            PropertyType::Date => cast_date(value),
            PropertyType::Array => cast_json(value, true),
            PropertyType::Object => cast_json(value, false),
        }
    }
}

fn cast_text(value: Value) -> Value {
    match value {
        Value::Text(_) => value,
        other => Value::Text(other.to_string()),
    }
}

fn cast_integer(value: Value) -> Value {
    match value {
        Value::Int(_) => value,
        Value::Timestamp(ts) => Value::Int(ts),
        Value::Bool(b) => Value::Int(i64::from(b)),
        Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map_or(Value::Int(0), Value::Int)
        }
        _ => Value::Int(0),
    }
}

fn cast_float(value: Value) -> Value {
    let f = match &value {
        Value::Float(f) => *f,
        Value::Int(i) | Value::Timestamp(i) => *i as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Value::Float(if f.is_finite() { f } else { 0.0 })
}

fn cast_boolean(value: Value) -> Value {
    match value {
        Value::Bool(_) => value,
        Value::Int(i) | Value::Timestamp(i) => Value::Bool(i != 0),
        Value::Float(f) => Value::Bool(f != 0.0),
        Value::Text(s) => Value::Bool(parse_bool(&s).unwrap_or(!s.is_empty())),
        Value::Array(items) => Value::Bool(!items.is_empty()),
        Value::Object(map) => Value::Bool(!map.is_empty()),
        Value::Null => Value::Null,
    }
}

fn cast_date(value: Value) -> Value {
    match value {
        Value::Timestamp(_) => value,
        Value::Int(i) => Value::Timestamp(i),
        Value::Float(f) if f.is_finite() => Value::Timestamp(f.trunc() as i64),
        Value::Text(s) => match parse_timestamp(&s) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::Text(s),
        },
        other => other,
    }
}

/// Arrays and objects travel through drivers as JSON text.
fn cast_json(value: Value, array: bool) -> Value {
    match value {
        Value::Text(s) => match serde_json::from_str::<serde_json::Value>(&s) {
            Ok(json @ serde_json::Value::Array(_)) if array => Value::from(json),
            Ok(json @ serde_json::Value::Object(_)) if !array => Value::from(json),
            _ => Value::Text(s),
        },
        other => other,
    }
}

/// Parses the textual booleans accepted from forms and storage.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Parses a Unix timestamp from integer text, RFC 3339, `Y-m-d H:M:S`
/// (with a space or `T`) or a bare `Y-m-d` date. Naive forms are read as UTC.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = s.parse::<i64>() {
        return Some(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for format in [DB_TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

/// Formats a Unix timestamp as `Y-m-d H:M:S` (UTC), the storage text form.
pub fn format_db_timestamp(ts: i64) -> Option<String> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.format(DB_TIMESTAMP_FORMAT).to_string())
}

/// Current Unix time in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Prepares a cast value for storage: arrays and objects become JSON text.
pub fn to_storage(ty: PropertyType, value: Value) -> Value {
    match (ty, value) {
        (PropertyType::Array | PropertyType::Object, v @ (Value::Array(_) | Value::Object(_))) => {
            Value::Text(v.to_json().to_string())
        }
        (_, v) => v,
    }
}
