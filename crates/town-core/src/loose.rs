//! Lenient accessors over loosely-typed documents.
//!
//! Persisted state and external snapshots arrive as arbitrary
//! [`serde_json::Value`] trees. These helpers read a field under any of its
//! accepted spellings and coerce it to the wanted type, returning `None`
//! instead of failing when the value has the wrong shape.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// First present, non-null field among `keys`.
pub fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let object = value.as_object()?;
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !v.is_null())
}

/// A trimmed, non-empty string. Numbers are rendered as strings.
pub fn string(value: &Value, keys: &[&str]) -> Option<String> {
    match field(value, keys)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A signed integer. Accepts integral floats and numeric strings.
pub fn integer(value: &Value, keys: &[&str]) -> Option<i64> {
    field(value, keys).and_then(as_integer)
}

/// A non-negative integer; negatives clamp to zero.
pub fn unsigned(value: &Value, keys: &[&str]) -> Option<u64> {
    integer(value, keys).map(|n| u64::try_from(n.max(0)).unwrap_or(0))
}

/// A boolean. Accepts `"true"`/`"false"` strings.
pub fn boolean(value: &Value, keys: &[&str]) -> Option<bool> {
    match field(value, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A timestamp. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and epoch
/// seconds or milliseconds.
pub fn timestamp(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    field(value, keys).and_then(as_timestamp)
}

/// A calendar date in `YYYY-MM-DD` form, or the date part of a timestamp.
pub fn date(value: &Value, keys: &[&str]) -> Option<NaiveDate> {
    let raw = field(value, keys)?;
    if let Some(d) = raw
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    {
        return Some(d);
    }
    as_timestamp(raw).map(|t| t.date_naive())
}

/// An array field, or an empty slice.
pub fn array<'a>(value: &'a Value, keys: &[&str]) -> &'a [Value] {
    field(value, keys)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// An `{x, y}` object with integer coordinates.
pub fn coordinates(value: &Value, keys: &[&str]) -> Option<(i64, i64)> {
    let pos = field(value, keys)?;
    Some((integer(pos, &["x"])?, integer(pos, &["y"])?))
}

/// Coerce a value to an integer.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral_float)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral_float(f: f64) -> Option<i64> {
    let in_range = f.is_finite() && f.abs() < 9.0e15;
    (in_range && f.fract().abs() < f64::EPSILON).then_some(f as i64)
}

/// Coerce a value to a UTC timestamp.
pub fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.unsigned_abs() > EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

/// Parse a timestamp string in any accepted form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn field_accepts_alternate_spellings() {
        let doc = json!({"task_id": "t-1", "taskId": null});
        assert_eq!(string(&doc, &["taskId", "task_id"]), Some("t-1".to_owned()));
    }

    #[test]
    fn integers_from_strings_and_floats() {
        let doc = json!({"a": "12", "b": 3.0, "c": 2.5, "d": -4});
        assert_eq!(integer(&doc, &["a"]), Some(12));
        assert_eq!(integer(&doc, &["b"]), Some(3));
        assert_eq!(integer(&doc, &["c"]), None);
        assert_eq!(unsigned(&doc, &["d"]), Some(0));
    }

    #[test]
    fn extreme_numeric_timestamps_are_rejected() {
        let doc = json!({"min": i64::MIN, "max": i64::MAX});
        assert_eq!(timestamp(&doc, &["min"]), None);
        assert_eq!(timestamp(&doc, &["max"]), None);
    }

    #[test]
    fn timestamps_in_several_forms() {
        let doc = json!({
            "rfc": "2025-03-01T10:00:00Z",
            "plain": "2025-03-01 10:00:00",
            "secs": 1_740_823_200,
            "millis": 1_740_823_200_000_i64,
            "junk": "yesterday-ish",
        });
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).single();
        assert_eq!(timestamp(&doc, &["rfc"]), expected);
        assert_eq!(timestamp(&doc, &["plain"]), expected);
        assert_eq!(timestamp(&doc, &["secs"]), expected);
        assert_eq!(timestamp(&doc, &["millis"]), expected);
        assert_eq!(timestamp(&doc, &["junk"]), None);
    }

    #[test]
    fn coordinates_require_integers() {
        let good = json!({"position": {"x": 3, "y": "4"}});
        let bad = json!({"position": {"x": 1.5, "y": 2}});
        assert_eq!(coordinates(&good, &["position"]), Some((3, 4)));
        assert_eq!(coordinates(&bad, &["position"]), None);
    }

    #[test]
    fn non_objects_yield_nothing() {
        let doc = json!([1, 2, 3]);
        assert!(field(&doc, &["x"]).is_none());
        assert!(array(&doc, &["x"]).is_empty());
    }
}
