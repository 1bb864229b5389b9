//! Defensive field access over untyped JSON.
//!
//! Every accessor type-checks and range-checks, returning `None` instead of a
//! sentinel. Nothing here can panic on arbitrary input.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Epoch values above this are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Borrow `key` of `value` as an object.
pub fn object<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a Map<String, Value>> {
    value?.get(key)?.as_object()
}

/// First present value among `keys`.
pub fn first<'a>(map: Option<&'a Map<String, Value>>, keys: &[&str]) -> Option<&'a Value> {
    let map = map?;
    keys.iter()
        .find_map(|key| map.get(*key).filter(|value| !value.is_null()))
}

/// Finite number. Numeric strings are accepted.
#[must_use]
pub fn finite(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Non-negative integer (backend versions).
#[must_use]
pub fn unsigned(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Non-empty trimmed string.
#[must_use]
pub fn text(value: Option<&Value>) -> Option<String> {
    let trimmed = value?.as_str()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Strict boolean: only JSON `true` counts.
#[must_use]
pub fn flag(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

/// RFC 3339 string or epoch seconds/milliseconds.
#[must_use]
pub fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        number @ Value::Number(_) => {
            let raw = finite(Some(number))?;
            if raw < 0.0 {
                return None;
            }
            let millis = if raw >= EPOCH_MILLIS_THRESHOLD {
                raw
            } else {
                raw * 1000.0
            };
            if millis > i64::MAX as f64 {
                return None;
            }
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

/// Array of finite numbers. `None` when absent, not an array, or no finite
/// element survives.
#[must_use]
pub fn finite_array(value: Option<&Value>) -> Option<Vec<f64>> {
    let values: Vec<f64> = value?
        .as_array()?
        .iter()
        .filter_map(|item| finite(Some(item)))
        .collect();
    (!values.is_empty()).then_some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finite_rejects_non_numbers() {
        assert_eq!(finite(Some(&json!(1.5))), Some(1.5));
        assert_eq!(finite(Some(&json!(" 2.25 "))), Some(2.25));
        assert_eq!(finite(Some(&json!("NaN"))), None);
        assert_eq!(finite(Some(&json!("inf"))), None);
        assert_eq!(finite(Some(&json!(true))), None);
        assert_eq!(finite(Some(&json!(null))), None);
        assert_eq!(finite(None), None);
    }

    #[test]
    fn text_trims_and_rejects_empty() {
        assert_eq!(text(Some(&json!("  hi "))), Some("hi".to_string()));
        assert_eq!(text(Some(&json!("   "))), None);
        assert_eq!(text(Some(&json!(3))), None);
    }

    #[test]
    fn flag_is_strict() {
        assert!(flag(Some(&json!(true))));
        assert!(!flag(Some(&json!("true"))));
        assert!(!flag(Some(&json!(1))));
        assert!(!flag(None));
    }

    #[test]
    fn timestamp_formats() {
        let rfc = timestamp(Some(&json!("2025-01-06T14:30:00Z"))).unwrap();
        let secs = timestamp(Some(&json!(1_736_173_800))).unwrap();
        let millis = timestamp(Some(&json!(1_736_173_800_000_i64))).unwrap();
        assert_eq!(rfc, secs);
        assert_eq!(secs, millis);
        assert!(timestamp(Some(&json!("yesterday"))).is_none());
        assert!(timestamp(Some(&json!(-5))).is_none());
        assert!(timestamp(Some(&json!(1e300))).is_none());
    }

    #[test]
    fn finite_array_filters() {
        assert_eq!(
            finite_array(Some(&json!([1, "2", null, "x", 3.5]))),
            Some(vec![1.0, 2.0, 3.5])
        );
        assert_eq!(finite_array(Some(&json!([null, "x"]))), None);
        assert_eq!(finite_array(Some(&json!({"a": 1}))), None);
    }

    #[test]
    fn first_skips_nulls() {
        let value = json!({"a": null, "b": 2});
        let map = value.as_object();
        assert_eq!(first(map, &["a", "b"]), Some(&json!(2)));
        assert_eq!(first(map, &["c"]), None);
    }
}
