//! Typed access to heterogeneous field values.
//!
//! Field data arrives as numbers, numeric strings, booleans, and boolean-like
//! strings ("on", "yes", "1"). Every control function reads through these
//! helpers with an explicit default instead of ad hoc truthiness checks.

use hvac_traits::{FieldMap, MetricValue};

/// Parse a value as a finite number. `None` for NaN/inf and non-numeric strings.
pub fn number(v: &MetricValue) -> Option<f64> {
    match v {
        MetricValue::Number(n) if n.is_finite() => Some(*n),
        MetricValue::Number(_) => None,
        MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        MetricValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
    }
}

/// Parse a value as a boolean. `None` when the value is not boolean-like.
pub fn boolean(v: &MetricValue) -> Option<bool> {
    match v {
        MetricValue::Bool(b) => Some(*b),
        MetricValue::Number(n) if n.is_finite() => Some(*n != 0.0),
        MetricValue::Number(_) => None,
        MetricValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" | "enabled" | "running" => Some(true),
            "false" | "off" | "no" | "0" | "disabled" | "stopped" | "" => Some(false),
            other => other.parse::<f64>().ok().map(|n| n != 0.0),
        },
    }
}

/// Numeric value or `default`. Malformed values are logged, absent ones are not.
pub fn as_number(v: Option<&MetricValue>, default: f64) -> f64 {
    match v {
        None => default,
        Some(v) => number(v).unwrap_or_else(|| {
            tracing::warn!(value = %v, default, "malformed numeric value, using default");
            default
        }),
    }
}

/// Boolean value or `default`. Malformed values are logged, absent ones are not.
pub fn as_bool(v: Option<&MetricValue>, default: bool) -> bool {
    match v {
        None => default,
        Some(v) => boolean(v).unwrap_or_else(|| {
            tracing::warn!(value = %v, default, "malformed boolean value, using default");
            default
        }),
    }
}

/// First numeric value found under any of `keys`, in order.
pub fn first_number(map: &FieldMap, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| map.get(*k).and_then(number))
}

/// First boolean value found under any of `keys`, in order.
pub fn first_bool(map: &FieldMap, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| map.get(*k).and_then(boolean))
}

/// First text value found under any of `keys`, in order.
pub fn first_text<'a>(map: &'a FieldMap, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(MetricValue::Text(s)) => Some(s.as_str()),
        _ => None,
    })
}

/// Numeric lookup through alias keys, falling back to `default`.
pub fn number_or(map: &FieldMap, keys: &[&str], default: f64) -> f64 {
    first_number(map, keys).unwrap_or(default)
}

/// Boolean lookup through alias keys, falling back to `default`.
pub fn bool_or(map: &FieldMap, keys: &[&str], default: bool) -> bool {
    first_bool(map, keys).unwrap_or(default)
}
