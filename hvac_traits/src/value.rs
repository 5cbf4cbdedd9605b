//! Heterogeneous field values shared by every collaborator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single metric or setting value as it arrives from the field.
///
/// Stores hand back numbers, booleans, and strings that may or may not hold a
/// number ("72.5") or a boolean ("on"). Typed access lives in
/// `hvac_core::coerce`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Ordered field-name → value map used for metrics rows, settings, and results.
pub type FieldMap = BTreeMap<String, MetricValue>;

impl MetricValue {
    /// Equality used for change detection: numbers within 1e-9 are the same value.
    pub fn same_as(&self, other: &MetricValue) -> bool {
        match (self, other) {
            (MetricValue::Number(a), MetricValue::Number(b)) => {
                (a - b).abs() <= 1e-9 || (a.is_nan() && b.is_nan())
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Number(v as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}
