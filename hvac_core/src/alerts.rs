//! Threshold alerts with per-(unit, alert type) cooldown.

use std::collections::HashMap;
use std::fmt;

use hvac_traits::FieldMap;
use serde::Serialize;

use crate::coerce;
use crate::config::AlertPolicy;
use crate::control::{air_handler, boiler, chiller, fan_coil, pump};
use crate::kind::Kind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub alert_type: String,
    pub message: String,
}

/// Primary temperature watched for threshold alerts, by kind.
fn watched_keys(kind: Kind) -> Option<&'static [&'static str]> {
    match kind {
        Kind::Boiler => Some(boiler::SUPPLY_KEYS),
        Kind::Chiller => Some(chiller::CHW_KEYS),
        Kind::AirHandler => Some(air_handler::SAT_KEYS),
        Kind::Pump => Some(pump::TEMP_KEYS),
        Kind::FanCoil => Some(fan_coil::SPACE_KEYS),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct AlertTracker {
    policy: AlertPolicy,
    last_sent: HashMap<(String, String), u64>,
}

impl AlertTracker {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            last_sent: HashMap::new(),
        }
    }

    /// Threshold check on the unit's primary temperature. Critical wins over warning.
    pub fn thresholds(&self, kind: Kind, metrics: &FieldMap) -> Option<Alert> {
        let t = self.policy.thresholds.get(&kind)?;
        let temp = coerce::first_number(metrics, watched_keys(kind)?)?;
        if temp >= t.critical {
            Some(Alert {
                severity: Severity::Critical,
                alert_type: "critical_temperature".into(),
                message: format!("{kind} temperature {temp:.1}F at or above critical {:.1}F", t.critical),
            })
        } else if temp >= t.high {
            Some(Alert {
                severity: Severity::Warning,
                alert_type: "high_temperature".into(),
                message: format!("{kind} temperature {temp:.1}F at or above {:.1}F", t.high),
            })
        } else {
            None
        }
    }

    /// Drop alerts still inside their cooldown window; record the rest as sent.
    pub fn admit(&mut self, equipment_id: &str, alerts: Vec<Alert>, now_ms: u64) -> Vec<Alert> {
        let cooldown = self.policy.cooldown_ms;
        alerts
            .into_iter()
            .filter(|a| {
                let key = (equipment_id.to_string(), a.alert_type.clone());
                match self.last_sent.get(&key) {
                    Some(&t) if now_ms.saturating_sub(t) < cooldown => false,
                    _ => {
                        self.last_sent.insert(key, now_ms);
                        true
                    }
                }
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.last_sent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_traits::MetricValue;

    fn metrics(k: &str, v: f64) -> FieldMap {
        let mut m = FieldMap::new();
        m.insert(k.into(), MetricValue::Number(v));
        m
    }

    #[test]
    fn critical_before_warning() {
        let t = AlertTracker::new(AlertPolicy::default());
        let a = t.thresholds(Kind::Boiler, &metrics("H2OSupply", 205.0)).unwrap();
        assert_eq!(a.severity, Severity::Critical);
        let a = t.thresholds(Kind::Boiler, &metrics("H2OSupply", 185.0)).unwrap();
        assert_eq!(a.severity, Severity::Warning);
        assert!(t.thresholds(Kind::Boiler, &metrics("H2OSupply", 150.0)).is_none());
    }

    #[test]
    fn kinds_without_thresholds_are_quiet() {
        let t = AlertTracker::new(AlertPolicy::default());
        assert!(t.thresholds(Kind::StagedHeatPump, &metrics("LoopTemp", 99.0)).is_none());
    }

    #[test]
    fn cooldown_suppresses_repeats() {
        let mut t = AlertTracker::new(AlertPolicy::default());
        let a = t.thresholds(Kind::Chiller, &metrics("CHWSupply", 56.0)).unwrap();
        assert_eq!(t.admit("ch-1", vec![a.clone()], 0).len(), 1);
        assert_eq!(t.admit("ch-1", vec![a.clone()], 60_000).len(), 0);
        assert_eq!(t.admit("ch-2", vec![a.clone()], 60_000).len(), 1);
        assert_eq!(t.admit("ch-1", vec![a], 300_000).len(), 1);
    }
}
