//! Control functions, one canonical algorithm per equipment kind.
//!
//! A control function sees the unit's metrics, resolved settings and last
//! commanded values through `ControlContext`, keeps all cross-cycle memory in
//! `UnitState`, and returns a `ControlResult`. Expected faults come back as
//! `ControlFault`; the dispatcher turns those into a safe state.

pub mod air_handler;
pub mod boiler;
pub mod chiller;
pub mod doas;
pub mod fan_coil;
pub mod heat_pump;
pub mod pump;

use hvac_traits::{FieldMap, MetricValue};

use crate::alerts::{Alert, Severity};
use crate::coerce;
use crate::config::Tuning;
use crate::error::ControlFault;
use crate::kind::Kind;
use crate::lead_lag::LeadLagDecision;
use crate::store::UnitState;

/// The unit under evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentRef {
    pub equipment_id: String,
    pub site_id: String,
    /// Raw type string as it came from the directory.
    pub equipment_type: String,
    pub kind: Option<Kind>,
}

/// Read-only inputs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ControlContext<'a> {
    pub equipment: &'a EquipmentRef,
    pub metrics: &'a FieldMap,
    pub settings: &'a FieldMap,
    /// Last commanded values for this unit.
    pub current: &'a FieldMap,
    pub tuning: &'a Tuning,
    pub lead_lag: Option<&'a LeadLagDecision>,
    pub now_ms: u64,
    pub dt_secs: f64,
}

impl ControlContext<'_> {
    /// Number from metrics first, then settings.
    pub fn reading(&self, keys: &[&str]) -> Option<f64> {
        coerce::first_number(self.metrics, keys).or_else(|| coerce::first_number(self.settings, keys))
    }

    pub fn setting(&self, key: &str, default: f64) -> f64 {
        coerce::as_number(self.settings.get(key), default)
    }

    pub fn setting_opt(&self, key: &str) -> Option<f64> {
        self.settings.get(key).and_then(coerce::number)
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        coerce::as_bool(self.settings.get(key), default)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        coerce::first_text(self.settings, &[key])
    }

    pub fn current_number(&self, key: &str, default: f64) -> f64 {
        coerce::as_number(self.current.get(key), default)
    }

    pub fn current_flag(&self, key: &str, default: bool) -> bool {
        coerce::as_bool(self.current.get(key), default)
    }

    pub fn outdoor_temp(&self) -> Option<f64> {
        self.reading(OUTDOOR_KEYS)
    }

    /// Operator enable gated by the unit's lead-lag role.
    ///
    /// A lag member that should not run is disabled unless `unitEnableOverride`
    /// is set explicitly, in which case the override decides.
    pub fn gated_enable(&self, requested: bool) -> bool {
        if let Some(ov) = self.settings.get("unitEnableOverride").and_then(coerce::boolean) {
            return ov;
        }
        match self.lead_lag {
            Some(ll) if !ll.should_run => false,
            _ => requested,
        }
    }
}

pub const OUTDOOR_KEYS: &[&str] = &[
    "outdoorTemp",
    "OutdoorTemp",
    "Outdoor_Air_Temp",
    "Outdoor_Air",
    "outdoor_temp",
    "OAT",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlResult {
    pub outputs: FieldMap,
    pub emergency: Option<String>,
    pub alerts: Vec<Alert>,
    /// Produced by the dispatcher after a fault, not by the algorithm.
    pub safe_state: bool,
}

impl ControlResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, v: impl Into<MetricValue>) -> &mut Self {
        self.outputs.insert(key.to_string(), v.into());
        self
    }

    /// Percent output rounded to one decimal.
    pub fn set_percent(&mut self, key: &str, v: f64) -> &mut Self {
        self.set(key, (v * 10.0).round() / 10.0)
    }

    pub fn emergency_shutdown(&mut self, reason: impl Into<String>) -> &mut Self {
        let reason = reason.into();
        self.set("emergencyShutdown", true);
        self.set("shutdownReason", reason.as_str());
        self.emergency = Some(reason);
        self
    }

    pub fn alert(&mut self, severity: Severity, alert_type: &str, message: impl Into<String>) {
        self.alerts.push(Alert {
            severity,
            alert_type: alert_type.to_string(),
            message: message.into(),
        });
    }

    /// Record the lead-lag role on the result.
    pub fn lead_lag(&mut self, ll: Option<&LeadLagDecision>) -> &mut Self {
        if let Some(ll) = ll {
            self.set("isLead", ll.is_lead);
            self.set("leadLagReason", ll.reason.as_str());
        }
        self
    }

    /// Ensure an explicit `emergencyShutdown=false` when no emergency fired.
    pub fn finish(mut self) -> Self {
        if self.emergency.is_none() {
            self.outputs
                .entry("emergencyShutdown".to_string())
                .or_insert(MetricValue::Bool(false));
        }
        self
    }
}

pub type ControlFn = fn(&ControlContext<'_>, &mut UnitState) -> Result<ControlResult, ControlFault>;

/// A named control function.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub kind: Kind,
    pub run: ControlFn,
}

pub const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "boiler",
        kind: Kind::Boiler,
        run: boiler::run,
    },
    Strategy {
        name: "boiler-staged",
        kind: Kind::Boiler,
        run: boiler::run_staged,
    },
    Strategy {
        name: "pump",
        kind: Kind::Pump,
        run: pump::run,
    },
    Strategy {
        name: "chiller",
        kind: Kind::Chiller,
        run: chiller::run,
    },
    Strategy {
        name: "air-handler",
        kind: Kind::AirHandler,
        run: air_handler::run,
    },
    Strategy {
        name: "fan-coil",
        kind: Kind::FanCoil,
        run: fan_coil::run,
    },
    Strategy {
        name: "doas",
        kind: Kind::Doas,
        run: doas::run,
    },
    Strategy {
        name: "staged-heat-pump",
        kind: Kind::StagedHeatPump,
        run: heat_pump::run,
    },
];

pub fn strategy_by_name(name: &str) -> Option<Strategy> {
    STRATEGIES.iter().copied().find(|s| s.name == name)
}

/// Conservative outputs after a fault: everything de-energized and disabled,
/// setpoints at the built-in defaults for `raw_type`.
pub fn safe_outputs(kind: Option<Kind>, raw_type: &str, stages: usize) -> FieldMap {
    let mut r = ControlResult::new();
    r.set("unitEnable", false);
    let defaults = kind.map(|k| crate::defaults::apply_defaults(k, raw_type, None));
    let default_of = |keys: &[&str]| defaults.as_ref().and_then(|d| coerce::first_number(d, keys));
    match kind {
        Some(Kind::Boiler) => {
            r.set("firing", 0.0);
            if let Some(sp) = default_of(&["waterTempSetpoint", "oarMinSupply"]) {
                r.set("supplySetpoint", sp);
            }
        }
        Some(Kind::Pump) => {
            r.set("pumpSpeed", 0.0);
        }
        Some(Kind::Chiller) => {
            r.set("chillerEnabled", false);
            if let Some(sp) = default_of(&["chilledWaterSetpoint"]) {
                r.set("chilledWaterSetpoint", sp);
            }
        }
        Some(Kind::AirHandler) => {
            if let Some(sp) = default_of(&["sarMaxSupply"]) {
                r.set("activeSupplyAirSetpoint", sp);
            }
            r.set("fanEnabled", false)
                .set("heatingValvePosition", 0.0)
                .set("coolingValvePosition", 0.0)
                .set("outdoorDamperPosition", 0.0);
        }
        Some(Kind::FanCoil) => {
            if let Some(sp) = default_of(&["temperatureSetpoint"]) {
                r.set("temperatureSetpoint", sp);
            }
            r.set("fanEnabled", false)
                .set("heatingValvePosition", 0.0)
                .set("coolingValvePosition", 0.0);
        }
        Some(Kind::Doas) => {
            if let Some(sp) = default_of(&["supplyAirSetpoint"]) {
                r.set("supplyAirSetpoint", sp);
            }
            r.set("fanEnabled", false)
                .set("heatingEnabled", false)
                .set("heatingValvePosition", 0.0);
            for k in 1..=stages {
                r.set(&format!("coolingStage{k}Enabled"), false);
            }
        }
        Some(Kind::StagedHeatPump) => {
            if let Some(sp) = default_of(&["targetSetpoint"]) {
                r.set("targetSetpoint", sp);
            }
            for k in 1..=stages {
                r.set(&format!("stage{k}Enabled"), false);
            }
            r.set("activeStages", 0.0);
        }
        Some(Kind::MechanicalRoom | Kind::SteamBundle) | None => {}
    }
    r.outputs
}

/// Stage enables as `prefix{k}Enabled` outputs.
pub(crate) fn stage_outputs(r: &mut ControlResult, prefix: &str, mem: &crate::staging::StagingMemory) {
    for (i, s) in mem.stages.iter().enumerate() {
        r.set(&format!("{prefix}{}Enabled", i + 1), s.enabled);
    }
}

/// Linear reset between two outdoor temperatures: `supply_at_min` at or below
/// `min_outdoor`, `supply_at_max` at or above `max_outdoor`.
pub fn reset_schedule(outdoor: f64, min_outdoor: f64, max_outdoor: f64, supply_at_min: f64, supply_at_max: f64) -> f64 {
    if max_outdoor <= min_outdoor || outdoor <= min_outdoor {
        return supply_at_min;
    }
    if outdoor >= max_outdoor {
        return supply_at_max;
    }
    let frac = (outdoor - min_outdoor) / (max_outdoor - min_outdoor);
    supply_at_min + frac * (supply_at_max - supply_at_min)
}
