//! Built-in control settings per equipment kind.
//!
//! `apply_defaults` is a pure function of kind, raw type and the site's
//! configured overrides. It is the lowest-precedence layer of settings
//! resolution and also seeds an empty control cache.

use hvac_traits::{FieldMap, MetricValue};

use crate::kind::{Kind, fold_type};

fn put(m: &mut FieldMap, k: &str, v: impl Into<MetricValue>) {
    m.insert(k.to_string(), v.into());
}

/// Loop served by a pump, from its raw type: chilled/condenser water pumps cool.
pub fn pump_loop_type(raw_type: &str) -> &'static str {
    let t = fold_type(raw_type);
    if t.starts_with("cw") || t.starts_with("chw") || t.contains("chill") || t.contains("condenser")
    {
        "cooling"
    } else {
        "heating"
    }
}

/// Boiler duty from its raw type.
pub fn boiler_type(raw_type: &str) -> &'static str {
    let t = fold_type(raw_type);
    if t.contains("domestic") || t.contains("dhw") {
        "domestic"
    } else {
        "comfort"
    }
}

pub fn apply_defaults(kind: Kind, raw_type: &str, site: Option<&FieldMap>) -> FieldMap {
    let mut m = FieldMap::new();
    put(&mut m, "enabled", true);
    match kind {
        Kind::Boiler => {
            put(&mut m, "boilerType", boiler_type(raw_type));
            put(&mut m, "deadband", 5.0);
            put(&mut m, "highLimit", 200.0);
            put(&mut m, "oarMinOutdoor", 32.0);
            put(&mut m, "oarMaxOutdoor", 72.0);
            put(&mut m, "oarMaxSupply", 180.0);
            put(&mut m, "oarMinSupply", 120.0);
            if boiler_type(raw_type) == "domestic" {
                put(&mut m, "waterTempSetpoint", 140.0);
            }
        }
        Kind::Pump => {
            put(&mut m, "loopType", pump_loop_type(raw_type));
            put(&mut m, "fixedSpeed", 75.0);
            put(&mut m, "heatingEnableOutdoor", 60.0);
            put(&mut m, "coolingEnableOutdoor", 55.0);
        }
        Kind::Chiller => {
            put(&mut m, "chilledWaterSetpoint", 44.0);
            put(&mut m, "deadband", 2.0);
            put(&mut m, "outdoorLockout", 50.0);
            put(&mut m, "freezeLimit", 36.0);
        }
        Kind::AirHandler => {
            put(&mut m, "occupied", true);
            put(&mut m, "sarMinOutdoor", 50.0);
            put(&mut m, "sarMaxOutdoor", 70.0);
            put(&mut m, "sarMaxSupply", 65.0);
            put(&mut m, "sarMinSupply", 55.0);
            put(&mut m, "freezestatLimit", 40.0);
            put(&mut m, "coolingLockout", 55.0);
            put(&mut m, "economizerLow", 45.0);
            put(&mut m, "economizerHigh", 65.0);
            put(&mut m, "minOaDamper", 20.0);
        }
        Kind::FanCoil => {
            put(&mut m, "temperatureSetpoint", 72.0);
            put(&mut m, "deadband", 1.0);
            put(&mut m, "heatingLockout", 65.0);
            put(&mut m, "coolingLockout", 55.0);
        }
        Kind::Doas => {
            put(&mut m, "supplyAirSetpoint", 65.0);
            put(&mut m, "deadband", 2.0);
            put(&mut m, "heatingLockout", 65.0);
            put(&mut m, "coolingLockout", 60.0);
        }
        Kind::StagedHeatPump => {
            put(&mut m, "targetSetpoint", 45.0);
            put(&mut m, "mode", "auto");
        }
        Kind::MechanicalRoom | Kind::SteamBundle => {}
    }
    if let Some(overrides) = site {
        for (k, v) in overrides {
            m.insert(k.clone(), v.clone());
        }
    }
    m
}

/// Settings that may carry an operator command. Only these are looked up in
/// the command history, which bounds the number of queries per evaluation.
pub fn command_allow_list(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::Boiler => &[
            "enabled",
            "waterTempSetpoint",
            "deadband",
            "leadOverride",
            "unitEnableOverride",
        ],
        Kind::Pump => &[
            "enabled",
            "pressureSetpoint",
            "fixedSpeed",
            "leadOverride",
            "unitEnableOverride",
        ],
        Kind::Chiller => &[
            "enabled",
            "chilledWaterSetpoint",
            "leadOverride",
            "unitEnableOverride",
        ],
        Kind::AirHandler => &["enabled", "occupied", "supplyAirSetpoint"],
        Kind::FanCoil => &["enabled", "temperatureSetpoint", "fanMode"],
        Kind::Doas => &[
            "enabled",
            "supplyAirSetpoint",
            "heatingLockout",
            "coolingLockout",
        ],
        Kind::StagedHeatPump => &["enabled", "targetSetpoint", "mode"],
        Kind::MechanicalRoom | Kind::SteamBundle => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_loop_type_from_raw_type() {
        assert_eq!(pump_loop_type("CW Pump 1"), "cooling");
        assert_eq!(pump_loop_type("chwpump"), "cooling");
        assert_eq!(pump_loop_type("hwpump"), "heating");
        let d = apply_defaults(Kind::Pump, "CHW Pump", None);
        assert_eq!(d["loopType"], MetricValue::from("cooling"));
    }

    #[test]
    fn domestic_boiler_has_fixed_setpoint() {
        let d = apply_defaults(Kind::Boiler, "Domestic Boiler", None);
        assert_eq!(d["waterTempSetpoint"], MetricValue::Number(140.0));
        let c = apply_defaults(Kind::Boiler, "Comfort Boiler", None);
        assert!(!c.contains_key("waterTempSetpoint"));
    }

    #[test]
    fn site_overrides_replace_defaults() {
        let mut site = FieldMap::new();
        site.insert("deadband".into(), MetricValue::Number(8.0));
        let d = apply_defaults(Kind::Boiler, "boiler", Some(&site));
        assert_eq!(d["deadband"], MetricValue::Number(8.0));
        assert_eq!(d["highLimit"], MetricValue::Number(200.0));
    }

    #[test]
    fn same_inputs_same_defaults() {
        assert_eq!(
            apply_defaults(Kind::Doas, "doas", None),
            apply_defaults(Kind::Doas, "doas", None)
        );
    }
}
