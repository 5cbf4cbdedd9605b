//! Air handlers: occupancy, supply-air reset, heating/cooling valves, economizer.

use super::{ControlContext, ControlResult, reset_schedule};
use crate::coerce;
use crate::error::ControlFault;
use crate::pid;
use crate::store::UnitState;

pub const SAT_KEYS: &[&str] = &[
    "Supply_Air_Temp",
    "SupplyAirTemp",
    "SAT",
    "SupplyTemp",
    "supplyTemp",
];

const MIXED_AIR_KEYS: &[&str] = &["Mixed_Air_Temp", "MixedAirTemp", "MAT"];

const OCCUPIED_KEYS: &[&str] = &["occupied", "Occupancy", "occupancy"];

fn supply_air_setpoint(ctx: &ControlContext<'_>) -> f64 {
    if let Some(sp) = ctx.setting_opt("supplyAirSetpoint") {
        return sp;
    }
    let warm = ctx.setting("sarMaxSupply", 65.0);
    match ctx.outdoor_temp() {
        Some(oat) => reset_schedule(
            oat,
            ctx.setting("sarMinOutdoor", 50.0),
            ctx.setting("sarMaxOutdoor", 70.0),
            warm,
            ctx.setting("sarMinSupply", 55.0),
        ),
        None => warm,
    }
}

pub fn run(ctx: &ControlContext<'_>, state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let sat = ctx
        .reading(SAT_KEYS)
        .ok_or(ControlFault::MissingInput("supply air temperature"))?;
    let setpoint = supply_air_setpoint(ctx);
    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    r.set("activeSupplyAirSetpoint", (setpoint * 10.0).round() / 10.0);

    // freezestat trips on mixed air when available, else supply air
    let coil_air = ctx.reading(MIXED_AIR_KEYS).unwrap_or(sat);
    let freezestat = ctx.setting("freezestatLimit", 40.0);
    if coil_air <= freezestat {
        r.set("unitEnable", false)
            .set("fanEnabled", false)
            .set("outdoorDamperPosition", 0.0)
            .set("coolingValvePosition", 0.0)
            .set("heatingValvePosition", 100.0)
            .set("economizerActive", false);
        r.emergency_shutdown(format!(
            "freezestat: coil air {coil_air:.1}F at or below {freezestat:.1}F"
        ));
        return Ok(r);
    }

    let occupied = coerce::first_bool(ctx.metrics, OCCUPIED_KEYS)
        .or_else(|| coerce::first_bool(ctx.settings, OCCUPIED_KEYS))
        .unwrap_or(true);
    let enable = ctx.gated_enable(ctx.flag("enabled", true) && occupied);
    if !enable {
        r.set("unitEnable", false)
            .set("fanEnabled", false)
            .set("outdoorDamperPosition", 0.0)
            .set("coolingValvePosition", 0.0)
            .set("heatingValvePosition", 0.0)
            .set("economizerActive", false);
        return Ok(r);
    }

    let oat = ctx.outdoor_temp();
    let cooling_allowed = oat.is_none_or(|t| t >= ctx.setting("coolingLockout", 55.0));

    let heat = pid::compute(sat, setpoint, &ctx.tuning.pid.heating.reverse(), ctx.dt_secs, state.pid("heating"));
    let cool_params = ctx.tuning.pid.cooling.with_enabled(cooling_allowed && heat.output <= 0.0);
    let cool = pid::compute(sat, setpoint, &cool_params, ctx.dt_secs, state.pid("cooling"));

    let econ_low = ctx.setting("economizerLow", 45.0);
    let econ_high = ctx.setting("economizerHigh", 65.0);
    let min_damper = ctx.setting("minOaDamper", 20.0);
    let economize = oat.is_some_and(|t| t >= econ_low && t <= econ_high) && sat > setpoint;
    let damper = if economize {
        let out = pid::compute(sat, setpoint, &ctx.tuning.pid.damper, ctx.dt_secs, state.pid("damper"));
        out.output.max(min_damper)
    } else {
        min_damper
    };

    r.set("unitEnable", true)
        .set("fanEnabled", true)
        .set("economizerActive", economize);
    r.set_percent("heatingValvePosition", heat.output);
    r.set_percent("coolingValvePosition", cool.output);
    r.set_percent("outdoorDamperPosition", damper);
    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::Tuning;
    use crate::kind::Kind;
    use hvac_traits::{FieldMap, MetricValue};

    fn pct(r: &ControlResult, k: &str) -> f64 {
        match r.outputs[k] {
            MetricValue::Number(n) => n,
            _ => panic!("{k} not numeric"),
        }
    }

    #[test]
    fn cold_supply_opens_heating_only() {
        let eq = equipment(Kind::AirHandler, "ahu");
        let m = fields(&[("Supply_Air_Temp", num(55.0)), ("outdoorTemp", num(30.0))]);
        let s = settings(Kind::AirHandler, "ahu", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert!(pct(&r, "heatingValvePosition") > 0.0);
        assert_eq!(pct(&r, "coolingValvePosition"), 0.0);
        assert_eq!(pct(&r, "outdoorDamperPosition"), 20.0);
        assert_eq!(r.outputs["activeSupplyAirSetpoint"], num(65.0));
    }

    #[test]
    fn mild_weather_economizes() {
        let eq = equipment(Kind::AirHandler, "ahu");
        let m = fields(&[("Supply_Air_Temp", num(70.0)), ("outdoorTemp", num(60.0))]);
        let s = settings(Kind::AirHandler, "ahu", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["economizerActive"], MetricValue::Bool(true));
        assert!(pct(&r, "outdoorDamperPosition") > 20.0);
        assert!(pct(&r, "coolingValvePosition") > 0.0);
    }

    #[test]
    fn unoccupied_shuts_fan() {
        let eq = equipment(Kind::AirHandler, "ahu");
        let m = fields(&[("Supply_Air_Temp", num(70.0))]);
        let s = settings(Kind::AirHandler, "ahu", &[("occupied", MetricValue::Bool(false))]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["fanEnabled"], MetricValue::Bool(false));
    }

    #[test]
    fn freezestat_opens_heating_and_shuts_down() {
        let eq = equipment(Kind::AirHandler, "ahu");
        let m = fields(&[("Supply_Air_Temp", num(50.0)), ("Mixed_Air_Temp", num(38.0))]);
        let s = settings(Kind::AirHandler, "ahu", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert!(r.emergency.as_deref().is_some_and(|e| e.starts_with("freezestat")));
        assert_eq!(pct(&r, "heatingValvePosition"), 100.0);
        assert_eq!(r.outputs["fanEnabled"], MetricValue::Bool(false));
    }

    #[test]
    fn lag_standby_keeps_unit_off() {
        let eq = equipment(Kind::AirHandler, "ahu");
        let m = fields(&[("Supply_Air_Temp", num(70.0))]);
        let s = settings(Kind::AirHandler, "ahu", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let ll = standby();
        let mut c = ctx(&eq, &m, &s, &cur, &t);
        c.lead_lag = Some(&ll);
        let r = run(&c, &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["unitEnable"], MetricValue::Bool(false));
        assert_eq!(r.outputs["isLead"], MetricValue::Bool(false));
        assert_eq!(r.outputs["leadLagReason"], MetricValue::from("lag standby"));
    }
}
