//! Fan coils: space-temperature valves with a deadband, fan speed by demand.

use super::{ControlContext, ControlResult};
use crate::error::ControlFault;
use crate::pid;
use crate::store::UnitState;

pub const SPACE_KEYS: &[&str] = &[
    "Zone_Temp",
    "SpaceTemp",
    "spaceTemp",
    "RoomTemp",
    "temperature",
    "Supply_Temp",
];

fn fan_speed(demand: f64) -> &'static str {
    if demand > 66.0 {
        "high"
    } else if demand > 33.0 {
        "medium"
    } else {
        "low"
    }
}

pub fn run(ctx: &ControlContext<'_>, state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let space = ctx
        .reading(SPACE_KEYS)
        .ok_or(ControlFault::MissingInput("space temperature"))?;
    let setpoint = ctx.setting("temperatureSetpoint", 72.0);
    let deadband = ctx.setting("deadband", 1.0).max(0.0);

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    r.set("temperatureSetpoint", setpoint);

    if !ctx.gated_enable(ctx.flag("enabled", true)) {
        r.set("unitEnable", false)
            .set("fanEnabled", false)
            .set("heatingValvePosition", 0.0)
            .set("coolingValvePosition", 0.0);
        return Ok(r);
    }

    let oat = ctx.outdoor_temp();
    let heat_locked = oat.is_some_and(|t| t >= ctx.setting("heatingLockout", 65.0));
    let cool_locked = oat.is_some_and(|t| t < ctx.setting("coolingLockout", 55.0));

    let heat_params = ctx.tuning.pid.heating.reverse().with_enabled(!heat_locked && space < setpoint);
    let heat = pid::compute(space, setpoint - deadband, &heat_params, ctx.dt_secs, state.pid("heating"));
    let cool_params = ctx.tuning.pid.cooling.with_enabled(!cool_locked && space > setpoint);
    let cool = pid::compute(space, setpoint + deadband, &cool_params, ctx.dt_secs, state.pid("cooling"));

    let demand = heat.output.max(cool.output);
    let speed = match ctx.text("fanMode") {
        Some(m @ ("low" | "medium" | "high")) => m,
        _ => fan_speed(demand),
    };

    r.set("unitEnable", true)
        .set("fanEnabled", true)
        .set("fanSpeed", speed)
        .set("heatingEnabled", heat.output > 0.0)
        .set("coolingEnabled", cool.output > 0.0);
    r.set_percent("heatingValvePosition", heat.output);
    r.set_percent("coolingValvePosition", cool.output);
    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::Tuning;
    use crate::kind::Kind;
    use hvac_traits::{FieldMap, MetricValue};

    fn eval(space: f64, extra: &[(&str, MetricValue)]) -> ControlResult {
        let eq = equipment(Kind::FanCoil, "fancoil");
        let m = fields(&[("Zone_Temp", num(space))]);
        let s = settings(Kind::FanCoil, "fancoil", extra);
        let cur = FieldMap::new();
        let t = Tuning::default();
        run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap()
    }

    #[test]
    fn inside_deadband_is_idle_on_low_fan() {
        let r = eval(72.4, &[]);
        assert_eq!(r.outputs["heatingValvePosition"], num(0.0));
        assert_eq!(r.outputs["coolingValvePosition"], num(0.0));
        assert_eq!(r.outputs["fanSpeed"], MetricValue::from("low"));
    }

    #[test]
    fn cold_room_heats_on_high_fan() {
        let r = eval(50.0, &[]);
        assert_eq!(r.outputs["heatingEnabled"], MetricValue::Bool(true));
        assert_eq!(r.outputs["fanSpeed"], MetricValue::from("high"));
    }

    #[test]
    fn heating_lockout_blocks_heat() {
        let r = eval(60.0, &[("outdoorTemp", num(70.0))]);
        assert_eq!(r.outputs["heatingEnabled"], MetricValue::Bool(false));
    }

    #[test]
    fn fan_mode_setting_pins_speed() {
        let r = eval(60.0, &[("fanMode", MetricValue::from("medium"))]);
        assert_eq!(r.outputs["fanSpeed"], MetricValue::from("medium"));
    }

    #[test]
    fn lag_standby_keeps_unit_off() {
        let eq = equipment(Kind::FanCoil, "fancoil");
        let m = fields(&[("Zone_Temp", num(50.0))]);
        let s = settings(Kind::FanCoil, "fancoil", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let ll = standby();
        let mut c = ctx(&eq, &m, &s, &cur, &t);
        c.lead_lag = Some(&ll);
        let r = run(&c, &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["unitEnable"], MetricValue::Bool(false));
        assert_eq!(r.outputs["heatingValvePosition"], num(0.0));
        assert_eq!(r.outputs["isLead"], MetricValue::Bool(false));
    }
}
