//! Dedicated outdoor-air units: lockouts, modulating heat, staged DX cooling.

use super::{ControlContext, ControlResult, stage_outputs};
use crate::alerts::Severity;
use crate::error::ControlFault;
use crate::pid;
use crate::staging;
use crate::store::UnitState;

use super::air_handler::SAT_KEYS;

pub fn run(ctx: &ControlContext<'_>, state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let sat = ctx
        .reading(SAT_KEYS)
        .ok_or(ControlFault::MissingInput("supply air temperature"))?;
    let setpoint = ctx.setting("supplyAirSetpoint", 65.0);
    let deadband = ctx.setting("deadband", 2.0).max(0.0);
    let heating_lockout = ctx.setting("heatingLockout", 65.0);
    let cooling_lockout = ctx.setting("coolingLockout", 60.0);
    let enable = ctx.gated_enable(ctx.flag("enabled", true));
    let oat = ctx.outdoor_temp();

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    r.set("supplyAirSetpoint", setpoint);

    let heat_locked = oat.is_some_and(|t| t >= heating_lockout);
    let cool_locked = oat.is_some_and(|t| t < cooling_lockout);
    let heat_demand = sat < setpoint - deadband;

    if enable && heat_demand && heat_locked {
        let oat = oat.unwrap_or_default();
        r.alert(
            Severity::Warning,
            "heating_lockout",
            format!(
                "heating demand at supply {sat:.1}F with outdoor {oat:.1}F at or above lockout {heating_lockout:.1}F"
            ),
        );
    }

    let heat_params = ctx.tuning.pid.heating.reverse().with_enabled(enable && !heat_locked);
    let heat = pid::compute(sat, setpoint, &heat_params, ctx.dt_secs, state.pid("heating"));

    let cfg = &ctx.tuning.staging.doas_cooling;
    let mem = state.staging("cooling");
    let d = if !enable {
        staging::shed_all(cfg, mem, sat, ctx.now_ms)
    } else if cool_locked {
        staging::evaluate(cfg, mem, sat, f64::NEG_INFINITY, ctx.now_ms)
    } else {
        staging::evaluate(cfg, mem, sat, sat - setpoint, ctx.now_ms)
    };
    stage_outputs(&mut r, "coolingStage", mem);

    if let Some(reason) = d.emergency {
        r.set("unitEnable", false)
            .set("fanEnabled", false)
            .set("heatingEnabled", false)
            .set("heatingValvePosition", 0.0);
        r.emergency_shutdown(reason);
        return Ok(r);
    }

    r.set("unitEnable", enable)
        .set("fanEnabled", enable)
        .set("heatingEnabled", heat.output > 0.0)
        .set("heatingLockedOut", heat_locked)
        .set("coolingLockedOut", cool_locked);
    r.set_percent("heatingValvePosition", heat.output);
    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::Tuning;
    use crate::kind::Kind;
    use hvac_traits::{FieldMap, MetricValue};

    #[test]
    fn heating_lockout_never_heats_and_alerts() {
        let eq = equipment(Kind::Doas, "doas");
        let m = fields(&[("Supply_Air_Temp", num(50.0))]);
        let s = settings(
            Kind::Doas,
            "doas",
            &[("outdoorTemp", num(70.0)), ("heatingLockout", num(65.0))],
        );
        let cur = FieldMap::new();
        let t = Tuning::default();
        let mut st = UnitState::default();
        for _ in 0..3 {
            let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut st).unwrap();
            assert_eq!(r.outputs["heatingEnabled"], MetricValue::Bool(false));
            assert_eq!(r.outputs["heatingValvePosition"], num(0.0));
            assert_eq!(r.alerts.len(), 1);
            assert_eq!(r.alerts[0].alert_type, "heating_lockout");
        }
    }

    #[test]
    fn cold_supply_heats_when_not_locked() {
        let eq = equipment(Kind::Doas, "doas");
        let m = fields(&[("Supply_Air_Temp", num(55.0)), ("outdoorTemp", num(30.0))]);
        let s = settings(Kind::Doas, "doas", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["heatingEnabled"], MetricValue::Bool(true));
        assert!(r.alerts.is_empty());
        assert_eq!(r.outputs["coolingStage1Enabled"], MetricValue::Bool(false));
    }

    #[test]
    fn hot_supply_stages_cooling() {
        let eq = equipment(Kind::Doas, "doas");
        let m = fields(&[("Supply_Air_Temp", num(75.0)), ("outdoorTemp", num(85.0))]);
        let s = settings(Kind::Doas, "doas", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["coolingStage1Enabled"], MetricValue::Bool(true));
        assert_eq!(r.outputs["coolingStage2Enabled"], MetricValue::Bool(false));
    }

    #[test]
    fn lag_standby_sheds_cooling_immediately() {
        let eq = equipment(Kind::Doas, "doas");
        let m = fields(&[("Supply_Air_Temp", num(75.0)), ("outdoorTemp", num(85.0))]);
        let s = settings(Kind::Doas, "doas", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let mut st = UnitState::default();
        run(&ctx(&eq, &m, &s, &cur, &t), &mut st).unwrap();

        let ll = standby();
        let mut c = ctx(&eq, &m, &s, &cur, &t);
        c.lead_lag = Some(&ll);
        c.now_ms += 30_000;
        let r = run(&c, &mut st).unwrap();
        assert_eq!(r.outputs["unitEnable"], MetricValue::Bool(false));
        assert_eq!(r.outputs["fanEnabled"], MetricValue::Bool(false));
        assert_eq!(r.outputs["isLead"], MetricValue::Bool(false));
        assert_eq!(r.outputs["coolingStage1Enabled"], MetricValue::Bool(false));
    }
}
