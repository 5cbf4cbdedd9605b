//! Circulation pumps: loop demand, lead-lag gating, pressure or fixed speed.

use super::{ControlContext, ControlResult};
use crate::error::ControlFault;
use crate::pid;
use crate::store::UnitState;

pub const PRESSURE_KEYS: &[&str] = &[
    "DiffPressure",
    "differentialPressure",
    "pressure",
    "Pressure",
];

pub const AMPS_KEYS: &[&str] = &["PumpAmps", "pumpAmps", "Amps", "amps", "current", "Current"];

pub const TEMP_KEYS: &[&str] = &["water_temp", "Supply_Temp", "H2OSupply", "SupplyTemp"];

/// Whether the loop needs circulation at this outdoor temperature.
fn loop_demand(ctx: &ControlContext<'_>) -> bool {
    let Some(oat) = ctx.outdoor_temp() else {
        return true;
    };
    match ctx.text("loopType").unwrap_or("heating") {
        "cooling" => oat >= ctx.setting("coolingEnableOutdoor", 55.0),
        _ => oat < ctx.setting("heatingEnableOutdoor", 60.0),
    }
}

pub fn run(ctx: &ControlContext<'_>, state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let requested = ctx.flag("enabled", true) && loop_demand(ctx);
    let enable = ctx.gated_enable(requested);

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    if let Some(lt) = ctx.text("loopType") {
        r.set("loopType", lt);
    }

    let pressure_sp = ctx.setting_opt("pressureSetpoint");
    let pressure = ctx.reading(PRESSURE_KEYS);
    let params = ctx.tuning.pid.pump.with_enabled(enable);

    let speed = match (enable, pressure_sp, pressure) {
        (false, _, _) => 0.0,
        (true, Some(sp), Some(p)) => pid::compute(p, sp, &params, ctx.dt_secs, state.pid("pump")).output,
        (true, Some(_), None) => {
            tracing::debug!(
                equipment_id = %ctx.equipment.equipment_id,
                "pressure setpoint without pressure reading, using fixed speed"
            );
            ctx.setting("fixedSpeed", 75.0)
        }
        (true, None, _) => ctx.setting("fixedSpeed", 75.0),
    };
    if !(0.0..=100.0).contains(&speed) {
        return Err(ControlFault::InvalidSetting {
            field: "fixedSpeed",
            reason: format!("{speed} outside 0..=100"),
        });
    }

    r.set("unitEnable", enable);
    r.set_percent("pumpSpeed", speed);
    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::Tuning;
    use crate::kind::Kind;
    use crate::lead_lag::LeadLagDecision;
    use hvac_traits::{FieldMap, MetricValue};

    #[test]
    fn heating_loop_runs_in_cold_weather_at_fixed_speed() {
        let eq = equipment(Kind::Pump, "hwpump");
        let m = fields(&[("outdoorTemp", num(40.0))]);
        let s = settings(Kind::Pump, "hwpump", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["unitEnable"], MetricValue::Bool(true));
        assert_eq!(r.outputs["pumpSpeed"], num(75.0));
        assert_eq!(r.outputs["loopType"], MetricValue::from("heating"));
    }

    #[test]
    fn heating_loop_idles_in_warm_weather() {
        let eq = equipment(Kind::Pump, "hwpump");
        let m = fields(&[("outdoorTemp", num(75.0))]);
        let s = settings(Kind::Pump, "hwpump", &[]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["unitEnable"], MetricValue::Bool(false));
        assert_eq!(r.outputs["pumpSpeed"], num(0.0));
    }

    #[test]
    fn pressure_pid_speeds_up_when_pressure_low() {
        let eq = equipment(Kind::Pump, "cwpump");
        let m = fields(&[("outdoorTemp", num(80.0)), ("DiffPressure", num(12.0))]);
        let s = settings(Kind::Pump, "cwpump", &[("pressureSetpoint", num(20.0))]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let mut st = UnitState::default();
        let r = run(&ctx(&eq, &m, &s, &cur, &t), &mut st).unwrap();
        let MetricValue::Number(speed) = r.outputs["pumpSpeed"] else {
            panic!("speed not numeric");
        };
        assert!(speed > 20.0 && speed <= 100.0);
        assert!(st.pid.contains_key("pump"));
    }

    #[test]
    fn lag_pump_with_override_runs() {
        let eq = equipment(Kind::Pump, "hwpump");
        let m = fields(&[("outdoorTemp", num(30.0))]);
        let s = settings(Kind::Pump, "hwpump", &[("unitEnableOverride", MetricValue::Bool(true))]);
        let cur = FieldMap::new();
        let t = Tuning::default();
        let ll = LeadLagDecision {
            is_lead: false,
            should_run: false,
            reason: "lag standby".into(),
            lead_equipment_id: Some("p0".into()),
        };
        let mut c = ctx(&eq, &m, &s, &cur, &t);
        c.lead_lag = Some(&ll);
        let r = run(&c, &mut UnitState::default()).unwrap();
        assert_eq!(r.outputs["unitEnable"], MetricValue::Bool(true));
    }
}
