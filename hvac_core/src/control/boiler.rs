//! Hot-water boilers: outdoor-air reset, deadband firing, lead-lag gating.

use super::{ControlContext, ControlResult, reset_schedule, stage_outputs};
use crate::error::ControlFault;
use crate::staging;
use crate::store::UnitState;

pub const SUPPLY_KEYS: &[&str] = &[
    "H2OSupply",
    "H2O Supply",
    "SupplyTemp",
    "Supply_Temp",
    "supplyTemp",
    "Water_Temp",
    "waterTemp",
];

/// Explicit `waterTempSetpoint` when set, otherwise the reset schedule.
fn supply_setpoint(ctx: &ControlContext<'_>) -> f64 {
    if let Some(sp) = ctx.setting_opt("waterTempSetpoint") {
        return sp;
    }
    let max_supply = ctx.setting("oarMaxSupply", 180.0);
    match ctx.outdoor_temp() {
        Some(oat) => reset_schedule(
            oat,
            ctx.setting("oarMinOutdoor", 32.0),
            ctx.setting("oarMaxOutdoor", 72.0),
            max_supply,
            ctx.setting("oarMinSupply", 120.0),
        ),
        None => max_supply,
    }
}

pub fn run(ctx: &ControlContext<'_>, _state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let supply = ctx
        .reading(SUPPLY_KEYS)
        .ok_or(ControlFault::MissingInput("boiler supply water temperature"))?;
    let deadband = ctx.setting("deadband", 5.0);
    if deadband < 0.0 {
        return Err(ControlFault::InvalidSetting {
            field: "deadband",
            reason: format!("{deadband} is negative"),
        });
    }
    let setpoint = supply_setpoint(ctx);
    let high_limit = ctx.setting("highLimit", 200.0);

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    r.set("supplySetpoint", (setpoint * 10.0).round() / 10.0);

    if supply >= high_limit {
        r.set("unitEnable", false).set("firing", 0.0);
        r.emergency_shutdown(format!(
            "supply water {supply:.1}F at or above high limit {high_limit:.1}F"
        ));
        return Ok(r);
    }

    let enable = ctx.gated_enable(ctx.flag("enabled", true));
    let firing = if !enable {
        0.0
    } else if supply < setpoint - deadband {
        1.0
    } else if supply > setpoint + deadband {
        0.0
    } else {
        ctx.current_number("firing", 0.0)
    };

    r.set("unitEnable", enable).set("firing", firing);
    Ok(r)
}

/// Multi-burner variant: burners are sequenced by the staging coordinator.
pub fn run_staged(ctx: &ControlContext<'_>, state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let supply = ctx
        .reading(SUPPLY_KEYS)
        .ok_or(ControlFault::MissingInput("boiler supply water temperature"))?;
    let setpoint = supply_setpoint(ctx);
    let enable = ctx.gated_enable(ctx.flag("enabled", true));
    let cfg = &ctx.tuning.staging.boiler;

    let mem = state.staging("burners");
    let d = if enable {
        staging::evaluate(cfg, mem, supply, setpoint - supply, ctx.now_ms)
    } else {
        staging::shed_all(cfg, mem, supply, ctx.now_ms)
    };

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    stage_outputs(&mut r, "burner", mem);
    let active = mem.active();
    r.set("supplySetpoint", (setpoint * 10.0).round() / 10.0)
        .set("firingStages", active as f64)
        .set("firing", if active > 0 { 1.0 } else { 0.0 });
    if let Some(reason) = d.emergency {
        r.set("unitEnable", false);
        r.emergency_shutdown(reason);
    } else {
        r.set("unitEnable", enable);
    }
    Ok(r)
}
