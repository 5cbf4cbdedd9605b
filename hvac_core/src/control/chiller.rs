//! Chillers: hysteresis enable around the chilled-water setpoint.

use super::{ControlContext, ControlResult};
use crate::error::ControlFault;
use crate::store::UnitState;

pub const CHW_KEYS: &[&str] = &[
    "Chilled_Water_Temp",
    "CHWSupply",
    "ChilledWaterSupply",
    "SupplyTemp",
    "supplyTemp",
];

pub fn run(ctx: &ControlContext<'_>, _state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let chw = ctx
        .reading(CHW_KEYS)
        .ok_or(ControlFault::MissingInput("chilled water temperature"))?;
    let setpoint = ctx.setting("chilledWaterSetpoint", 44.0);
    let deadband = ctx.setting("deadband", 2.0);
    let freeze = ctx.setting("freezeLimit", 36.0);

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    r.set("chilledWaterSetpoint", setpoint);

    if chw <= freeze {
        r.set("unitEnable", false).set("chillerEnabled", false);
        r.emergency_shutdown(format!(
            "chilled water {chw:.1}F at or below freeze limit {freeze:.1}F"
        ));
        return Ok(r);
    }

    let locked_out = ctx
        .outdoor_temp()
        .is_some_and(|oat| oat < ctx.setting("outdoorLockout", 50.0));
    let enable = ctx.gated_enable(ctx.flag("enabled", true)) && !locked_out;

    let running = if !enable {
        false
    } else if chw >= setpoint + deadband {
        true
    } else if chw <= setpoint {
        false
    } else {
        ctx.current_flag("chillerEnabled", false)
    };

    r.set("unitEnable", enable)
        .set("chillerEnabled", running)
        .set("outdoorLockout", locked_out);
    Ok(r)
}
