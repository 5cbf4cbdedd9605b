//! Staged (geothermal) heat pumps: compressor stages on loop temperature.

use super::{ControlContext, ControlResult, stage_outputs};
use crate::error::ControlFault;
use crate::staging;
use crate::store::UnitState;

pub const LOOP_KEYS: &[&str] = &["LoopTemp", "Loop_Temp", "loopTemp", "EWT", "SupplyTemp"];

pub fn run(ctx: &ControlContext<'_>, state: &mut UnitState) -> Result<ControlResult, ControlFault> {
    let loop_temp = ctx
        .reading(LOOP_KEYS)
        .ok_or(ControlFault::MissingInput("loop temperature"))?;
    let target = ctx.setting("targetSetpoint", 45.0);
    let enable = ctx.gated_enable(ctx.flag("enabled", true));

    let error = match ctx.text("mode").unwrap_or("auto") {
        "heating" => target - loop_temp,
        "cooling" => loop_temp - target,
        "auto" => (loop_temp - target).abs(),
        other => {
            return Err(ControlFault::InvalidSetting {
                field: "mode",
                reason: format!("unknown mode '{other}'"),
            });
        }
    };

    let cfg = &ctx.tuning.staging.heat_pump;
    let mem = state.staging("compressors");
    let d = if enable {
        staging::evaluate(cfg, mem, loop_temp, error, ctx.now_ms)
    } else {
        staging::shed_all(cfg, mem, loop_temp, ctx.now_ms)
    };

    let mut r = ControlResult::new();
    r.lead_lag(ctx.lead_lag);
    stage_outputs(&mut r, "stage", mem);
    r.set("targetSetpoint", target)
        .set("activeStages", mem.active() as f64);
    if d.held_by_runtime {
        tracing::debug!(
            equipment_id = %ctx.equipment.equipment_id,
            required = d.required,
            active = d.active,
            "stage change held by minimum runtime"
        );
    }
    match d.emergency {
        Some(reason) => {
            r.set("unitEnable", false);
            r.emergency_shutdown(reason);
        }
        None => {
            r.set("unitEnable", enable);
        }
    }
    Ok(r)
}
