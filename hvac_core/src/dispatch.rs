//! Strategy registry keyed by (site, kind) and the fault boundary around control functions.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::control::{self, ControlContext, ControlResult, Strategy};
use crate::error::EngineError;
use crate::kind::Kind;
use crate::store::UnitState;

/// Site overrides first, then the generic per-kind strategy.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    generic: HashMap<Kind, Strategy>,
    site: HashMap<(String, Kind), Strategy>,
}

impl Registry {
    /// Registry with one generic strategy per controllable kind.
    pub fn with_defaults() -> Self {
        let mut r = Self::default();
        for (kind, name) in [
            (Kind::Boiler, "boiler"),
            (Kind::Pump, "pump"),
            (Kind::Chiller, "chiller"),
            (Kind::AirHandler, "air-handler"),
            (Kind::FanCoil, "fan-coil"),
            (Kind::Doas, "doas"),
            (Kind::StagedHeatPump, "staged-heat-pump"),
        ] {
            if let Some(s) = control::strategy_by_name(name) {
                r.generic.insert(kind, s);
            }
        }
        r
    }

    /// Pin a named strategy for one kind at one site.
    pub fn register_site(&mut self, site_id: &str, kind_name: &str, strategy: &str) -> Result<(), EngineError> {
        let kind: Kind = kind_name.parse().map_err(EngineError::Config)?;
        let s = control::strategy_by_name(strategy)
            .ok_or_else(|| EngineError::Config(format!("unknown strategy '{strategy}'")))?;
        if s.kind != kind {
            return Err(EngineError::Config(format!(
                "strategy '{strategy}' controls {} but site {site_id} pins it for {kind}",
                s.kind
            )));
        }
        self.site.insert((site_id.to_string(), kind), s);
        Ok(())
    }

    /// Build from config site overrides.
    pub fn from_sites(sites: &[hvac_config::Site]) -> Result<Self, EngineError> {
        let mut r = Self::with_defaults();
        for site in sites {
            for ov in &site.overrides {
                r.register_site(&site.id, &ov.kind, &ov.strategy)?;
            }
        }
        Ok(r)
    }

    /// Control function for a unit, or `None` when the kind is unsupported.
    pub fn dispatch(&self, kind: Option<Kind>, site_id: &str) -> Option<Strategy> {
        let kind = kind?;
        self.site
            .get(&(site_id.to_string(), kind))
            .or_else(|| self.generic.get(&kind))
            .copied()
    }
}

/// Outcome of one guarded control-function call.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded {
    pub result: ControlResult,
    /// Fault description when the result is a safe state.
    pub fault: Option<String>,
}

fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a control function; faults and panics become a safe-state result.
pub fn run_guarded(strategy: &Strategy, ctx: &ControlContext<'_>, state: &mut UnitState) -> Guarded {
    let outcome = catch_unwind(AssertUnwindSafe(|| (strategy.run)(ctx, &mut *state)));
    let fault = match outcome {
        Ok(Ok(result)) => {
            return Guarded {
                result: result.finish(),
                fault: None,
            };
        }
        Ok(Err(f)) => f.to_string(),
        Err(p) => format!("control function panicked: {}", panic_message(p.as_ref())),
    };
    tracing::warn!(
        equipment_id = %ctx.equipment.equipment_id,
        site_id = %ctx.equipment.site_id,
        strategy = strategy.name,
        reason = %fault,
        "control fault, commanding safe state"
    );
    let outputs = control::safe_outputs(
        ctx.equipment.kind,
        &ctx.equipment.equipment_type,
        state.stage_count(),
    );
    Guarded {
        result: ControlResult {
            outputs,
            emergency: None,
            alerts: Vec::new(),
            safe_state: true,
        },
        fault: Some(fault),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tuning;
    use crate::control::test_support::*;
    use crate::error::ControlFault;
    use hvac_traits::{FieldMap, MetricValue};

    fn explode(_: &ControlContext<'_>, _: &mut UnitState) -> Result<ControlResult, ControlFault> {
        panic!("boom");
    }

    #[test]
    fn site_override_beats_generic() {
        let mut r = Registry::with_defaults();
        r.register_site("north", "Comfort Boiler", "boiler-staged").unwrap();
        assert_eq!(r.dispatch(Some(Kind::Boiler), "north").unwrap().name, "boiler-staged");
        assert_eq!(r.dispatch(Some(Kind::Boiler), "south").unwrap().name, "boiler");
    }

    #[test]
    fn unsupported_kinds_dispatch_to_none() {
        let r = Registry::with_defaults();
        assert!(r.dispatch(Some(Kind::MechanicalRoom), "s").is_none());
        assert!(r.dispatch(None, "s").is_none());
    }

    #[test]
    fn mismatched_override_is_rejected() {
        let mut r = Registry::with_defaults();
        let err = r.register_site("north", "pump", "chiller").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn panic_becomes_safe_state() {
        let s = Strategy {
            name: "explode",
            kind: Kind::Pump,
            run: explode,
        };
        let eq = equipment(Kind::Pump, "hwpump");
        let empty = FieldMap::new();
        let t = Tuning::default();
        let g = run_guarded(&s, &ctx(&eq, &empty, &empty, &empty, &t), &mut UnitState::default());
        assert!(g.result.safe_state);
        assert!(g.fault.unwrap().contains("boom"));
        assert_eq!(g.result.outputs["unitEnable"], MetricValue::Bool(false));
        assert_eq!(g.result.outputs["pumpSpeed"], MetricValue::Number(0.0));
    }

    #[test]
    fn missing_input_becomes_safe_state() {
        let s = control::strategy_by_name("boiler").unwrap();
        let eq = equipment(Kind::Boiler, "boiler");
        let empty = FieldMap::new();
        let t = Tuning::default();
        let g = run_guarded(&s, &ctx(&eq, &empty, &empty, &empty, &t), &mut UnitState::default());
        assert!(g.result.safe_state);
        assert_eq!(g.result.outputs["firing"], MetricValue::Number(0.0));
        assert_eq!(g.result.outputs["unitEnable"], MetricValue::Bool(false));
        assert_eq!(g.result.outputs["supplySetpoint"], MetricValue::Number(120.0));
    }

    #[test]
    fn success_gets_explicit_emergency_flag() {
        let s = control::strategy_by_name("fan-coil").unwrap();
        let eq = equipment(Kind::FanCoil, "fcu");
        let m = fields(&[("Zone_Temp", num(72.0))]);
        let st = crate::defaults::apply_defaults(Kind::FanCoil, "fcu", None);
        let t = Tuning::default();
        let g = run_guarded(&s, &ctx(&eq, &m, &st, &m, &t), &mut UnitState::default());
        assert!(g.fault.is_none());
        assert_eq!(g.result.outputs["emergencyShutdown"], MetricValue::Bool(false));
    }
}
