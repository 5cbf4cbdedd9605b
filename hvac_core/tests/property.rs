use hvac_core::kind::{Kind, fold_type, normalize_type};
use hvac_core::pid::{self, PidGains, PidMemory, PidParams};
use hvac_core::staging::{self, StagingCfg, StagingMemory};
use proptest::prelude::*;

fn pid_params() -> impl Strategy<Value = PidParams> {
    (0.0..10.0f64, 0.0..1.0f64, 0.0..1.0f64, 0.0..50.0f64, 1.0..100.0f64, 0.0..1000.0f64, any::<bool>()).prop_map(
        |(kp, ki, kd, min, span, max_integral, reverse_acting)| PidParams {
            gains: PidGains { kp, ki, kd },
            output_min: min,
            output_max: min + span,
            reverse_acting,
            max_integral,
            enabled: true,
        },
    )
}

proptest! {
    #[test]
    fn pid_output_and_integral_stay_bounded(
        params in pid_params(),
        steps in prop::collection::vec((-500.0..500.0f64, -500.0..500.0f64, -5.0..900.0f64), 1..40),
    ) {
        let mut mem = PidMemory::default();
        for (input, setpoint, dt) in steps {
            let out = pid::compute(input, setpoint, &params, dt, &mut mem);
            prop_assert!(out.output >= params.output_min && out.output <= params.output_max);
            prop_assert!(mem.integral.abs() <= params.max_integral + 1e-9);
        }
    }

    #[test]
    fn staging_moves_at_most_one_stage_per_evaluation(
        errors in prop::collection::vec(-10.0..20.0f64, 1..60),
        step_ms in 0u64..400_000,
    ) {
        let cfg = StagingCfg::default();
        let mut mem = StagingMemory::default();
        let mut now = 1_000_000u64;
        let mut prev = 0usize;
        for e in errors {
            now += step_ms;
            let d = staging::evaluate(&cfg, &mut mem, 50.0, e, now);
            prop_assert!(d.emergency.is_none());
            prop_assert!(mem.active().abs_diff(prev) <= 1);
            prop_assert!(mem.active() <= cfg.stages);
            prev = mem.active();
        }
    }

    #[test]
    fn staging_limit_breach_drops_everything(
        errors in prop::collection::vec(0.0..20.0f64, 1..20),
        over in 0.0..50.0f64,
    ) {
        let cfg = StagingCfg { minimum_runtime_ms: 0, ..StagingCfg::default() };
        let mut mem = StagingMemory::default();
        let mut now = 0u64;
        for e in errors {
            now += 1_000;
            staging::evaluate(&cfg, &mut mem, 50.0, e, now);
        }
        let d = staging::evaluate(&cfg, &mut mem, cfg.high_limit + over, 20.0, now + 1_000);
        prop_assert!(d.emergency.is_some());
        prop_assert_eq!(mem.active(), 0);
    }

    #[test]
    fn type_classification_is_total_and_stable(raw in "\\PC{0,24}") {
        let kind = normalize_type(&raw);
        // Classification only depends on the folded form.
        prop_assert_eq!(kind, normalize_type(&fold_type(&raw)));
        if let Some(k) = kind {
            prop_assert_eq!(k.as_str().parse::<Kind>(), Ok(k));
        }
    }
}
