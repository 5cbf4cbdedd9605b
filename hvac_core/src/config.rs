//! Runtime configuration for the evaluation engine.
//!
//! These are the structs the engine and control functions work with. They are
//! separate from the TOML-deserialized config in `hvac_config`; see
//! `conversions` for the bridge.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::lead_lag::{ExtremeBand, LeadLagParams};
use crate::pid::{PidGains, PidParams};
use crate::staging::StagingCfg;

/// PID parameters per controller role.
#[derive(Debug, Clone, PartialEq)]
pub struct PidTuning {
    pub cooling: PidParams,
    pub heating: PidParams,
    pub pump: PidParams,
    pub damper: PidParams,
}

impl Default for PidTuning {
    fn default() -> Self {
        let base = PidParams::default();
        Self {
            cooling: PidParams {
                gains: PidGains {
                    kp: 2.5,
                    ki: 0.1,
                    kd: 0.02,
                },
                ..base
            },
            heating: PidParams {
                gains: PidGains {
                    kp: 2.0,
                    ki: 0.08,
                    kd: 0.02,
                },
                reverse_acting: true,
                ..base
            },
            pump: PidParams {
                gains: PidGains {
                    kp: 4.0,
                    ki: 0.2,
                    kd: 0.0,
                },
                output_min: 20.0,
                max_integral: 300.0,
                reverse_acting: true,
                ..base
            },
            damper: PidParams {
                gains: PidGains {
                    kp: 1.5,
                    ki: 0.05,
                    kd: 0.0,
                },
                output_min: 20.0,
                max_integral: 200.0,
                ..base
            },
        }
    }
}

/// Staging constants per staged application.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingTuning {
    pub heat_pump: StagingCfg,
    pub doas_cooling: StagingCfg,
    pub boiler: StagingCfg,
}

impl Default for StagingTuning {
    fn default() -> Self {
        Self {
            heat_pump: StagingCfg::default(),
            doas_cooling: StagingCfg {
                stages: 2,
                deadband: 1.0,
                stage_increment: 3.0,
                hysteresis: 0.5,
                minimum_runtime_ms: 180_000,
                high_limit: 120.0,
                low_limit: 38.0,
            },
            boiler: StagingCfg {
                stages: 2,
                deadband: 5.0,
                stage_increment: 10.0,
                hysteresis: 2.0,
                minimum_runtime_ms: 120_000,
                high_limit: 200.0,
                low_limit: 33.0,
            },
        }
    }
}

/// Everything a control function may read besides its inputs and state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuning {
    pub pid: PidTuning,
    pub staging: StagingTuning,
}

/// Query windows and controller step bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub cycle_interval_ms: u64,
    pub primary_window_ms: u64,
    pub fallback_window_ms: u64,
    pub default_dt_secs: f64,
    pub max_dt_secs: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 30_000,
            primary_window_ms: 300_000,
            fallback_window_ms: 3_600_000,
            default_dt_secs: 30.0,
            max_dt_secs: 600.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub critical: f64,
}

/// Threshold alerting policy.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    pub cooldown_ms: u64,
    pub thresholds: BTreeMap<crate::kind::Kind, Thresholds>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        use crate::kind::Kind;
        let thresholds = [
            (Kind::Boiler, 180.0, 200.0),
            (Kind::Chiller, 50.0, 55.0),
            (Kind::AirHandler, 85.0, 90.0),
            (Kind::Pump, 120.0, 130.0),
            (Kind::FanCoil, 90.0, 95.0),
        ]
        .into_iter()
        .map(|(k, high, critical)| (k, Thresholds { high, critical }))
        .collect();
        Self {
            cooldown_ms: 5 * 60 * 1000,
            thresholds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    #[default]
    OnWrite,
    Periodic,
}

/// Where and when the durable cache is written.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePersistence {
    pub path: PathBuf,
    pub mode: PersistMode,
    pub snapshot_interval_ms: u64,
}

/// Lead-lag parameters plus per-group extreme bands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeadLagCfg {
    pub params: LeadLagParams,
    pub bands: BTreeMap<String, ExtremeBand>,
}
