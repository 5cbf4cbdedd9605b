//! `From` implementations bridging `hvac_config` types to `hvac_core` types.

use std::collections::BTreeMap;

use crate::config::{
    AlertPolicy, CachePersistence, LeadLagCfg, PersistMode, PidTuning, StagingTuning, Thresholds,
    Timing, Tuning,
};
use crate::kind::Kind;
use crate::lead_lag::{ExtremeBand, LeadLagParams};
use crate::pid::{PidGains, PidParams};
use crate::staging::StagingCfg;
use crate::util::{fsecs_to_ms, secs_to_ms};

// ── PID ──────────────────────────────────────────────────────────────────────

impl From<&hvac_config::PidCfg> for PidParams {
    fn from(c: &hvac_config::PidCfg) -> Self {
        Self {
            gains: PidGains {
                kp: c.kp,
                ki: c.ki,
                kd: c.kd,
            },
            output_min: c.output_min,
            output_max: c.output_max,
            reverse_acting: false,
            max_integral: c.max_integral,
            enabled: true,
        }
    }
}

/// Heating and pump loops are reverse-acting; the table only carries gains and limits.
impl From<&hvac_config::PidTable> for PidTuning {
    fn from(c: &hvac_config::PidTable) -> Self {
        Self {
            cooling: PidParams::from(&c.cooling),
            heating: PidParams::from(&c.heating).reverse(),
            pump: PidParams::from(&c.pump).reverse(),
            damper: PidParams::from(&c.damper),
        }
    }
}

// ── Staging ──────────────────────────────────────────────────────────────────

impl From<&hvac_config::StagingCfg> for StagingCfg {
    fn from(c: &hvac_config::StagingCfg) -> Self {
        Self {
            stages: c.stages,
            deadband: c.deadband,
            stage_increment: c.stage_increment,
            hysteresis: c.hysteresis,
            minimum_runtime_ms: secs_to_ms(c.minimum_runtime_secs),
            high_limit: c.high_limit,
            low_limit: c.low_limit,
        }
    }
}

impl From<&hvac_config::StagingTable> for StagingTuning {
    fn from(c: &hvac_config::StagingTable) -> Self {
        Self {
            heat_pump: StagingCfg::from(&c.heat_pump),
            doas_cooling: StagingCfg::from(&c.doas_cooling),
            boiler: StagingCfg::from(&c.boiler),
        }
    }
}

impl From<&hvac_config::Config> for Tuning {
    fn from(c: &hvac_config::Config) -> Self {
        Self {
            pid: PidTuning::from(&c.pid),
            staging: StagingTuning::from(&c.staging),
        }
    }
}

// ── Timing ───────────────────────────────────────────────────────────────────

impl From<&hvac_config::EngineCfg> for Timing {
    fn from(c: &hvac_config::EngineCfg) -> Self {
        Self {
            cycle_interval_ms: secs_to_ms(c.cycle_interval_secs),
            primary_window_ms: secs_to_ms(c.primary_window_secs),
            fallback_window_ms: secs_to_ms(c.fallback_window_secs),
            default_dt_secs: c.default_dt_secs,
            max_dt_secs: c.max_dt_secs,
        }
    }
}

// ── Alerts ───────────────────────────────────────────────────────────────────

impl From<&hvac_config::AlertsCfg> for AlertPolicy {
    fn from(c: &hvac_config::AlertsCfg) -> Self {
        let mut thresholds = BTreeMap::new();
        for (name, t) in &c.thresholds {
            match name.parse::<Kind>() {
                Ok(kind) => {
                    thresholds.insert(
                        kind,
                        Thresholds {
                            high: t.high_temp,
                            critical: t.critical_temp,
                        },
                    );
                }
                Err(e) => tracing::warn!(kind = %name, error = %e, "ignoring alert thresholds"),
            }
        }
        Self {
            cooldown_ms: fsecs_to_ms(c.cooldown_minutes * 60.0),
            thresholds,
        }
    }
}

// ── Lead-lag ─────────────────────────────────────────────────────────────────

/// Extreme band of a group, when it names a metric.
pub fn extreme_band(g: &hvac_config::LeadLagGroupCfg) -> Option<ExtremeBand> {
    let metric = g.extreme_metric.clone()?;
    Some(ExtremeBand {
        metric,
        below: g.extreme_below,
        above: g.extreme_above,
    })
}

impl From<&hvac_config::LeadLagCfg> for LeadLagCfg {
    fn from(c: &hvac_config::LeadLagCfg) -> Self {
        let bands = c
            .groups
            .iter()
            .filter_map(|g| extreme_band(g).map(|b| (g.id.clone(), b)))
            .collect();
        Self {
            params: LeadLagParams {
                rotation_interval_ms: fsecs_to_ms(c.rotation_interval_hours * 3600.0),
                rotation_retry_ms: fsecs_to_ms(c.rotation_retry_minutes * 60.0),
                min_current_amps: c.min_current_amps,
            },
            bands,
        }
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

impl From<hvac_config::PersistMode> for PersistMode {
    fn from(m: hvac_config::PersistMode) -> Self {
        match m {
            hvac_config::PersistMode::OnWrite => PersistMode::OnWrite,
            hvac_config::PersistMode::Periodic => PersistMode::Periodic,
        }
    }
}

impl From<&hvac_config::CacheCfg> for CachePersistence {
    fn from(c: &hvac_config::CacheCfg) -> Self {
        Self {
            path: c.path.clone(),
            mode: c.persist.into(),
            snapshot_interval_ms: secs_to_ms(c.snapshot_interval_secs),
        }
    }
}
