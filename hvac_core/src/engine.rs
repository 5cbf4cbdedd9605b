//! One full evaluation of one unit: resolve, dispatch, run, merge, emit.

use std::collections::HashMap;
use std::sync::Arc;

use hvac_traits::{
    Clock, CommandSink, DirectoryEntry, EquipmentDirectory, FieldMap, MetricsStore, RealtimeStore,
};
use serde::Serialize;

use crate::alerts::{Alert, AlertTracker, Severity};
use crate::builder::{EngineBuilder, Missing};
use crate::coerce;
use crate::config::{CachePersistence, LeadLagCfg, PersistMode, Timing, Tuning};
use crate::control::{ControlContext, EquipmentRef, pump};
use crate::defaults::apply_defaults;
use crate::dispatch::{Registry, run_guarded};
use crate::emit::{EmitSummary, emit};
use crate::error::{EngineError, Result};
use crate::kind::{Kind, normalize_type};
use crate::lead_lag::{
    LeadLagDecision, LeadLagGroupMemory, LeadStatus, check_rotation, establish_lead,
    record_runtime, resolve_lead_lag,
};
use crate::resolve::{MetricsOrigin, Resolver};
use crate::source_error::map_source_error;
use crate::store::{ControlCache, StateStore, cache_key};
use crate::util::step_dt_secs;

const FAULT_KEYS: &[&str] = &["fault", "Fault", "alarm", "Alarm"];
const STATUS_KEYS: &[&str] = &["status", "Status"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    Controlled,
    Emergency { reason: String },
    SafeState { fault: String },
    /// No control function for this kind; nothing was evaluated.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub equipment_id: String,
    pub site_id: String,
    pub equipment_type: String,
    pub kind: Option<String>,
    pub strategy: Option<&'static str>,
    pub outcome: Outcome,
    pub metrics_origin: Option<MetricsOrigin>,
    pub outputs: FieldMap,
    pub alerts: Vec<Alert>,
    pub emitted: EmitSummary,
    pub timestamp_ms: u64,
}

pub struct Engine {
    pub(crate) directory: Box<dyn EquipmentDirectory + Send>,
    pub(crate) metrics: Box<dyn MetricsStore + Send>,
    pub(crate) realtime: Option<Box<dyn RealtimeStore + Send>>,
    pub(crate) sink: Box<dyn CommandSink + Send>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) registry: Registry,
    pub(crate) resolver: Resolver,
    pub(crate) cache: ControlCache,
    pub(crate) state: Box<dyn StateStore>,
    pub(crate) alerts: AlertTracker,
    pub(crate) tuning: Tuning,
    pub(crate) timing: Timing,
    pub(crate) lead_lag: LeadLagCfg,
    pub(crate) site_settings: HashMap<(String, Kind), FieldMap>,
    pub(crate) persistence: Option<CachePersistence>,
    pub(crate) last_snapshot_ms: u64,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("cached_units", &self.cache.len())
            .field("timing", &self.timing)
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

fn source_report(e: &hvac_traits::BoxError) -> eyre::Report {
    eyre::Report::new(map_source_error(e.as_ref()))
}

impl Engine {
    pub fn builder() -> EngineBuilder<Missing, Missing, Missing> {
        EngineBuilder::default()
    }

    pub fn cache(&self) -> &ControlCache {
        &self.cache
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn group_memory(&self, group_id: &str) -> Option<&LeadLagGroupMemory> {
        self.state.peek_group(group_id)
    }

    /// Ids of every unit eligible for a run-all request, in directory order.
    pub fn eligible(&self) -> Result<Vec<String>> {
        let entries = self.directory.eligible().map_err(|e| source_report(&e))?;
        Ok(entries.into_iter().map(|e| e.equipment_id).collect())
    }

    fn site_defaults(&self, site_id: &str, kind: Kind) -> Option<&FieldMap> {
        self.site_settings.get(&(site_id.to_string(), kind))
    }

    fn cached_enable(&self, site_id: &str, equipment_id: &str) -> bool {
        self.cache
            .values(site_id, equipment_id)
            .is_some_and(|v| coerce::bool_or(v, &["unitEnable"], false))
    }

    /// Seed built-in defaults for every controllable unit that has no cache entry.
    pub fn seed_cache(&mut self) -> Result<usize> {
        let entries = self.directory.eligible().map_err(|e| source_report(&e))?;
        let now = self.clock.now_ms();
        let mut seeded = 0;
        for e in entries {
            let Some(kind) = normalize_type(&e.equipment_type) else {
                continue;
            };
            if self.registry.dispatch(Some(kind), &e.site_id).is_none() {
                continue;
            }
            let defaults = apply_defaults(kind, &e.equipment_type, self.site_defaults(&e.site_id, kind));
            if self.cache.get(&e.site_id, &e.equipment_id).is_none() {
                self.cache.seed(&e.site_id, &e.equipment_id, defaults, now);
                seeded += 1;
            }
        }
        tracing::info!(seeded, "control cache seeded from defaults");
        Ok(seeded)
    }

    /// Write the cache to its durable file. Returns false when no file is configured.
    pub fn save_cache(&mut self) -> Result<bool> {
        match &self.persistence {
            Some(p) => {
                self.cache.save(&p.path)?;
                self.last_snapshot_ms = self.clock.now_ms();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Periodic-mode snapshot when the interval elapsed and the cache changed.
    pub fn snapshot_if_due(&mut self) -> Result<bool> {
        let Some(p) = &self.persistence else {
            return Ok(false);
        };
        let now = self.clock.now_ms();
        if p.mode != PersistMode::Periodic
            || !self.cache.is_dirty()
            || now.saturating_sub(self.last_snapshot_ms) < p.snapshot_interval_ms
        {
            return Ok(false);
        }
        self.save_cache()
    }

    /// Save the cache when it changed since the last write, whatever the mode.
    pub fn flush_cache(&mut self) -> Result<bool> {
        if self.persistence.is_none() || !self.cache.is_dirty() {
            return Ok(false);
        }
        self.save_cache()
    }

    fn persist_after_write(&mut self) {
        let Some(p) = &self.persistence else {
            return;
        };
        if p.mode == PersistMode::OnWrite && self.cache.is_dirty() {
            if let Err(e) = self.cache.save(&p.path) {
                tracing::warn!(path = %p.path.display(), error = %e, "control cache save failed");
            }
        }
    }

    /// Clear derived caches: realtime key memos, alert cooldowns and the
    /// control cache, which is re-seeded from defaults. Controller memory is kept.
    pub fn clear_derived(&mut self) -> Result<usize> {
        self.resolver.clear_derived();
        self.alerts.clear();
        self.cache.clear();
        let seeded = self.seed_cache()?;
        if let Some(p) = &self.persistence {
            self.cache.save(&p.path)?;
        }
        tracing::info!(seeded, "derived caches cleared");
        Ok(seeded)
    }

    fn lead_status(&mut self, lead_id: &str, site_id: &str, now_ms: u64) -> LeadStatus {
        let entry = self.directory.lookup(lead_id).ok().flatten();
        let lead_eq = EquipmentRef {
            equipment_id: lead_id.to_string(),
            site_id: entry.as_ref().map_or_else(|| site_id.to_string(), |e| e.site_id.clone()),
            equipment_type: entry.as_ref().map(|e| e.equipment_type.clone()).unwrap_or_default(),
            kind: entry.as_ref().and_then(|e| normalize_type(&e.equipment_type)),
        };
        let realtime = self.realtime.as_ref().map(|r| &**r as &dyn RealtimeStore);
        let m = self
            .resolver
            .resolve_metrics(&lead_eq, entry.as_ref(), self.metrics.as_ref(), realtime, now_ms)
            .fields;
        let status_fault = coerce::first_text(&m, STATUS_KEYS).is_some_and(|s| s.eq_ignore_ascii_case("fault"));
        LeadStatus {
            unit_enable: self.cached_enable(&lead_eq.site_id, lead_id),
            amps: coerce::first_number(&m, pump::AMPS_KEYS),
            fault: status_fault || coerce::first_bool(&m, FAULT_KEYS).unwrap_or(false),
        }
    }

    /// Lead-lag role for a grouped unit. Members are assumed to share the unit's site.
    fn lead_lag_step(
        &mut self,
        entry: &DirectoryEntry,
        eq: &EquipmentRef,
        metrics: &FieldMap,
        settings: &FieldMap,
        now_ms: u64,
    ) -> Option<LeadLagDecision> {
        let group_id = entry.group_id.as_deref()?;
        let members = match self.directory.group_members(group_id) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(group_id, error = %map_source_error(e.as_ref()), "group members unavailable");
                return None;
            }
        };
        if members.len() < 2 || !members.contains(&eq.equipment_id) {
            return None;
        }
        let params = self.lead_lag.params;
        let any_running = members.iter().any(|m| self.cached_enable(&eq.site_id, m));

        let lead = {
            let group = self.state.group(group_id);
            establish_lead(group, &members, now_ms);
            check_rotation(group, &members, any_running, &params, now_ms);
            group.lead_equipment_id.clone()
        };
        let lead_status = match lead.as_deref() {
            Some(l) if l != eq.equipment_id => Some(self.lead_status(l, &eq.site_id, now_ms)),
            _ => None,
        };
        let extreme = self.lead_lag.bands.get(group_id).is_some_and(|b| {
            let keys = [b.metric.as_str()];
            coerce::first_number(metrics, &keys)
                .or_else(|| coerce::first_number(settings, &keys))
                .is_some_and(|v| b.contains(v))
        });
        let lead_override = settings.get("leadOverride").and_then(coerce::boolean);
        let enabled_now = self.cached_enable(&eq.site_id, &eq.equipment_id);

        let group = self.state.group(group_id);
        let decision = resolve_lead_lag(
            &eq.equipment_id,
            &members,
            lead_override,
            group,
            lead_status.as_ref(),
            extreme,
            &params,
            now_ms,
        );
        record_runtime(group, &eq.equipment_id, enabled_now, now_ms);
        Some(decision)
    }

    /// Evaluate one unit end to end.
    ///
    /// Only directory failures and unknown ids are errors. Everything past
    /// that point degrades: missing data yields defaults and control faults
    /// yield a safe-state result.
    pub fn evaluate(&mut self, equipment_id: &str) -> Result<EvaluationReport> {
        let now = self.clock.now_ms();
        let entry = self
            .directory
            .lookup(equipment_id)
            .map_err(|e| source_report(&e))?
            .ok_or_else(|| eyre::Report::new(EngineError::UnknownEquipment(equipment_id.to_string())))?;
        let kind = normalize_type(&entry.equipment_type);
        let eq = EquipmentRef {
            equipment_id: entry.equipment_id.clone(),
            site_id: entry.site_id.clone(),
            equipment_type: entry.equipment_type.clone(),
            kind,
        };
        let mut report = EvaluationReport {
            equipment_id: eq.equipment_id.clone(),
            site_id: eq.site_id.clone(),
            equipment_type: eq.equipment_type.clone(),
            kind: kind.map(|k| k.as_str().to_string()),
            strategy: None,
            outcome: Outcome::Unsupported,
            metrics_origin: None,
            outputs: FieldMap::new(),
            alerts: Vec::new(),
            emitted: EmitSummary::default(),
            timestamp_ms: now,
        };

        let (Some(kind), Some(strategy)) = (kind, self.registry.dispatch(kind, &eq.site_id)) else {
            tracing::debug!(
                equipment_id = %eq.equipment_id,
                equipment_type = %eq.equipment_type,
                "no control function for equipment type, skipping"
            );
            return Ok(report);
        };
        report.strategy = Some(strategy.name);

        let realtime = self.realtime.as_ref().map(|r| &**r as &dyn RealtimeStore);
        let resolved = self
            .resolver
            .resolve_metrics(&eq, Some(&entry), self.metrics.as_ref(), realtime, now);
        let settings = self.resolver.resolve_settings(
            &eq,
            kind,
            self.site_defaults(&eq.site_id, kind),
            self.cache.values(&eq.site_id, &eq.equipment_id),
            self.metrics.as_ref(),
        );
        let current = self
            .cache
            .values(&eq.site_id, &eq.equipment_id)
            .cloned()
            .unwrap_or_default();
        let lead_lag = self.lead_lag_step(&entry, &eq, &resolved.fields, &settings, now);

        let key = cache_key(&eq.site_id, &eq.equipment_id);
        let guarded = {
            let unit = self.state.unit(&key);
            let dt_secs = step_dt_secs(
                unit.last_eval_ms,
                now,
                self.timing.default_dt_secs,
                self.timing.max_dt_secs,
            );
            let ctx = ControlContext {
                equipment: &eq,
                metrics: &resolved.fields,
                settings: &settings,
                current: &current,
                tuning: &self.tuning,
                lead_lag: lead_lag.as_ref(),
                now_ms: now,
                dt_secs,
            };
            let g = run_guarded(&strategy, &ctx, unit);
            unit.last_eval_ms = Some(now);
            g
        };
        let mut result = guarded.result;

        report.outcome = match (&guarded.fault, &result.emergency) {
            (Some(fault), _) => Outcome::SafeState {
                fault: fault.clone(),
            },
            (None, Some(reason)) => {
                tracing::warn!(
                    equipment_id = %eq.equipment_id,
                    site_id = %eq.site_id,
                    kind = %kind,
                    reason = %reason,
                    "emergency shutdown"
                );
                Outcome::Emergency {
                    reason: reason.clone(),
                }
            }
            (None, None) => Outcome::Controlled,
        };

        let mut raised = std::mem::take(&mut result.alerts);
        raised.extend(self.alerts.thresholds(kind, &resolved.fields));
        let admitted = self.alerts.admit(&eq.equipment_id, raised, now);
        for a in &admitted {
            match a.severity {
                Severity::Info => {
                    tracing::info!(equipment_id = %eq.equipment_id, alert_type = %a.alert_type, message = %a.message, "alert");
                }
                Severity::Warning | Severity::Critical => {
                    tracing::warn!(
                        equipment_id = %eq.equipment_id,
                        severity = %a.severity,
                        alert_type = %a.alert_type,
                        message = %a.message,
                        "alert"
                    );
                }
            }
        }

        report.emitted = emit(self.sink.as_mut(), &mut self.cache, &eq, &result.outputs, now);
        self.persist_after_write();

        tracing::info!(
            equipment_id = %eq.equipment_id,
            site_id = %eq.site_id,
            strategy = strategy.name,
            sent = report.emitted.sent,
            failed = report.emitted.failed,
            "evaluation complete"
        );

        report.metrics_origin = Some(resolved.origin);
        report.outputs = result.outputs;
        report.alerts = admitted;
        Ok(report)
    }
}
