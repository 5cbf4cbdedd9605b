//! Metrics and settings resolution with ordered fallbacks.
//!
//! Metrics: primary window, widened window, realtime store under the unit's
//! system name, then any site child matching the unit's id/name/aliases.
//! Settings: built-in defaults (with site overrides) < cached values < last
//! operator command for allow-listed fields.
//!
//! Both resolutions are total. Collaborator errors degrade to the next step
//! and are logged at debug level.

use std::collections::HashMap;

use hvac_traits::{DirectoryEntry, FieldMap, MetricRow, MetricsStore, RealtimeStore};
use serde::Serialize;

use crate::control::EquipmentRef;
use crate::defaults::{apply_defaults, command_allow_list};
use crate::error::EngineError;
use crate::kind::Kind;
use crate::source_error::map_source_error;

/// Where a metrics snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "source", content = "key")]
pub enum MetricsOrigin {
    Primary,
    Widened,
    SystemName(String),
    SiteChild(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetrics {
    pub fields: FieldMap,
    pub origin: MetricsOrigin,
}

impl ResolvedMetrics {
    fn empty() -> Self {
        Self {
            fields: FieldMap::new(),
            origin: MetricsOrigin::Empty,
        }
    }
}

/// Newest-wins fold of rows into one flat map. Older rows only fill fields the
/// newer ones lack.
pub fn fold_rows(mut rows: Vec<MetricRow>) -> FieldMap {
    rows.sort_by_key(|r| r.timestamp_ms);
    let mut out = FieldMap::new();
    for row in rows {
        out.extend(row.fields);
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    primary_window_ms: u64,
    fallback_window_ms: u64,
    /// Realtime key a unit was last matched under by the site-child search.
    derived: HashMap<String, String>,
}

impl Resolver {
    pub fn new(primary_window_ms: u64, fallback_window_ms: u64) -> Self {
        Self {
            primary_window_ms,
            fallback_window_ms,
            derived: HashMap::new(),
        }
    }

    pub fn derived_len(&self) -> usize {
        self.derived.len()
    }

    /// Forget memoized realtime matches.
    pub fn clear_derived(&mut self) {
        self.derived.clear();
    }

    fn query(
        &self,
        store: &dyn MetricsStore,
        eq: &EquipmentRef,
        window_ms: u64,
        now_ms: u64,
    ) -> Option<FieldMap> {
        let since = now_ms.saturating_sub(window_ms);
        match store.query(&eq.equipment_id, &eq.site_id, since) {
            Ok(rows) if !rows.is_empty() => Some(fold_rows(rows)).filter(|m| !m.is_empty()),
            Ok(_) => None,
            Err(e) => {
                let err = map_source_error(e.as_ref());
                tracing::debug!(
                    equipment_id = %eq.equipment_id,
                    site_id = %eq.site_id,
                    window_ms,
                    error = %err,
                    "metrics query failed, falling back"
                );
                None
            }
        }
    }

    fn latest(realtime: &dyn RealtimeStore, eq: &EquipmentRef, key: &str) -> Option<FieldMap> {
        match realtime.latest(&eq.site_id, key) {
            Ok(Some(m)) if !m.is_empty() => Some(m),
            Ok(_) => None,
            Err(e) => {
                let err = map_source_error(e.as_ref());
                tracing::debug!(equipment_id = %eq.equipment_id, key, error = %err, "realtime lookup failed");
                None
            }
        }
    }

    /// Case-insensitive exact match on id, name or alias first, then substring.
    fn match_child(
        realtime: &dyn RealtimeStore,
        eq: &EquipmentRef,
        entry: Option<&DirectoryEntry>,
    ) -> Option<(String, FieldMap)> {
        let mut children = match realtime.children(&eq.site_id) {
            Ok(c) => c,
            Err(e) => {
                let err = map_source_error(e.as_ref());
                tracing::debug!(site_id = %eq.site_id, error = %err, "site children lookup failed");
                return None;
            }
        };
        let mut candidates = vec![eq.equipment_id.to_lowercase()];
        if let Some(entry) = entry {
            candidates.extend(entry.name.iter().map(|n| n.to_lowercase()));
            candidates.extend(entry.aliases.iter().map(|a| a.to_lowercase()));
        }
        candidates.retain(|c| !c.trim().is_empty());

        let exact = children
            .iter()
            .position(|(k, _)| candidates.contains(&k.to_lowercase()));
        let found = exact.or_else(|| {
            children.iter().position(|(k, _)| {
                let k = k.to_lowercase();
                candidates.iter().any(|c| k.contains(c.as_str()))
            })
        });
        found
            .map(|i| children.swap_remove(i))
            .filter(|(_, m)| !m.is_empty())
    }

    /// Current metrics for one unit; empty when every source comes up dry.
    pub fn resolve_metrics(
        &mut self,
        eq: &EquipmentRef,
        entry: Option<&DirectoryEntry>,
        store: &dyn MetricsStore,
        realtime: Option<&dyn RealtimeStore>,
        now_ms: u64,
    ) -> ResolvedMetrics {
        if let Some(fields) = self.query(store, eq, self.primary_window_ms, now_ms) {
            return ResolvedMetrics {
                fields,
                origin: MetricsOrigin::Primary,
            };
        }
        if self.fallback_window_ms > self.primary_window_ms {
            if let Some(fields) = self.query(store, eq, self.fallback_window_ms, now_ms) {
                tracing::debug!(equipment_id = %eq.equipment_id, "metrics found in widened window");
                return ResolvedMetrics {
                    fields,
                    origin: MetricsOrigin::Widened,
                };
            }
        }
        let Some(realtime) = realtime else {
            tracing::debug!(equipment_id = %eq.equipment_id, "no metrics and no realtime store");
            return ResolvedMetrics::empty();
        };

        if let Some(system) = entry.and_then(|e| e.system_name.as_deref()) {
            if let Some(fields) = Self::latest(realtime, eq, system) {
                tracing::debug!(equipment_id = %eq.equipment_id, system, "metrics found under system name");
                return ResolvedMetrics {
                    fields,
                    origin: MetricsOrigin::SystemName(system.to_string()),
                };
            }
        }

        if let Some(key) = self.derived.get(&eq.equipment_id).cloned() {
            if let Some(fields) = Self::latest(realtime, eq, &key) {
                return ResolvedMetrics {
                    fields,
                    origin: MetricsOrigin::SiteChild(key),
                };
            }
            self.derived.remove(&eq.equipment_id);
        }

        match Self::match_child(realtime, eq, entry) {
            Some((key, fields)) => {
                tracing::debug!(equipment_id = %eq.equipment_id, key = %key, "metrics matched among site children");
                self.derived.insert(eq.equipment_id.clone(), key.clone());
                ResolvedMetrics {
                    fields,
                    origin: MetricsOrigin::SiteChild(key),
                }
            }
            None => {
                tracing::debug!(equipment_id = %eq.equipment_id, site_id = %eq.site_id, "no metrics from any source");
                ResolvedMetrics::empty()
            }
        }
    }

    /// Settings for one unit of a known kind.
    ///
    /// Command history is consulted only for the kind's allow-list. A timeout
    /// stops further history lookups for this evaluation.
    pub fn resolve_settings(
        &self,
        eq: &EquipmentRef,
        kind: Kind,
        site_defaults: Option<&FieldMap>,
        cached: Option<&FieldMap>,
        store: &dyn MetricsStore,
    ) -> FieldMap {
        let mut settings = apply_defaults(kind, &eq.equipment_type, site_defaults);
        if let Some(cached) = cached {
            for (k, v) in cached {
                settings.insert(k.clone(), v.clone());
            }
        }
        for field in command_allow_list(kind) {
            match store.last_command(&eq.equipment_id, &eq.site_id, field) {
                Ok(Some(v)) => {
                    settings.insert((*field).to_string(), v);
                }
                Ok(None) => {}
                Err(e) => {
                    let err = map_source_error(e.as_ref());
                    tracing::debug!(
                        equipment_id = %eq.equipment_id,
                        field = *field,
                        error = %err,
                        "command history lookup failed"
                    );
                    if err == EngineError::SourceTimeout {
                        break;
                    }
                }
            }
        }
        settings
    }
}
