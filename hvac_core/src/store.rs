//! Control value cache and per-unit control state.
//!
//! The cache holds last-known-good values per unit and is durable across
//! restarts. The state store holds controller memory (PID, staging, lead-lag)
//! for the lifetime of the process only.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::Path;

use hvac_traits::FieldMap;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{EngineError, Result};
use crate::lead_lag::LeadLagGroupMemory;
use crate::pid::PidMemory;
use crate::staging::StagingMemory;

/// Cache key for one unit.
pub fn cache_key(site_id: &str, equipment_id: &str) -> String {
    format!("{site_id}_{equipment_id}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub values: FieldMap,
    pub timestamp: u64,
}

/// Last commanded values per unit, keyed `"{site}_{equipment}"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlCache {
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
}

impl ControlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, site_id: &str, equipment_id: &str) -> Option<&CacheEntry> {
        self.entries.get(&cache_key(site_id, equipment_id))
    }

    pub fn values(&self, site_id: &str, equipment_id: &str) -> Option<&FieldMap> {
        self.get(site_id, equipment_id).map(|e| &e.values)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    /// Shallow merge of `values` into the unit's entry. Returns whether any value changed.
    ///
    /// The timestamp never moves backwards.
    pub fn merge(&mut self, site_id: &str, equipment_id: &str, values: &FieldMap, now_ms: u64) -> bool {
        let entry = self.entries.entry(cache_key(site_id, equipment_id)).or_default();
        let mut changed = false;
        for (k, v) in values {
            match entry.values.get(k) {
                Some(old) if old.same_as(v) => {}
                _ => {
                    entry.values.insert(k.clone(), v.clone());
                    changed = true;
                }
            }
        }
        entry.timestamp = entry.timestamp.max(now_ms);
        self.dirty |= changed;
        changed
    }

    /// Insert `values` only where the unit has no entry yet.
    pub fn seed(&mut self, site_id: &str, equipment_id: &str, values: FieldMap, now_ms: u64) {
        self.entries
            .entry(cache_key(site_id, equipment_id))
            .or_insert_with(|| CacheEntry {
                values,
                timestamp: now_ms,
            });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    /// Read the durable cache file. A missing, empty or corrupt file yields an empty cache.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no control cache file, starting empty");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "control cache unreadable, starting empty");
                return Self::default();
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }
        match serde_json::from_slice::<BTreeMap<String, CacheEntry>>(&bytes) {
            Ok(entries) => {
                tracing::info!(path = %path.display(), entries = entries.len(), "control cache loaded");
                Self {
                    entries,
                    dirty: false,
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "control cache corrupt, starting empty");
                Self::default()
            }
        }
    }

    /// Write the full cache atomically as pretty JSON and clear the dirty flag.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| EngineError::Store(format!("serialize cache: {e}")))?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| EngineError::Io(format!("{}: {e}", dir.display())))?;
        }
        write_atomic(path, &bytes).map_err(|e| EngineError::Io(format!("{}: {e}", path.display())))?;
        self.dirty = false;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "control cache saved");
        Ok(())
    }
}

/// Controller memory for one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    /// PID memory by controller role ("heating", "cooling", ...).
    pub pid: BTreeMap<String, PidMemory>,
    /// Staging memory by application ("compressors", "burners", ...).
    pub staging: BTreeMap<String, StagingMemory>,
    pub last_eval_ms: Option<u64>,
}

impl UnitState {
    pub fn pid(&mut self, role: &str) -> &mut PidMemory {
        self.pid.entry(role.to_string()).or_default()
    }

    pub fn staging(&mut self, role: &str) -> &mut StagingMemory {
        self.staging.entry(role.to_string()).or_default()
    }

    /// Number of stages of the largest staging application, for safe-state outputs.
    pub fn stage_count(&self) -> usize {
        self.staging.values().map(|s| s.stages.len()).max().unwrap_or(0)
    }
}

/// Get/set access to control state by key, owned by the evaluation pipeline.
pub trait StateStore: Send {
    /// State for the unit keyed by `cache_key`; created on first use.
    fn unit(&mut self, key: &str) -> &mut UnitState;
    /// Shared memory for a lead-lag group; created on first use.
    fn group(&mut self, group_id: &str) -> &mut LeadLagGroupMemory;
    fn peek_group(&self, group_id: &str) -> Option<&LeadLagGroupMemory>;
    fn clear(&mut self);
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    units: HashMap<String, UnitState>,
    groups: HashMap<String, LeadLagGroupMemory>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn unit(&mut self, key: &str) -> &mut UnitState {
        self.units.entry(key.to_string()).or_default()
    }

    fn group(&mut self, group_id: &str) -> &mut LeadLagGroupMemory {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| LeadLagGroupMemory::new(group_id))
    }

    fn peek_group(&self, group_id: &str) -> Option<&LeadLagGroupMemory> {
        self.groups.get(group_id)
    }

    fn clear(&mut self) {
        self.units.clear();
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_traits::MetricValue;
    use tempfile::tempdir;

    fn result() -> FieldMap {
        let mut m = FieldMap::new();
        m.insert("firing".into(), MetricValue::Number(1.0));
        m.insert("unitEnable".into(), MetricValue::Bool(true));
        m
    }

    #[test]
    fn merge_is_idempotent_but_timestamp_advances() {
        let mut c = ControlCache::new();
        assert!(c.merge("s", "b1", &result(), 1_000));
        let first = c.get("s", "b1").cloned().unwrap();
        assert!(!c.merge("s", "b1", &result(), 2_000));
        let second = c.get("s", "b1").unwrap();
        assert_eq!(first.values, second.values);
        assert_eq!(second.timestamp, 2_000);
    }

    #[test]
    fn merge_keeps_unrelated_fields() {
        let mut c = ControlCache::new();
        let mut a = FieldMap::new();
        a.insert("waterTempSetpoint".into(), MetricValue::Number(150.0));
        c.merge("s", "b1", &a, 1);
        c.merge("s", "b1", &result(), 2);
        assert_eq!(c.values("s", "b1").unwrap().len(), 3);
    }

    #[test]
    fn timestamp_is_monotonic() {
        let mut c = ControlCache::new();
        c.merge("s", "b1", &result(), 5_000);
        c.merge("s", "b1", &result(), 4_000);
        assert_eq!(c.get("s", "b1").unwrap().timestamp, 5_000);
    }

    #[test]
    fn save_and_load_use_flat_keyed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let mut c = ControlCache::new();
        c.merge("site-a", "boiler-1", &result(), 42);
        c.save(&path).unwrap();
        assert!(!c.is_dirty());

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["site-a_boiler-1"]["timestamp"], 42);
        assert_eq!(raw["site-a_boiler-1"]["values"]["unitEnable"], true);

        let back = ControlCache::load(&path);
        assert_eq!(back.get("site-a", "boiler-1"), c.get("site-a", "boiler-1"));
    }

    #[test]
    fn missing_empty_and_corrupt_files_load_empty() {
        let dir = tempdir().unwrap();
        assert!(ControlCache::load(&dir.path().join("none.json")).is_empty());
        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "").unwrap();
        assert!(ControlCache::load(&empty).is_empty());
        let obj = dir.path().join("obj.json");
        std::fs::write(&obj, "{}").unwrap();
        assert!(ControlCache::load(&obj).is_empty());
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert!(ControlCache::load(&bad).is_empty());
    }

    #[test]
    fn seed_does_not_overwrite() {
        let mut c = ControlCache::new();
        c.merge("s", "b1", &result(), 1);
        c.seed("s", "b1", FieldMap::new(), 2);
        c.seed("s", "b2", result(), 2);
        assert_eq!(c.values("s", "b1").unwrap().len(), 2);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn state_store_creates_on_first_use() {
        let mut s = MemoryStateStore::new();
        s.unit("s_b1").pid("heating").integral = 3.0;
        assert_eq!(s.unit("s_b1").pid["heating"].integral, 3.0);
        assert_eq!(s.group("g").group_id, "g");
        assert!(s.peek_group("g").is_some());
        s.clear();
        assert!(s.peek_group("g").is_none());
    }
}
