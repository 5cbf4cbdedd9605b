//! In-memory collaborators for tests, benches and dry runs.
//!
//! Every mock is a cheap `Clone` over shared state, so a test can hand one
//! copy to the engine and keep another to seed data or inspect commands.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hvac_traits::{
    BoxError, Command, CommandSink, DirectoryEntry, EquipmentDirectory, FieldMap, MetricRow,
    MetricValue, MetricsStore, RealtimeStore,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable(what: &str) -> BoxError {
    Box::new(std::io::Error::other(format!("{what} unavailable")))
}

/// Directory entry with just the identifying fields set.
pub fn entry(equipment_id: &str, site_id: &str, equipment_type: &str) -> DirectoryEntry {
    DirectoryEntry {
        equipment_id: equipment_id.to_string(),
        site_id: site_id.to_string(),
        equipment_type: equipment_type.to_string(),
        ..DirectoryEntry::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Arc<Mutex<Vec<DirectoryEntry>>>,
}

impl MemoryDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn insert(&self, e: DirectoryEntry) {
        lock(&self.entries).push(e);
    }
}

impl EquipmentDirectory for MemoryDirectory {
    fn lookup(&self, equipment_id: &str) -> Result<Option<DirectoryEntry>, BoxError> {
        Ok(lock(&self.entries)
            .iter()
            .find(|e| e.equipment_id == equipment_id)
            .cloned())
    }

    fn eligible(&self) -> Result<Vec<DirectoryEntry>, BoxError> {
        Ok(lock(&self.entries).clone())
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    rows: HashMap<(String, String), Vec<MetricRow>>,
    commands: HashMap<(String, String, String), MetricValue>,
    fail: bool,
    queries: usize,
}

/// Time-series store backed by a map of rows per (site, equipment).
#[derive(Debug, Clone, Default)]
pub struct MemoryMetrics {
    inner: Arc<Mutex<MetricsInner>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, site_id: &str, equipment_id: &str, row: MetricRow) {
        lock(&self.inner)
            .rows
            .entry((site_id.to_string(), equipment_id.to_string()))
            .or_default()
            .push(row);
    }

    /// Replace the unit's rows with a single row at `timestamp_ms`.
    pub fn set(&self, site_id: &str, equipment_id: &str, timestamp_ms: u64, fields: FieldMap) {
        lock(&self.inner).rows.insert(
            (site_id.to_string(), equipment_id.to_string()),
            vec![MetricRow {
                timestamp_ms,
                fields,
            }],
        );
    }

    pub fn set_command(&self, site_id: &str, equipment_id: &str, field: &str, value: MetricValue) {
        lock(&self.inner).commands.insert(
            (site_id.to_string(), equipment_id.to_string(), field.to_string()),
            value,
        );
    }

    /// Make every query and command lookup fail.
    pub fn fail_queries(&self, fail: bool) {
        lock(&self.inner).fail = fail;
    }

    pub fn query_count(&self) -> usize {
        lock(&self.inner).queries
    }
}

impl MetricsStore for MemoryMetrics {
    fn query(&self, equipment_id: &str, site_id: &str, since_ms: u64) -> Result<Vec<MetricRow>, BoxError> {
        let mut inner = lock(&self.inner);
        inner.queries += 1;
        if inner.fail {
            return Err(unavailable("metrics store"));
        }
        Ok(inner
            .rows
            .get(&(site_id.to_string(), equipment_id.to_string()))
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.timestamp_ms >= since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn last_command(
        &self,
        equipment_id: &str,
        site_id: &str,
        command_type: &str,
    ) -> Result<Option<MetricValue>, BoxError> {
        let inner = lock(&self.inner);
        if inner.fail {
            return Err(unavailable("command history"));
        }
        Ok(inner
            .commands
            .get(&(
                site_id.to_string(),
                equipment_id.to_string(),
                command_type.to_string(),
            ))
            .cloned())
    }
}

#[derive(Debug, Default)]
struct RealtimeInner {
    tree: BTreeMap<String, BTreeMap<String, FieldMap>>,
    fail: bool,
}

/// Realtime tree: site → system key → latest metrics.
#[derive(Debug, Clone, Default)]
pub struct MemoryRealtime {
    inner: Arc<Mutex<RealtimeInner>>,
}

impl MemoryRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, site_id: &str, system: &str, pairs: &[(&str, MetricValue)]) {
        let fields = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        lock(&self.inner)
            .tree
            .entry(site_id.to_string())
            .or_default()
            .insert(system.to_string(), fields);
    }

    pub fn fail(&self, fail: bool) {
        lock(&self.inner).fail = fail;
    }
}

impl RealtimeStore for MemoryRealtime {
    fn latest(&self, site_id: &str, system: &str) -> Result<Option<FieldMap>, BoxError> {
        let inner = lock(&self.inner);
        if inner.fail {
            return Err(unavailable("realtime store"));
        }
        Ok(inner.tree.get(site_id).and_then(|s| s.get(system)).cloned())
    }

    fn children(&self, site_id: &str) -> Result<Vec<(String, FieldMap)>, BoxError> {
        let inner = lock(&self.inner);
        if inner.fail {
            return Err(unavailable("realtime store"));
        }
        Ok(inner
            .tree
            .get(site_id)
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct SinkInner {
    sent: Vec<Command>,
    fail: bool,
}

/// Command sink that records every delivered command.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<Command> {
        lock(&self.inner).sent.clone()
    }

    /// Commands for one field, in send order.
    pub fn values(&self, equipment_id: &str, command_type: &str) -> Vec<MetricValue> {
        lock(&self.inner)
            .sent
            .iter()
            .filter(|c| c.equipment_id == equipment_id && c.command_type == command_type)
            .map(|c| c.value.clone())
            .collect()
    }

    pub fn fail(&self, fail: bool) {
        lock(&self.inner).fail = fail;
    }

    pub fn clear(&self) {
        lock(&self.inner).sent.clear();
    }
}

impl CommandSink for RecordingSink {
    fn send(&mut self, command: &Command) -> Result<(), BoxError> {
        let mut inner = lock(&self.inner);
        if inner.fail {
            return Err(unavailable("command sink"));
        }
        inner.sent.push(command.clone());
        Ok(())
    }
}
