//! JSON fixture standing in for the time-series store and the realtime tree.
//!
//! ```json
//! {
//!   "metrics":  { "<site>": { "<equipment>": [ { "age_secs": 10, "fields": { "H2OSupply": 130 } } ] } },
//!   "realtime": { "<site>": { "<system>": { "SupplyTemp": 140 } } },
//!   "commands": { "<site>": { "<equipment>": { "waterTempSetpoint": 155 } } },
//!   "unavailable": ["<site>"]
//! }
//! ```
//!
//! A row carries either an absolute `timestamp_ms`, an `age_secs` relative to
//! the query time, or neither, in which case it is stamped with the query time.
//! Sites listed under `unavailable` answer every query with a timeout.
//!
//! The file is re-read when its modification time changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use hvac_traits::{BoxError, Clock, FieldMap, MetricRow, MetricValue, MetricsStore, RealtimeStore, SystemClock};
use serde::Deserialize;

use crate::error::{AdapterError, Result};
use crate::util::lock_with_timeout;

const LOCK_TIMEOUT: Duration = Duration::from_millis(250);
const LOCK_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default, Deserialize)]
struct FixtureRow {
    timestamp_ms: Option<u64>,
    age_secs: Option<u64>,
    #[serde(default)]
    fields: FieldMap,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FixtureFile {
    metrics: BTreeMap<String, BTreeMap<String, Vec<FixtureRow>>>,
    realtime: BTreeMap<String, BTreeMap<String, FieldMap>>,
    commands: BTreeMap<String, BTreeMap<String, FieldMap>>,
    unavailable: Vec<String>,
}

#[derive(Debug, Default)]
struct Loaded {
    data: FixtureFile,
    modified: Option<SystemTime>,
}

fn parse(text: &str) -> Result<FixtureFile> {
    serde_json::from_str(text).map_err(|e| AdapterError::Parse(e.to_string()))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// File-backed `MetricsStore` + `RealtimeStore`. Clones share the loaded data.
#[derive(Clone)]
pub struct JsonFixtureStore {
    path: Option<PathBuf>,
    clock: Arc<dyn Clock + Send + Sync>,
    inner: Arc<Mutex<Loaded>>,
}

impl std::fmt::Debug for JsonFixtureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFixtureStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonFixtureStore {
    /// Load a fixture file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)?;
        let data = parse(&text)?;
        tracing::info!(
            path = %path.display(),
            sites = data.metrics.len(),
            "metrics fixture loaded"
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(Loaded {
                data,
                modified: modified(&path),
            })),
            path: Some(path),
            clock: Arc::new(SystemClock::new()),
        })
    }

    /// In-memory fixture, never reloaded.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self {
            path: None,
            clock: Arc::new(SystemClock::new()),
            inner: Arc::new(Mutex::new(Loaded {
                data: parse(text)?,
                modified: None,
            })),
        })
    }

    /// Clock used to stamp relative rows; defaults to `SystemClock`.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Re-read the file when it changed on disk. Returns whether it was reloaded.
    ///
    /// A file that no longer parses keeps the previous data.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let mut g = lock_with_timeout(&self.inner, LOCK_TIMEOUT, LOCK_POLL)?;
        let now_modified = modified(path);
        if now_modified.is_none() || now_modified == g.modified {
            return Ok(false);
        }
        let text = std::fs::read_to_string(path)?;
        match parse(&text) {
            Ok(data) => {
                g.data = data;
                g.modified = now_modified;
                tracing::info!(path = %path.display(), "metrics fixture reloaded");
                Ok(true)
            }
            Err(e) => {
                g.modified = now_modified;
                tracing::warn!(path = %path.display(), error = %e, "metrics fixture unreadable, keeping previous data");
                Ok(false)
            }
        }
    }

    fn with_site<T>(&self, site_id: &str, f: impl FnOnce(&FixtureFile) -> T) -> Result<T> {
        if let Err(e) = self.reload_if_changed() {
            tracing::debug!(error = %e, "fixture reload check failed");
        }
        let g = lock_with_timeout(&self.inner, LOCK_TIMEOUT, LOCK_POLL)?;
        if g.data.unavailable.iter().any(|s| s == site_id) {
            return Err(AdapterError::Timeout);
        }
        Ok(f(&g.data))
    }
}

impl MetricsStore for JsonFixtureStore {
    fn query(&self, equipment_id: &str, site_id: &str, since_ms: u64) -> std::result::Result<Vec<MetricRow>, BoxError> {
        let now = self.clock.now_ms();
        let rows = self.with_site(site_id, |d| {
            d.metrics
                .get(site_id)
                .and_then(|s| s.get(equipment_id))
                .map(|rows| {
                    rows.iter()
                        .map(|r| MetricRow {
                            timestamp_ms: match (r.timestamp_ms, r.age_secs) {
                                (Some(ts), _) => ts,
                                (None, Some(age)) => now.saturating_sub(age.saturating_mul(1_000)),
                                (None, None) => now,
                            },
                            fields: r.fields.clone(),
                        })
                        .filter(|r| r.timestamp_ms >= since_ms)
                        .collect()
                })
                .unwrap_or_default()
        })?;
        Ok(rows)
    }

    fn last_command(
        &self,
        equipment_id: &str,
        site_id: &str,
        command_type: &str,
    ) -> std::result::Result<Option<MetricValue>, BoxError> {
        let v = self.with_site(site_id, |d| {
            d.commands
                .get(site_id)
                .and_then(|s| s.get(equipment_id))
                .and_then(|c| c.get(command_type))
                .cloned()
        })?;
        Ok(v)
    }
}

impl RealtimeStore for JsonFixtureStore {
    fn latest(&self, site_id: &str, system: &str) -> std::result::Result<Option<FieldMap>, BoxError> {
        let v = self.with_site(site_id, |d| {
            d.realtime.get(site_id).and_then(|s| s.get(system)).cloned()
        })?;
        Ok(v)
    }

    fn children(&self, site_id: &str) -> std::result::Result<Vec<(String, FieldMap)>, BoxError> {
        let v = self.with_site(site_id, |d| {
            d.realtime
                .get(site_id)
                .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        })?;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_traits::ManualClock;

    const FIXTURE: &str = r#"{
        "metrics": {
            "site-a": {
                "boiler-1": [
                    { "timestamp_ms": 1000, "fields": { "H2OSupply": 120 } },
                    { "age_secs": 30, "fields": { "H2OSupply": 130 } },
                    { "fields": { "outdoorTemp": "41.5" } }
                ]
            }
        },
        "realtime": { "site-a": { "Boiler1": { "SupplyTemp": 140 } } },
        "commands": { "site-a": { "boiler-1": { "waterTempSetpoint": 155, "enabled": true } } },
        "unavailable": ["site-down"]
    }"#;

    fn store() -> (JsonFixtureStore, ManualClock) {
        let clock = ManualClock::at(10_000_000);
        (JsonFixtureStore::from_json(FIXTURE).unwrap().with_clock(clock.clone()), clock)
    }

    #[test]
    fn relative_rows_are_stamped_at_query_time() {
        let (s, _) = store();
        let rows = s.query("boiler-1", "site-a", 9_000_000).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp_ms, 10_000_000 - 30_000);
        assert_eq!(rows[1].timestamp_ms, 10_000_000);
        assert_eq!(rows[1].fields["outdoorTemp"], MetricValue::Text("41.5".into()));
    }

    #[test]
    fn absolute_rows_respect_the_window() {
        let (s, _) = store();
        assert_eq!(s.query("boiler-1", "site-a", 0).unwrap().len(), 3);
        assert!(s.query("nope", "site-a", 0).unwrap().is_empty());
    }

    #[test]
    fn commands_and_realtime_lookups() {
        let (s, _) = store();
        assert_eq!(
            s.last_command("boiler-1", "site-a", "waterTempSetpoint").unwrap(),
            Some(MetricValue::Number(155.0))
        );
        assert_eq!(s.last_command("boiler-1", "site-a", "deadband").unwrap(), None);
        assert!(s.latest("site-a", "Boiler1").unwrap().is_some());
        assert_eq!(s.children("site-a").unwrap().len(), 1);
        assert!(s.children("site-b").unwrap().is_empty());
    }

    #[test]
    fn unavailable_sites_time_out() {
        let (s, _) = store();
        let err = s.query("x", "site-down", 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::Timeout)
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            JsonFixtureStore::from_json("{ nope"),
            Err(AdapterError::Parse(_))
        ));
    }
}
