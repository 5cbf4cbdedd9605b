//! Boundary traits between the control engine and its external collaborators.
//!
//! The engine never talks to a database, a push service, or an HTTP endpoint
//! directly; it goes through these traits. Errors cross the boundary as
//! `Box<dyn Error + Send + Sync>` and are typed again inside `hvac_core`.
pub mod clock;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use value::{FieldMap, MetricValue};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the equipment directory knows about one unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectoryEntry {
    pub equipment_id: String,
    pub site_id: String,
    /// Raw type string as stored in the directory ("hwpump", "Comfort Boiler", ...).
    pub equipment_type: String,
    pub name: Option<String>,
    /// Alternate schema key used by the realtime store.
    pub system_name: Option<String>,
    pub group_id: Option<String>,
    pub aliases: Vec<String>,
}

pub trait EquipmentDirectory {
    fn lookup(&self, equipment_id: &str) -> Result<Option<DirectoryEntry>, BoxError>;

    /// Every unit eligible for a run-all request, in evaluation order.
    fn eligible(&self) -> Result<Vec<DirectoryEntry>, BoxError>;

    /// Member ids of a lead-lag group, sorted.
    fn group_members(&self, group_id: &str) -> Result<Vec<String>, BoxError> {
        let mut ids: Vec<String> = self
            .eligible()?
            .into_iter()
            .filter(|e| e.group_id.as_deref() == Some(group_id))
            .map(|e| e.equipment_id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// One row from the time-series store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricRow {
    pub timestamp_ms: u64,
    pub fields: FieldMap,
}

pub trait MetricsStore {
    /// Rows for the unit newer than `since_ms`, in any order.
    fn query(
        &self,
        equipment_id: &str,
        site_id: &str,
        since_ms: u64,
    ) -> Result<Vec<MetricRow>, BoxError>;

    /// Most recent operator-issued value for one command field, if any.
    fn last_command(
        &self,
        _equipment_id: &str,
        _site_id: &str,
        _command_type: &str,
    ) -> Result<Option<MetricValue>, BoxError> {
        Ok(None)
    }
}

/// Polling accessor over the push-based realtime tree (site → system → metrics).
pub trait RealtimeStore {
    fn latest(&self, site_id: &str, system: &str) -> Result<Option<FieldMap>, BoxError>;

    /// Every system record under a site as `(system key, metrics)`.
    fn children(&self, site_id: &str) -> Result<Vec<(String, FieldMap)>, BoxError>;
}

/// A single field change destined for the field controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub equipment_id: String,
    pub site_id: String,
    pub equipment_type: String,
    pub command_type: String,
    pub value: MetricValue,
    pub timestamp_ms: u64,
}

pub trait CommandSink {
    fn send(&mut self, command: &Command) -> Result<(), BoxError>;
}
