#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and equipment-inventory parsing for the control engine.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The inventory CSV loader enforces headers and merges rows into the
//!   per-site equipment lists.
use hvac_traits::MetricValue;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Named control strategies a site may pin for an equipment kind.
pub const KNOWN_STRATEGIES: &[&str] = &[
    "boiler",
    "boiler-staged",
    "pump",
    "chiller",
    "air-handler",
    "fan-coil",
    "doas",
    "staged-heat-pump",
];

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineCfg {
    /// Seconds between scheduled run-all cycles in `serve` mode.
    pub cycle_interval_secs: u64,
    /// First metrics query window.
    pub primary_window_secs: u64,
    /// Widened window used when the first query comes back empty.
    pub fallback_window_secs: u64,
    /// PID `dt` used on the first evaluation of a unit.
    pub default_dt_secs: f64,
    /// Upper bound on PID `dt` after long gaps between evaluations.
    pub max_dt_secs: f64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30,
            primary_window_secs: 300,
            fallback_window_secs: 3600,
            default_dt_secs: 30.0,
            max_dt_secs: 600.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PersistMode {
    /// Write the cache file after every evaluation that changed it.
    #[default]
    OnWrite,
    /// Write on the serve-loop timer and at shutdown.
    Periodic,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheCfg {
    pub path: PathBuf,
    pub persist: PersistMode,
    pub snapshot_interval_secs: u64,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("var/control_cache.json"),
            persist: PersistMode::OnWrite,
            snapshot_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub max_integral: f64,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.05,
            kd: 0.0,
            output_min: 0.0,
            output_max: 100.0,
            max_integral: 500.0,
        }
    }
}

/// PID tuning per controller role.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidTable {
    pub cooling: PidCfg,
    pub heating: PidCfg,
    pub pump: PidCfg,
    pub damper: PidCfg,
}

impl Default for PidTable {
    fn default() -> Self {
        Self {
            cooling: PidCfg {
                kp: 2.5,
                ki: 0.1,
                kd: 0.02,
                ..PidCfg::default()
            },
            heating: PidCfg {
                kp: 2.0,
                ki: 0.08,
                kd: 0.02,
                ..PidCfg::default()
            },
            pump: PidCfg {
                kp: 4.0,
                ki: 0.2,
                kd: 0.0,
                output_min: 20.0,
                output_max: 100.0,
                max_integral: 300.0,
            },
            damper: PidCfg {
                kp: 1.5,
                ki: 0.05,
                kd: 0.0,
                output_min: 20.0,
                output_max: 100.0,
                max_integral: 200.0,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct StagingCfg {
    pub stages: usize,
    pub deadband: f64,
    pub stage_increment: f64,
    pub hysteresis: f64,
    pub minimum_runtime_secs: u64,
    pub high_limit: f64,
    pub low_limit: f64,
}

impl Default for StagingCfg {
    fn default() -> Self {
        Self {
            stages: 4,
            deadband: 1.75,
            stage_increment: 2.0,
            hysteresis: 0.5,
            minimum_runtime_secs: 300,
            high_limit: 65.0,
            low_limit: 35.0,
        }
    }
}

/// Staging constants per staged application.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StagingTable {
    /// Geothermal / water-source heat pump compressor stages on loop temperature.
    pub heat_pump: StagingCfg,
    /// DOAS DX cooling stages on supply-air temperature.
    pub doas_cooling: StagingCfg,
    /// Multi-burner boiler stages on supply water temperature.
    pub boiler: StagingCfg,
}

impl Default for StagingTable {
    fn default() -> Self {
        Self {
            heat_pump: StagingCfg::default(),
            doas_cooling: StagingCfg {
                stages: 2,
                deadband: 1.0,
                stage_increment: 3.0,
                hysteresis: 0.5,
                minimum_runtime_secs: 180,
                high_limit: 120.0,
                low_limit: 38.0,
            },
            boiler: StagingCfg {
                stages: 2,
                deadband: 5.0,
                stage_increment: 10.0,
                hysteresis: 2.0,
                minimum_runtime_secs: 120,
                high_limit: 200.0,
                low_limit: 33.0,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct LeadLagGroupCfg {
    pub id: String,
    /// Metric that decides whether the group is under extreme load.
    #[serde(default)]
    pub extreme_metric: Option<String>,
    /// Lag runs alongside the lead when the metric is at or below this value.
    #[serde(default)]
    pub extreme_below: Option<f64>,
    /// Lag runs alongside the lead when the metric is at or above this value.
    #[serde(default)]
    pub extreme_above: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LeadLagCfg {
    pub rotation_interval_hours: f64,
    pub rotation_retry_minutes: f64,
    /// Lead current below this while commanded on counts as a failure.
    pub min_current_amps: f64,
    pub groups: Vec<LeadLagGroupCfg>,
}

impl Default for LeadLagCfg {
    fn default() -> Self {
        Self {
            rotation_interval_hours: 168.0,
            rotation_retry_minutes: 15.0,
            min_current_amps: 0.5,
            groups: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ThresholdCfg {
    pub high_temp: f64,
    pub critical_temp: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlertsCfg {
    pub cooldown_minutes: f64,
    /// Keyed by canonical equipment kind ("boiler", "pump", ...).
    pub thresholds: BTreeMap<String, ThresholdCfg>,
}

impl Default for AlertsCfg {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        for (kind, high_temp, critical_temp) in [
            ("boiler", 180.0, 200.0),
            ("chiller", 50.0, 55.0),
            ("air-handler", 85.0, 90.0),
            ("pump", 120.0, 130.0),
            ("fan-coil", 90.0, 95.0),
        ] {
            thresholds.insert(
                kind.to_string(),
                ThresholdCfg {
                    high_temp,
                    critical_temp,
                },
            );
        }
        Self {
            cooldown_minutes: 5.0,
            thresholds,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EquipmentCfg {
    pub id: String,
    #[serde(rename = "type")]
    pub equipment_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OverrideCfg {
    /// Equipment kind as written by the operator; normalized by the dispatcher.
    pub kind: String,
    /// One of `KNOWN_STRATEGIES`.
    pub strategy: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Site {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub equipment: Vec<EquipmentCfg>,
    #[serde(default)]
    pub overrides: Vec<OverrideCfg>,
    /// Per-kind default-setting overrides for this site.
    #[serde(default)]
    pub settings: BTreeMap<String, BTreeMap<String, MetricValue>>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineCfg,
    #[serde(default)]
    pub cache: CacheCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub pid: PidTable,
    #[serde(default)]
    pub staging: StagingTable,
    #[serde(default)]
    pub lead_lag: LeadLagCfg,
    #[serde(default)]
    pub alerts: AlertsCfg,
    /// Optional inventory CSV merged into `sites` after load.
    #[serde(default)]
    pub inventory_csv: Option<PathBuf>,
    #[serde(default)]
    pub sites: Vec<Site>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Inventory CSV schema.
///
/// Expected headers:
/// equipment_id,site_id,type,name,system_name,group
///
/// Empty cells in the optional columns read as absent.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InventoryRow {
    pub equipment_id: String,
    pub site_id: String,
    #[serde(rename = "type")]
    pub equipment_type: String,
    pub name: Option<String>,
    pub system_name: Option<String>,
    pub group: Option<String>,
}

const INVENTORY_HEADERS: [&str; 6] = [
    "equipment_id",
    "site_id",
    "type",
    "name",
    "system_name",
    "group",
];

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

pub fn load_inventory_csv(path: &Path) -> eyre::Result<Vec<InventoryRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open inventory CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != INVENTORY_HEADERS {
        eyre::bail!(
            "inventory CSV must have headers '{}', got: {}",
            INVENTORY_HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<InventoryRow>().enumerate() {
        match rec {
            Ok(mut row) => {
                if row.equipment_id.is_empty() || row.site_id.is_empty() {
                    eyre::bail!("inventory CSV row {}: equipment_id and site_id are required", idx + 2);
                }
                row.name = non_empty(row.name);
                row.system_name = non_empty(row.system_name);
                row.group = non_empty(row.group);
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

impl Config {
    /// Fold inventory rows into the site list, creating sites that are not declared in TOML.
    pub fn merge_inventory(&mut self, rows: Vec<InventoryRow>) {
        for row in rows {
            let idx = match self.sites.iter().position(|s| s.id == row.site_id) {
                Some(i) => i,
                None => {
                    self.sites.push(Site {
                        id: row.site_id.clone(),
                        ..Site::default()
                    });
                    self.sites.len() - 1
                }
            };
            self.sites[idx].equipment.push(EquipmentCfg {
                id: row.equipment_id,
                equipment_type: row.equipment_type,
                name: row.name,
                system_name: row.system_name,
                group: row.group,
                aliases: Vec::new(),
            });
        }
    }

    /// Load `inventory_csv` (relative paths resolve against `base_dir`) and merge it.
    pub fn load_inventory(&mut self, base_dir: &Path) -> eyre::Result<()> {
        if let Some(p) = self.inventory_csv.clone() {
            let path = if p.is_absolute() { p } else { base_dir.join(p) };
            let rows = load_inventory_csv(&path)?;
            self.merge_inventory(rows);
        }
        Ok(())
    }

    fn validate_pid(role: &str, p: &PidCfg) -> eyre::Result<()> {
        if p.kp < 0.0 || p.ki < 0.0 || p.kd < 0.0 {
            eyre::bail!("pid.{role} gains must be >= 0");
        }
        if !(p.output_min < p.output_max) {
            eyre::bail!("pid.{role}.output_min must be < output_max");
        }
        if !(p.max_integral > 0.0) {
            eyre::bail!("pid.{role}.max_integral must be > 0");
        }
        Ok(())
    }

    fn validate_staging(role: &str, s: &StagingCfg) -> eyre::Result<()> {
        if s.stages == 0 || s.stages > 8 {
            eyre::bail!("staging.{role}.stages must be in 1..=8");
        }
        if s.deadband < 0.0 {
            eyre::bail!("staging.{role}.deadband must be >= 0");
        }
        if !(s.stage_increment > 0.0) {
            eyre::bail!("staging.{role}.stage_increment must be > 0");
        }
        if s.hysteresis < 0.0 {
            eyre::bail!("staging.{role}.hysteresis must be >= 0");
        }
        if !(s.low_limit < s.high_limit) {
            eyre::bail!("staging.{role}.low_limit must be < high_limit");
        }
        Ok(())
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Engine
        if self.engine.cycle_interval_secs == 0 {
            eyre::bail!("engine.cycle_interval_secs must be >= 1");
        }
        if self.engine.primary_window_secs == 0 {
            eyre::bail!("engine.primary_window_secs must be >= 1");
        }
        if self.engine.fallback_window_secs < self.engine.primary_window_secs {
            eyre::bail!("engine.fallback_window_secs must be >= primary_window_secs");
        }
        if !(self.engine.default_dt_secs > 0.0) || !(self.engine.max_dt_secs > 0.0) {
            eyre::bail!("engine dt bounds must be > 0");
        }
        if self.engine.default_dt_secs > self.engine.max_dt_secs {
            eyre::bail!("engine.default_dt_secs must be <= max_dt_secs");
        }

        // Cache
        if self.cache.persist == PersistMode::Periodic && self.cache.snapshot_interval_secs == 0 {
            eyre::bail!("cache.snapshot_interval_secs must be >= 1 in periodic mode");
        }
        if self.cache.path.as_os_str().is_empty() {
            eyre::bail!("cache.path must not be empty");
        }

        // PID
        Self::validate_pid("cooling", &self.pid.cooling)?;
        Self::validate_pid("heating", &self.pid.heating)?;
        Self::validate_pid("pump", &self.pid.pump)?;
        Self::validate_pid("damper", &self.pid.damper)?;

        // Staging
        Self::validate_staging("heat_pump", &self.staging.heat_pump)?;
        Self::validate_staging("doas_cooling", &self.staging.doas_cooling)?;
        Self::validate_staging("boiler", &self.staging.boiler)?;

        // Lead-lag
        if !(self.lead_lag.rotation_interval_hours > 0.0) {
            eyre::bail!("lead_lag.rotation_interval_hours must be > 0");
        }
        if !(self.lead_lag.rotation_retry_minutes > 0.0) {
            eyre::bail!("lead_lag.rotation_retry_minutes must be > 0");
        }
        if self.lead_lag.min_current_amps < 0.0 {
            eyre::bail!("lead_lag.min_current_amps must be >= 0");
        }

        // Alerts
        if self.alerts.cooldown_minutes < 0.0 {
            eyre::bail!("alerts.cooldown_minutes must be >= 0");
        }
        for (kind, t) in &self.alerts.thresholds {
            if t.critical_temp < t.high_temp {
                eyre::bail!("alerts.thresholds.{kind}.critical_temp must be >= high_temp");
            }
        }

        // Sites and inventory
        let mut seen = BTreeSet::new();
        let mut group_sizes: BTreeMap<&str, usize> = BTreeMap::new();
        for site in &self.sites {
            if site.id.trim().is_empty() {
                eyre::bail!("sites.id must not be empty");
            }
            for eq in &site.equipment {
                if eq.id.trim().is_empty() {
                    eyre::bail!("site {}: equipment id must not be empty", site.id);
                }
                if eq.equipment_type.trim().is_empty() {
                    eyre::bail!("site {}: equipment {} has an empty type", site.id, eq.id);
                }
                if !seen.insert(eq.id.as_str()) {
                    eyre::bail!("duplicate equipment id {}", eq.id);
                }
                if let Some(g) = eq.group.as_deref() {
                    *group_sizes.entry(g).or_default() += 1;
                }
            }
            for ov in &site.overrides {
                if !KNOWN_STRATEGIES.contains(&ov.strategy.as_str()) {
                    eyre::bail!(
                        "site {}: unknown strategy '{}' (known: {})",
                        site.id,
                        ov.strategy,
                        KNOWN_STRATEGIES.join(", ")
                    );
                }
            }
        }
        for (group, n) in &group_sizes {
            if *n < 2 {
                eyre::bail!("lead-lag group {group} needs at least two members");
            }
        }
        for g in &self.lead_lag.groups {
            if !group_sizes.contains_key(g.id.as_str()) {
                eyre::bail!("lead_lag.groups: group {} has no equipment", g.id);
            }
            if let (Some(lo), Some(hi)) = (g.extreme_below, g.extreme_above) {
                if lo >= hi {
                    eyre::bail!("lead_lag.groups.{}: extreme_below must be < extreme_above", g.id);
                }
            }
            if g.extreme_metric.is_none() && (g.extreme_below.is_some() || g.extreme_above.is_some())
            {
                eyre::bail!("lead_lag.groups.{}: extreme band needs extreme_metric", g.id);
            }
        }

        Ok(())
    }
}
