//! Type-state builder for `Engine`.
//!
//! The builder enforces at compile time that the equipment directory, metrics
//! store and command sink are provided before `build()` is available.
//! `try_build()` is always available for dynamic checks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use hvac_traits::{Clock, CommandSink, EquipmentDirectory, FieldMap, MetricsStore, RealtimeStore, SystemClock};

use crate::alerts::AlertTracker;
use crate::config::{AlertPolicy, CachePersistence, LeadLagCfg, Timing, Tuning};
use crate::dispatch::Registry;
use crate::engine::Engine;
use crate::error::{BuildError, EngineError, Result};
use crate::kind::Kind;
use crate::pid::PidParams;
use crate::resolve::Resolver;
use crate::staging::StagingCfg;
use crate::store::{ControlCache, MemoryStateStore, StateStore};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Engine`. All fields are validated on `build()`.
pub struct EngineBuilder<D, M, S> {
    directory: Option<Box<dyn EquipmentDirectory + Send>>,
    metrics: Option<Box<dyn MetricsStore + Send>>,
    sink: Option<Box<dyn CommandSink + Send>>,
    realtime: Option<Box<dyn RealtimeStore + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    state: Option<Box<dyn StateStore>>,
    cache: Option<ControlCache>,
    persistence: Option<CachePersistence>,
    tuning: Option<Tuning>,
    timing: Option<Timing>,
    alerts: Option<AlertPolicy>,
    lead_lag: Option<LeadLagCfg>,
    sites: Vec<hvac_config::Site>,
    seed: bool,
    _d: PhantomData<D>,
    _m: PhantomData<M>,
    _s: PhantomData<S>,
}

impl Default for EngineBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            directory: None,
            metrics: None,
            sink: None,
            realtime: None,
            clock: None,
            state: None,
            cache: None,
            persistence: None,
            tuning: None,
            timing: None,
            alerts: None,
            lead_lag: None,
            sites: Vec::new(),
            seed: true,
            _d: PhantomData,
            _m: PhantomData,
            _s: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn check_pid(p: &PidParams) -> Result<()> {
    if p.gains.kp < 0.0 || p.gains.ki < 0.0 || p.gains.kd < 0.0 {
        return Err(invalid("PID gains must be >= 0"));
    }
    if p.output_min.partial_cmp(&p.output_max) != Some(Ordering::Less) {
        return Err(invalid("PID output_min must be < output_max"));
    }
    if p.max_integral.is_nan() || p.max_integral < 0.0 {
        return Err(invalid("PID max_integral must be >= 0"));
    }
    Ok(())
}

fn check_staging(s: &StagingCfg) -> Result<()> {
    if !(1..=8).contains(&s.stages) {
        return Err(invalid("staging stages must be in 1..=8"));
    }
    if s.low_limit.partial_cmp(&s.high_limit) != Some(Ordering::Less) {
        return Err(invalid("staging low_limit must be < high_limit"));
    }
    if s.hysteresis < 0.0 || s.stage_increment < 0.0 {
        return Err(invalid("staging hysteresis and stage_increment must be >= 0"));
    }
    Ok(())
}

/// Per-(site, kind) default overrides from config.
fn site_settings(sites: &[hvac_config::Site]) -> Result<HashMap<(String, Kind), FieldMap>> {
    let mut out = HashMap::new();
    for site in sites {
        for (kind_name, values) in &site.settings {
            let kind: Kind = kind_name
                .parse()
                .map_err(|e: String| eyre::Report::new(EngineError::Config(format!("site {}: {e}", site.id))))?;
            out.insert((site.id.clone(), kind), values.clone());
        }
    }
    Ok(out)
}

/// Validate configuration and construct the `Engine`.
///
/// Single source of truth for validation and construction, used by both
/// `try_build()` and `build()`.
#[allow(clippy::too_many_arguments)]
fn validate_and_build(
    directory: Box<dyn EquipmentDirectory + Send>,
    metrics: Box<dyn MetricsStore + Send>,
    sink: Box<dyn CommandSink + Send>,
    realtime: Option<Box<dyn RealtimeStore + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    state: Option<Box<dyn StateStore>>,
    cache: Option<ControlCache>,
    persistence: Option<CachePersistence>,
    tuning: Tuning,
    timing: Timing,
    alerts: AlertPolicy,
    lead_lag: LeadLagCfg,
    sites: &[hvac_config::Site],
    seed: bool,
) -> Result<Engine> {
    // ── Validation ───────────────────────────────────────────────────────────
    if timing.cycle_interval_ms == 0 {
        return Err(invalid("cycle interval must be > 0"));
    }
    if timing.fallback_window_ms < timing.primary_window_ms {
        return Err(invalid("fallback window must be >= primary window"));
    }
    let dt_ok = timing.default_dt_secs > 0.0 && timing.max_dt_secs >= timing.default_dt_secs;
    if !dt_ok {
        return Err(invalid("dt bounds must satisfy 0 < default_dt <= max_dt"));
    }
    for p in [
        &tuning.pid.cooling,
        &tuning.pid.heating,
        &tuning.pid.pump,
        &tuning.pid.damper,
    ] {
        check_pid(p)?;
    }
    for s in [
        &tuning.staging.heat_pump,
        &tuning.staging.doas_cooling,
        &tuning.staging.boiler,
    ] {
        check_staging(s)?;
    }
    if lead_lag.params.rotation_interval_ms == 0 {
        return Err(invalid("lead-lag rotation interval must be > 0"));
    }
    if let Some(p) = &persistence {
        if p.path.as_os_str().is_empty() {
            return Err(invalid("cache path must not be empty"));
        }
    }

    // ── Assemble ─────────────────────────────────────────────────────────────
    let registry = Registry::from_sites(sites).map_err(eyre::Report::new)?;
    let site_settings = site_settings(sites)?;
    let cache = match (cache, &persistence) {
        (Some(c), _) => c,
        (None, Some(p)) => ControlCache::load(&p.path),
        (None, None) => ControlCache::new(),
    };
    let clock: Arc<dyn Clock + Send + Sync> = clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
    let last_snapshot_ms = clock.now_ms();

    let mut engine = Engine {
        directory,
        metrics,
        realtime,
        sink,
        clock,
        registry,
        resolver: Resolver::new(timing.primary_window_ms, timing.fallback_window_ms),
        cache,
        state: state.unwrap_or_else(|| Box::new(MemoryStateStore::new())),
        alerts: AlertTracker::new(alerts),
        tuning,
        timing,
        lead_lag,
        site_settings,
        persistence,
        last_snapshot_ms,
    };
    if seed && engine.cache.is_empty() {
        if let Err(e) = engine.seed_cache() {
            tracing::warn!(error = %e, "could not seed control cache, starting empty");
        }
    }
    Ok(engine)
}

impl<D, M, S> EngineBuilder<D, M, S> {
    fn retype<D2, M2, S2>(self) -> EngineBuilder<D2, M2, S2> {
        EngineBuilder {
            directory: self.directory,
            metrics: self.metrics,
            sink: self.sink,
            realtime: self.realtime,
            clock: self.clock,
            state: self.state,
            cache: self.cache,
            persistence: self.persistence,
            tuning: self.tuning,
            timing: self.timing,
            alerts: self.alerts,
            lead_lag: self.lead_lag,
            sites: self.sites,
            seed: self.seed,
            _d: PhantomData,
            _m: PhantomData,
            _s: PhantomData,
        }
    }

    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Engine> {
        let directory = self
            .directory
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDirectory))?;
        let metrics = self
            .metrics
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMetrics))?;
        let sink = self
            .sink
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSink))?;

        validate_and_build(
            directory,
            metrics,
            sink,
            self.realtime,
            self.clock,
            self.state,
            self.cache,
            self.persistence,
            self.tuning.unwrap_or_default(),
            self.timing.unwrap_or_default(),
            self.alerts.unwrap_or_default(),
            self.lead_lag.unwrap_or_default(),
            &self.sites,
            self.seed,
        )
    }

    // Chainable setters that do not affect type-state.

    pub fn with_realtime(mut self, realtime: impl RealtimeStore + Send + 'static) -> Self {
        self.realtime = Some(Box::new(realtime));
        self
    }

    /// Provide a custom clock; defaults to `SystemClock`.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Replace the in-memory controller state store.
    pub fn with_state_store(mut self, state: impl StateStore + 'static) -> Self {
        self.state = Some(Box::new(state));
        self
    }

    /// Start from an already loaded cache instead of reading the cache file.
    pub fn with_cache(mut self, cache: ControlCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_persistence(mut self, persistence: CachePersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_alert_policy(mut self, policy: AlertPolicy) -> Self {
        self.alerts = Some(policy);
        self
    }

    pub fn with_lead_lag(mut self, lead_lag: LeadLagCfg) -> Self {
        self.lead_lag = Some(lead_lag);
        self
    }

    /// Site strategy overrides and per-kind default overrides.
    pub fn with_sites(mut self, sites: Vec<hvac_config::Site>) -> Self {
        self.sites = sites;
        self
    }

    /// Everything the TOML config carries: tuning, timing, alerts, lead-lag,
    /// cache persistence and sites.
    pub fn with_config(self, cfg: &hvac_config::Config) -> Self {
        self.with_tuning(Tuning::from(cfg))
            .with_timing(Timing::from(&cfg.engine))
            .with_alert_policy(AlertPolicy::from(&cfg.alerts))
            .with_lead_lag(LeadLagCfg::from(&cfg.lead_lag))
            .with_persistence(CachePersistence::from(&cfg.cache))
            .with_sites(cfg.sites.clone())
    }

    /// Do not seed an empty cache from defaults at build time.
    pub fn without_seed(mut self) -> Self {
        self.seed = false;
        self
    }
}

// Setters that advance type-state

impl<M, S> EngineBuilder<Missing, M, S> {
    pub fn with_directory(
        mut self,
        directory: impl EquipmentDirectory + Send + 'static,
    ) -> EngineBuilder<Set, M, S> {
        self.directory = Some(Box::new(directory));
        self.retype()
    }
}

impl<D, S> EngineBuilder<D, Missing, S> {
    pub fn with_metrics(mut self, metrics: impl MetricsStore + Send + 'static) -> EngineBuilder<D, Set, S> {
        self.metrics = Some(Box::new(metrics));
        self.retype()
    }
}

impl<D, M> EngineBuilder<D, M, Missing> {
    pub fn with_sink(mut self, sink: impl CommandSink + Send + 'static) -> EngineBuilder<D, M, Set> {
        self.sink = Some(Box::new(sink));
        self.retype()
    }
}

impl EngineBuilder<Set, Set, Set> {
    /// Validate and build the engine. Only available once the directory,
    /// metrics store and sink are set.
    pub fn build(self) -> Result<Engine> {
        self.try_build()
    }
}
