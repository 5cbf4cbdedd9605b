#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Equipment control evaluation engine (source-agnostic).
//!
//! The engine reads telemetry through `hvac_traits::MetricsStore` and
//! `hvac_traits::RealtimeStore`, looks equipment up in an
//! `hvac_traits::EquipmentDirectory`, and delivers commands through an
//! `hvac_traits::CommandSink`. It never talks to a database directly.
//!
//! ## Architecture
//!
//! - **Classification**: free-form type strings to a closed `Kind` (`kind`)
//! - **Resolution**: metrics fallback chain and settings precedence (`resolve`)
//! - **Control**: one function per kind behind a panic guard (`control`, `dispatch`)
//! - **Shared algorithms**: PID, staging, lead-lag (`pid`, `staging`, `lead_lag`)
//! - **State**: last-commanded cache and per-unit memory (`store`)
//! - **Emission**: changed-field commands (`emit`)
//! - **Scheduling**: sequential worker queue (`pipeline`)
//!
//! ## Values
//!
//! Telemetry arrives as `MetricValue` (number, bool or text). Control code reads
//! it only through the lenient helpers in `coerce`; nothing in this crate trusts
//! the raw representation.

pub mod alerts;
pub mod atomic;
pub mod builder;
pub mod coerce;
pub mod config;
pub mod control;
pub mod conversions;
pub mod defaults;
pub mod dispatch;
pub mod emit;
pub mod engine;
pub mod error;
pub mod kind;
pub mod lead_lag;
pub mod mocks;
pub mod pid;
pub mod pipeline;
pub mod resolve;
pub mod source_error;
pub mod staging;
pub mod store;
pub mod util;

pub use crate::alerts::{Alert, AlertTracker, Severity};
pub use crate::builder::{EngineBuilder, Missing, Set};
pub use crate::config::{AlertPolicy, CachePersistence, LeadLagCfg, PersistMode, Timing, Tuning};
pub use crate::control::{ControlResult, EquipmentRef};
pub use crate::emit::EmitSummary;
pub use crate::engine::{Engine, EvaluationReport, Outcome};
pub use crate::error::{BuildError, ControlFault, EngineError, Report, Result};
pub use crate::kind::{Kind, normalize_type};
pub use crate::pipeline::{ItemOutcome, Pipeline, RunAll};
pub use crate::resolve::{MetricsOrigin, ResolvedMetrics};
pub use crate::store::{ControlCache, MemoryStateStore, StateStore, UnitState};
