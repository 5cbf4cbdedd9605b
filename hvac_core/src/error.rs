use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("metrics source error: {0}")]
    Source(String),
    #[error("metrics source timeout")]
    SourceTimeout,
    #[error("command sink error: {0}")]
    Sink(String),
    #[error("state store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown equipment: {0}")]
    UnknownEquipment(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Expected faults a control function may report instead of a result.
///
/// The dispatcher converts these to a safe-state result; they never reach the operator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlFault {
    #[error("required input missing: {0}")]
    MissingInput(&'static str),
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing equipment directory")]
    MissingDirectory,
    #[error("missing metrics store")]
    MissingMetrics,
    #[error("missing command sink")]
    MissingSink,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
