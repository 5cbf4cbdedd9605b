//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Environment variable naming the deployment; `development` unlocks admin commands.
pub const ENV_VAR: &str = "HVAC_ENV";
/// Set to `1` to unlock admin commands outside development.
pub const ADMIN_VAR: &str = "HVAC_ENABLE_ADMIN";

#[derive(Parser, Debug)]
#[command(name = "hvac", version, about = "HVAC equipment control engine")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/hvac_engine.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// JSON telemetry fixture used as the metrics and realtime source
    #[arg(long, value_name = "FILE")]
    pub fixture: Option<PathBuf>,

    /// Append line-protocol commands to this file instead of stdout
    #[arg(long = "commands-out", value_name = "FILE")]
    pub commands_out: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate every eligible unit once
    RunAll,
    /// Evaluate a single unit
    Evaluate {
        /// Equipment id as known to the directory
        #[arg(long, value_name = "ID")]
        equipment: String,
    },
    /// Run evaluation cycles until Ctrl-C
    Serve {
        /// Stop after this many cycles
        #[arg(long, value_name = "N")]
        cycles: Option<u64>,
    },
    /// Clear derived caches and re-seed the control cache (admin)
    ClearCache,
    /// Validate config, inventory and fixture without evaluating
    SelfCheck,
    /// Health check for operational monitoring
    Health,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("admin operations are disabled (set HVAC_ENV=development or HVAC_ENABLE_ADMIN=1)")]
    AdminDisabled,
    #[error("cannot read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}

/// Whether admin operations are allowed in this environment.
pub fn admin_enabled(env: Option<&str>, admin: Option<&str>) -> bool {
    env.is_some_and(|e| e.eq_ignore_ascii_case("development")) || admin == Some("1")
}
