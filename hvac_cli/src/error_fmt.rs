//! Human-readable error descriptions and structured JSON error formatting.

use hvac_adapters::AdapterError;
use hvac_core::error::{BuildError, EngineError};

use crate::cli::CliError;

/// Stable short name for the error class, used in JSON output.
fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::AdminDisabled => "AdminDisabled",
            CliError::ConfigRead { .. } | CliError::ConfigInvalid(_) => "Config",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    if let Some(ee) = err.downcast_ref::<EngineError>() {
        return match ee {
            EngineError::UnknownEquipment(_) => "UnknownEquipment",
            EngineError::Config(_) => "Config",
            EngineError::Source(_) | EngineError::SourceTimeout => "Source",
            EngineError::Sink(_) => "Sink",
            EngineError::Store(_) | EngineError::Io(_) => "Store",
            EngineError::InvalidState(_) => "InvalidState",
        };
    }
    if err.downcast_ref::<AdapterError>().is_some() {
        return "Fixture";
    }
    "Error"
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::AdminDisabled => {
                "What happened: Admin operation refused.\nLikely causes: This is not a development deployment.\nHow to fix: Set HVAC_ENV=development, or HVAC_ENABLE_ADMIN=1 if you really mean it.".to_string()
            }
            CliError::ConfigRead { path, source } => format!(
                "What happened: Could not read the config file {} ({source}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config with a readable TOML file (see etc/hvac_engine.toml).",
                path.display()
            ),
            CliError::ConfigInvalid(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingDirectory | BuildError::MissingMetrics | BuildError::MissingSink => format!(
                "What happened: The engine could not be assembled ({be}).\nLikely causes: A collaborator failed to initialize.\nHow to fix: Re-run with --log-level=debug for details."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ee) = err.downcast_ref::<EngineError>() {
        return match ee {
            EngineError::UnknownEquipment(id) => format!(
                "What happened: Equipment '{id}' is not in the directory.\nLikely causes: Typo in --equipment, or the unit is missing from [[sites.equipment]] / the inventory CSV.\nHow to fix: Run `hvac self-check` to list known units."
            ),
            EngineError::Config(msg) => format!(
                "What happened: Invalid site configuration ({msg}).\nLikely causes: Unknown equipment kind or strategy in [[sites.overrides]] or [sites.settings].\nHow to fix: Use a known kind name and strategy, then rerun."
            ),
            EngineError::Io(msg) | EngineError::Store(msg) => format!(
                "What happened: Control cache could not be written ({msg}).\nLikely causes: [cache].path points at a read-only or missing location.\nHow to fix: Point [cache].path at a writable file."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(ae) = err.downcast_ref::<AdapterError>() {
        return match ae {
            AdapterError::Parse(msg) => format!(
                "What happened: The telemetry fixture is not valid JSON ({msg}).\nHow to fix: Check the file passed to --fixture."
            ),
            AdapterError::Io(e) => format!(
                "What happened: A fixture or command file could not be opened ({e}).\nHow to fix: Check the --fixture and --commands-out paths."
            ),
            other => format!("What happened: {other}.\nHow to fix: Retry; the fixture may be busy."),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("toml parse error") || (lower.contains("expected") && lower.contains("line")) {
        return format!(
            "What happened: The config file is not valid TOML.\nHow to fix: Fix the syntax error reported below.\n{msg}"
        );
    }

    if lower.contains("inventory csv") {
        return format!(
            "Invalid inventory CSV. Expected headers 'equipment_id,site_id,type,name,system_name,group'. ({msg})"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 config/build, 3 admin refused, 4 unknown equipment, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Config" | "Build" => 2,
        "AdminDisabled" => 3,
        "UnknownEquipment" => 4,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_equipment_maps_to_code_4() {
        let e = eyre::Report::new(EngineError::UnknownEquipment("ahu-9".into()));
        assert_eq!(exit_code_for_error(&e), 4);
        assert!(humanize(&e).contains("ahu-9"));
    }

    #[test]
    fn admin_refusal_maps_to_code_3() {
        let e = eyre::Report::new(CliError::AdminDisabled);
        assert_eq!(exit_code_for_error(&e), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "AdminDisabled");
    }

    #[test]
    fn build_errors_are_config_class() {
        let e = eyre::Report::new(BuildError::InvalidConfig("cycle interval must be > 0"));
        assert_eq!(exit_code_for_error(&e), 2);
        assert!(humanize(&e).contains("cycle interval"));
    }

    #[test]
    fn unknown_errors_fall_back() {
        let e = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&e), 1);
        assert!(humanize(&e).contains("Original: boom"));
    }
}
