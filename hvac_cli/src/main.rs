mod cli;
mod error_fmt;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use eyre::{Result, WrapErr};
use hvac_adapters::{JsonFixtureStore, LineProtocolSink, StaticDirectory};
use hvac_core::dispatch::Registry;
use hvac_core::{Engine, EvaluationReport, ItemOutcome, Outcome, Pipeline, normalize_type};
use hvac_traits::CommandSink;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{ADMIN_VAR, Cli, CliError, Commands, ENV_VAR, FILE_GUARD, JSON_MODE, admin_enabled};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

/// Upper bound for draining the queue before exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Sleep granularity in serve mode so Ctrl-C is noticed quickly.
const TICK: Duration = Duration::from_millis(100);

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(&cli, &cfg.logging)?;
    tracing::info!(config = %cli.config.display(), sites = cfg.sites.len(), "config loaded");

    match &cli.cmd {
        Commands::SelfCheck => return self_check(&cli, &cfg),
        Commands::ClearCache => {
            let env = std::env::var(ENV_VAR).ok();
            let admin = std::env::var(ADMIN_VAR).ok();
            if !admin_enabled(env.as_deref(), admin.as_deref()) {
                tracing::warn!("clear-cache refused outside development");
                return Err(eyre::Report::new(CliError::AdminDisabled));
            }
        }
        _ => {}
    }

    let fixture = open_fixture(cli.fixture.as_deref())?;
    match &cli.commands_out {
        Some(path) => {
            let sink = LineProtocolSink::append_to(path)
                .wrap_err_with(|| format!("cannot open command output {}", path.display()))?;
            dispatch(&cli, &cfg, fixture, sink)
        }
        None => dispatch(&cli, &cfg, fixture, LineProtocolSink::stdout()),
    }
}

fn load_config(path: &Path) -> Result<hvac_config::Config> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg = hvac_config::load_toml(&text).map_err(|e| CliError::ConfigInvalid(e.to_string()))?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    cfg.load_inventory(&base)
        .map_err(|e| CliError::ConfigInvalid(format!("{e:#}")))?;
    cfg.validate().map_err(|e| CliError::ConfigInvalid(format!("{e:#}")))?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, logging: &hvac_config::Logging) -> Result<()> {
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().map_or_else(|| "hvac.log".into(), |n| n.to_os_string());
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cli.json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

fn open_fixture(path: Option<&Path>) -> Result<JsonFixtureStore> {
    match path {
        Some(p) => Ok(JsonFixtureStore::open(p)?),
        None => {
            tracing::warn!("no --fixture given; every unit evaluates against an empty store");
            Ok(JsonFixtureStore::from_json("{}")?)
        }
    }
}

fn build_engine(
    cfg: &hvac_config::Config,
    fixture: &JsonFixtureStore,
    sink: impl CommandSink + Send + 'static,
) -> Result<Engine> {
    Engine::builder()
        .with_directory(StaticDirectory::from_config(cfg))
        .with_metrics(fixture.clone())
        .with_realtime(fixture.clone())
        .with_sink(sink)
        .with_config(cfg)
        .build()
}

fn dispatch(
    cli: &Cli,
    cfg: &hvac_config::Config,
    fixture: JsonFixtureStore,
    sink: impl CommandSink + Send + 'static,
) -> Result<()> {
    let engine = build_engine(cfg, &fixture, sink)?;
    match &cli.cmd {
        Commands::RunAll => run_all(cli, engine),
        Commands::Evaluate { equipment } => evaluate(cli, engine, equipment),
        Commands::Serve { cycles } => serve(cli, cfg, engine, &fixture, *cycles),
        Commands::ClearCache => clear_cache(cli, engine),
        Commands::Health => health(cli, &engine),
        Commands::SelfCheck => Ok(()),
    }
}

// ---------------------------
// Commands
// ---------------------------

fn run_all(cli: &Cli, engine: Engine) -> Result<()> {
    let pipeline = Pipeline::spawn(engine);
    let started = pipeline.run_all()?;
    if !pipeline.wait_idle(DRAIN_TIMEOUT) {
        tracing::warn!(pending = pipeline.pending(), "queue did not drain in time");
    }
    let mut items: Vec<ItemOutcome> = started.first.into_iter().collect();
    items.extend(pipeline.drain_reports());
    print_items(cli, &items);
    pipeline.with_engine(|e| e.flush_cache())?;
    Ok(())
}

fn evaluate(cli: &Cli, mut engine: Engine, equipment_id: &str) -> Result<()> {
    let report = engine.evaluate(equipment_id)?;
    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }
    engine.flush_cache()?;
    Ok(())
}

fn serve(
    cli: &Cli,
    cfg: &hvac_config::Config,
    engine: Engine,
    fixture: &JsonFixtureStore,
    cycles: Option<u64>,
) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .wrap_err("failed to install Ctrl-C handler")?;
    }

    let interval = Duration::from_secs(cfg.engine.cycle_interval_secs);
    let pipeline = Pipeline::spawn(engine);
    let mut cycle: u64 = 0;
    tracing::info!(interval_secs = interval.as_secs(), "serving");

    while !stop.load(Ordering::Relaxed) {
        let started_at = Instant::now();
        if let Err(e) = fixture.reload_if_changed() {
            tracing::warn!(error = %e, "fixture reload failed");
        }
        if pipeline.pending() == 0 {
            let started = pipeline.run_all()?;
            print_items(cli, started.first.as_slice());
        } else {
            let ids = pipeline.with_engine(|e| e.eligible())?;
            let dropped = pipeline.replace_pending(ids);
            tracing::warn!(dropped, "previous cycle still pending; queue replaced");
        }
        cycle += 1;

        if cycles.is_some_and(|n| cycle >= n) {
            break;
        }
        while !stop.load(Ordering::Relaxed) && started_at.elapsed() < interval {
            std::thread::sleep(TICK);
            print_items(cli, &pipeline.drain_reports());
            if let Err(e) = pipeline.with_engine(|e| e.snapshot_if_due()) {
                tracing::warn!(error = %e, "cache snapshot failed");
            }
        }
    }

    if !pipeline.wait_idle(DRAIN_TIMEOUT) {
        tracing::warn!(pending = pipeline.pending(), "queue did not drain in time");
    }
    print_items(cli, &pipeline.drain_reports());
    pipeline.with_engine(|e| e.flush_cache())?;
    tracing::info!(cycles = cycle, "serve stopped");
    Ok(())
}

fn clear_cache(cli: &Cli, mut engine: Engine) -> Result<()> {
    let seeded = engine.clear_derived()?;
    if cli.json {
        println!("{}", serde_json::json!({ "cleared": true, "seeded": seeded }));
    } else {
        println!("Cleared derived caches; re-seeded {seeded} unit(s)");
    }
    Ok(())
}

fn health(cli: &Cli, engine: &Engine) -> Result<()> {
    let units = engine.eligible()?.len();
    let cached = engine.cache().len();
    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "status": "ok", "units": units, "cached": cached })
        );
    } else {
        println!("ok: {units} unit(s), {cached} cached");
    }
    Ok(())
}

fn self_check(cli: &Cli, cfg: &hvac_config::Config) -> Result<()> {
    let registry = Registry::from_sites(&cfg.sites)?;
    if let Some(p) = cli.fixture.as_deref() {
        JsonFixtureStore::open(p)?;
    }

    let mut units = Vec::new();
    let mut unsupported = 0usize;
    for site in &cfg.sites {
        for eq in &site.equipment {
            let kind = normalize_type(&eq.equipment_type);
            let strategy = registry.dispatch(kind, &site.id).map(|s| s.name);
            if strategy.is_none() {
                unsupported += 1;
            }
            units.push(serde_json::json!({
                "equipment_id": eq.id,
                "site_id": site.id,
                "type": eq.equipment_type,
                "kind": kind.map(|k| k.as_str()),
                "strategy": strategy,
            }));
        }
    }

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "sites": cfg.sites.len(),
                "unsupported": unsupported,
                "units": units,
            })
        );
    } else {
        for u in &units {
            println!(
                "{:<16} {:<10} {:<24} {}",
                u["equipment_id"].as_str().unwrap_or_default(),
                u["site_id"].as_str().unwrap_or_default(),
                u["type"].as_str().unwrap_or_default(),
                u["strategy"].as_str().unwrap_or("(unsupported)"),
            );
        }
        println!(
            "OK: {} site(s), {} unit(s), {unsupported} unsupported",
            cfg.sites.len(),
            units.len()
        );
    }
    Ok(())
}

// ---------------------------
// Output
// ---------------------------

fn print_items(cli: &Cli, items: &[ItemOutcome]) {
    for item in items {
        if cli.json {
            match serde_json::to_string(item) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "report serialization failed"),
            }
            continue;
        }
        match item {
            ItemOutcome::Evaluated(r) => print_report(r),
            ItemOutcome::Failed { equipment_id, error } => {
                println!("{equipment_id}: FAILED {error}");
            }
        }
    }
}

fn print_report(r: &EvaluationReport) {
    let status = match &r.outcome {
        Outcome::Controlled => "controlled".to_string(),
        Outcome::Emergency { reason } => format!("EMERGENCY {reason}"),
        Outcome::SafeState { fault } => format!("safe-state ({fault})"),
        Outcome::Unsupported => "unsupported".to_string(),
    };
    println!(
        "{}: {} [{}] sent={} unchanged={} failed={}",
        r.equipment_id, status, r.equipment_type, r.emitted.sent, r.emitted.unchanged, r.emitted.failed
    );
    for a in &r.alerts {
        println!("  {} {}: {}", a.severity, a.alert_type, a.message);
    }
}
