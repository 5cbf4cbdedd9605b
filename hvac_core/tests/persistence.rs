use std::time::Duration;

use hvac_core::mocks::{MemoryDirectory, MemoryMetrics, RecordingSink, entry};
use hvac_core::{CachePersistence, ControlCache, Engine, PersistMode};
use hvac_traits::{FieldMap, ManualClock, MetricValue};
use rstest::rstest;
use tempfile::tempdir;

const SITE: &str = "site-a";

fn supply(v: f64) -> FieldMap {
    [("H2OSupply".to_string(), MetricValue::Number(v))]
        .into_iter()
        .collect()
}

fn engine(
    persistence: CachePersistence,
    clock: &ManualClock,
    metrics: &MemoryMetrics,
    sink: &RecordingSink,
) -> Engine {
    Engine::builder()
        .with_directory(MemoryDirectory::new(vec![
            entry("boiler-1", SITE, "Boiler"),
            entry("room-1", SITE, "Mechanical Room"),
        ]))
        .with_metrics(metrics.clone())
        .with_sink(sink.clone())
        .with_clock(clock.clone())
        .with_persistence(persistence)
        .build()
        .expect("engine builds")
}

#[rstest]
fn on_write_cache_survives_restart_and_suppresses_repeat_commands() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("control_cache.json");
    let persistence = CachePersistence {
        path: path.clone(),
        mode: PersistMode::OnWrite,
        snapshot_interval_ms: 60_000,
    };
    let clock = ManualClock::new();
    let metrics = MemoryMetrics::new();
    let sink = RecordingSink::new();

    {
        let mut e = engine(persistence.clone(), &clock, &metrics, &sink);
        metrics.set(SITE, "boiler-1", e.now_ms(), supply(120.0));
        let r = e.evaluate("boiler-1").unwrap();
        assert!(r.emitted.sent > 0);
    }
    assert!(path.exists());
    let on_disk = ControlCache::load(&path);
    assert_eq!(
        on_disk.values(SITE, "boiler-1").and_then(|v| v.get("firing")),
        Some(&MetricValue::Number(1.0))
    );

    sink.clear();
    clock.advance(Duration::from_secs(30));
    let mut e = engine(persistence, &clock, &metrics, &sink);
    metrics.set(SITE, "boiler-1", e.now_ms(), supply(120.0));
    let r = e.evaluate("boiler-1").unwrap();
    assert_eq!(r.emitted.sent, 0);
    assert!(sink.commands().is_empty());
}

#[rstest]
fn periodic_mode_snapshots_only_when_due_and_dirty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let clock = ManualClock::new();
    let metrics = MemoryMetrics::new();
    let sink = RecordingSink::new();
    let mut e = engine(
        CachePersistence {
            path: path.clone(),
            mode: PersistMode::Periodic,
            snapshot_interval_ms: 60_000,
        },
        &clock,
        &metrics,
        &sink,
    );

    metrics.set(SITE, "boiler-1", e.now_ms(), supply(120.0));
    e.evaluate("boiler-1").unwrap();
    assert!(!path.exists());
    assert!(!e.snapshot_if_due().unwrap());

    clock.advance(Duration::from_secs(61));
    assert!(e.snapshot_if_due().unwrap());
    assert!(path.exists());

    // Nothing changed since the snapshot.
    clock.advance(Duration::from_secs(61));
    assert!(!e.snapshot_if_due().unwrap());
}

#[rstest]
fn clear_derived_reseeds_controllable_units_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let clock = ManualClock::new();
    let metrics = MemoryMetrics::new();
    let sink = RecordingSink::new();
    let mut e = engine(
        CachePersistence {
            path: path.clone(),
            mode: PersistMode::OnWrite,
            snapshot_interval_ms: 60_000,
        },
        &clock,
        &metrics,
        &sink,
    );

    metrics.set(SITE, "boiler-1", e.now_ms(), supply(120.0));
    e.evaluate("boiler-1").unwrap();
    assert!(e.cache().values(SITE, "boiler-1").unwrap().contains_key("firing"));

    let seeded = e.clear_derived().unwrap();
    assert_eq!(seeded, 1);
    let values = e.cache().values(SITE, "boiler-1").unwrap();
    assert!(!values.contains_key("firing"));
    assert_eq!(values.get("enabled"), Some(&MetricValue::Bool(true)));
    assert!(e.cache().values(SITE, "room-1").is_none());

    let reloaded = ControlCache::load(&path);
    assert_eq!(reloaded.len(), 1);
}

#[rstest]
fn corrupt_cache_file_starts_empty_and_is_reseeded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");
    std::fs::write(&path, b"{ not json").unwrap();
    let clock = ManualClock::new();
    let e = engine(
        CachePersistence {
            path,
            mode: PersistMode::OnWrite,
            snapshot_interval_ms: 60_000,
        },
        &clock,
        &MemoryMetrics::new(),
        &RecordingSink::new(),
    );
    assert_eq!(e.cache().len(), 1);
}
