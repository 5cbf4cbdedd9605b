use std::time::Duration;

use hvac_core::mocks::{MemoryDirectory, MemoryMetrics, RecordingSink, entry};
use hvac_core::{Engine, ItemOutcome, Outcome, Pipeline};
use hvac_traits::{BoxError, DirectoryEntry, EquipmentDirectory, ManualClock, MetricValue};
use rstest::rstest;

const SITE: &str = "site-a";
const IDLE: Duration = Duration::from_secs(5);

fn engine_with(directory: impl EquipmentDirectory + Send + 'static, metrics: MemoryMetrics) -> Engine {
    Engine::builder()
        .with_directory(directory)
        .with_metrics(metrics)
        .with_sink(RecordingSink::new())
        .with_clock(ManualClock::new())
        .build()
        .expect("engine builds")
}

fn units() -> Vec<DirectoryEntry> {
    vec![
        entry("boiler-1", SITE, "Boiler"),
        entry("pump-1", SITE, "HW Pump"),
        entry("fcu-1", SITE, "Fan Coil"),
    ]
}

#[rstest]
fn run_all_evaluates_first_unit_synchronously_and_queues_the_rest() {
    let p = Pipeline::spawn(engine_with(MemoryDirectory::new(units()), MemoryMetrics::new()));

    let run = p.run_all().unwrap();
    assert_eq!(run.enqueued, 2);
    assert_eq!(run.first.as_ref().map(ItemOutcome::equipment_id), Some("boiler-1"));

    assert!(p.wait_idle(IDLE));
    let ids: Vec<String> = p
        .drain_reports()
        .iter()
        .map(|o| o.equipment_id().to_string())
        .collect();
    assert_eq!(ids, vec!["pump-1".to_string(), "fcu-1".to_string()]);
}

#[rstest]
fn empty_directory_runs_nothing() {
    let p = Pipeline::spawn(engine_with(MemoryDirectory::new(Vec::new()), MemoryMetrics::new()));
    let run = p.run_all().unwrap();
    assert!(run.first.is_none());
    assert_eq!(run.enqueued, 0);
    assert_eq!(p.pending(), 0);
}

#[rstest]
fn unknown_unit_fails_without_stopping_the_queue() {
    let p = Pipeline::spawn(engine_with(MemoryDirectory::new(units()), MemoryMetrics::new()));
    p.enqueue("ghost");
    p.enqueue("pump-1");
    assert!(p.wait_idle(IDLE));

    let out = p.drain_reports();
    assert_eq!(out.len(), 2);
    assert!(matches!(&out[0], ItemOutcome::Failed { equipment_id, .. } if equipment_id == "ghost"));
    assert!(matches!(&out[1], ItemOutcome::Evaluated(r) if r.outcome == Outcome::Controlled));
}

/// Directory whose lookups panic for one id.
#[derive(Clone)]
struct PanickyDirectory(MemoryDirectory);

impl EquipmentDirectory for PanickyDirectory {
    fn lookup(&self, equipment_id: &str) -> Result<Option<DirectoryEntry>, BoxError> {
        assert_ne!(equipment_id, "boom", "directory exploded");
        self.0.lookup(equipment_id)
    }

    fn eligible(&self) -> Result<Vec<DirectoryEntry>, BoxError> {
        self.0.eligible()
    }
}

#[rstest]
fn panicking_item_is_reported_and_worker_survives() {
    let dir = PanickyDirectory(MemoryDirectory::new(units()));
    let p = Pipeline::spawn(engine_with(dir, MemoryMetrics::new()));
    p.enqueue("boom");
    p.enqueue("boiler-1");
    assert!(p.wait_idle(IDLE));

    let out = p.drain_reports();
    assert_eq!(out.len(), 2);
    match &out[0] {
        ItemOutcome::Failed { error, .. } => assert!(error.contains("panicked"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(matches!(&out[1], ItemOutcome::Evaluated(_)));
}

#[rstest]
fn replace_pending_supersedes_queued_work() {
    let p = Pipeline::spawn(engine_with(MemoryDirectory::new(units()), MemoryMetrics::new()));

    // Hold the engine so the worker cannot make progress while we queue.
    let dropped = p.with_engine(|_| {
        p.enqueue("boiler-1");
        p.enqueue("pump-1");
        std::thread::sleep(Duration::from_millis(50));
        p.replace_pending(vec!["fcu-1".to_string()])
    });

    assert!(p.wait_idle(IDLE));
    let ids: Vec<String> = p
        .drain_reports()
        .iter()
        .map(|o| o.equipment_id().to_string())
        .collect();
    // At most one item was already taken by the worker before the swap.
    assert!(dropped >= 1, "dropped {dropped}");
    assert_eq!(ids.last().map(String::as_str), Some("fcu-1"));
    assert!(ids.len() <= 2);
}

#[rstest]
fn engine_state_is_shared_between_worker_and_caller() {
    let metrics = MemoryMetrics::new();
    let p = Pipeline::spawn(engine_with(MemoryDirectory::new(units()), metrics.clone()));
    let now = p.with_engine(|e| e.now_ms());
    metrics.set(
        SITE,
        "boiler-1",
        now,
        [("H2OSupply".to_string(), MetricValue::Number(100.0))]
            .into_iter()
            .collect(),
    );

    p.enqueue("boiler-1");
    assert!(p.wait_idle(IDLE));

    let firing = p.with_engine(|e| {
        e.cache()
            .values(SITE, "boiler-1")
            .and_then(|v| v.get("firing").cloned())
    });
    assert_eq!(firing, Some(MetricValue::Number(1.0)));
}

#[rstest]
fn dropping_pipeline_joins_worker() {
    let p = Pipeline::spawn(engine_with(MemoryDirectory::new(units()), MemoryMetrics::new()));
    p.enqueue("boiler-1");
    drop(p);
}
