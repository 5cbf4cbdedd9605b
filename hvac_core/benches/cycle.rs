use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use hvac_core::Engine;
use hvac_core::mocks::{MemoryDirectory, MemoryMetrics, RecordingSink, entry};
use hvac_core::pid::{self, PidMemory, PidParams};
use hvac_traits::{FieldMap, ManualClock, MetricValue};

const SITE: &str = "site-a";

fn telemetry(pairs: &[(&str, f64)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), MetricValue::Number(*v)))
        .collect()
}

fn engine(units: usize) -> (Engine, Vec<String>) {
    let clock = ManualClock::new();
    let metrics = MemoryMetrics::new();
    let mut entries = Vec::with_capacity(units);
    let mut ids = Vec::with_capacity(units);
    for i in 0..units {
        let (id, ty, fields) = match i % 3 {
            0 => (format!("boiler-{i}"), "Comfort Boiler", telemetry(&[("H2OSupply", 140.0), ("outdoorTemp", 30.0)])),
            1 => (format!("ahu-{i}"), "AHU", telemetry(&[("SupplyAirTemp", 58.0), ("outdoorTemp", 30.0)])),
            _ => (format!("fcu-{i}"), "Fan Coil", telemetry(&[("SpaceTemp", 70.0), ("outdoorTemp", 30.0)])),
        };
        metrics.set(SITE, &id, clock_now(&clock), fields);
        entries.push(entry(&id, SITE, ty));
        ids.push(id);
    }
    let e = Engine::builder()
        .with_directory(MemoryDirectory::new(entries))
        .with_metrics(metrics)
        .with_sink(RecordingSink::new())
        .with_clock(clock)
        .build()
        .unwrap();
    (e, ids)
}

fn clock_now(c: &ManualClock) -> u64 {
    use hvac_traits::Clock;
    c.now_ms()
}

pub fn bench_evaluation(c: &mut Criterion) {
    let mut g = c.benchmark_group("evaluate");
    for units in [3usize, 30] {
        g.bench_function(format!("run_all_{units}_units"), |b| {
            b.iter_batched(
                || engine(units),
                |(mut e, ids)| {
                    for id in &ids {
                        black_box(e.evaluate(id).unwrap());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

pub fn bench_pid(c: &mut Criterion) {
    let params = PidParams::default();
    c.bench_function("pid_step", |b| {
        let mut mem = PidMemory::default();
        let mut x = 60.0;
        b.iter(|| {
            x = if x > 80.0 { 60.0 } else { x + 0.1 };
            black_box(pid::compute(black_box(x), 72.0, &params, 30.0, &mut mem))
        })
    });
}

criterion_group!(cycle, bench_evaluation, bench_pid);
criterion_main!(cycle);
