// Criterion benchmarks for cmdrelay-metrics
//
// Run benchmarks with:
//   cargo bench -p cmdrelay-metrics

use cmdrelay_metrics::{BrokerMetricsCollector, MetricsCollector};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    let collector = BrokerMetricsCollector::new();

    group.bench_function("message", |b| b.iter(|| collector.record_message()));

    group.bench_function("command_known_name", |b| {
        b.iter(|| collector.record_command(black_box("click")))
    });

    group.bench_function("response", |b| {
        b.iter(|| {
            collector.record_response(black_box("click"), black_box(Duration::from_millis(12)), true)
        })
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let collector = BrokerMetricsCollector::new();
    for i in 0..50 {
        let name = format!("command_{}", i);
        collector.record_command(&name);
        collector.record_response(&name, Duration::from_millis(i), true);
    }

    c.bench_function("snapshot_50_commands", |b| b.iter(|| collector.snapshot()));
}

criterion_group!(benches, bench_record, bench_snapshot);
criterion_main!(benches);
