// Criterion benchmarks for cmdrelay-broker
//
// Run benchmarks with:
//   cargo bench -p cmdrelay-broker

use cmdrelay_broker::{Broker, BrokerConfig, Outbound};
use cmdrelay_common::ClientId;
use cmdrelay_metrics::BrokerMetricsCollector;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver};

struct Bench {
    broker: Broker,
    orchestrator: ClientId,
    executors: Vec<ClientId>,
    inboxes: Vec<UnboundedReceiver<Outbound>>,
}

fn setup(executors: usize) -> Bench {
    let config = BrokerConfig {
        rate_limit_enabled: false,
        ..Default::default()
    };
    let mut broker = Broker::new(&config, Arc::new(BrokerMetricsCollector::new()));
    let now = Instant::now();
    let mut inboxes = Vec::new();

    let mut join = |broker: &mut Broker, role: &str| {
        let (tx, rx) = mpsc::unbounded_channel();
        inboxes.push(rx);
        let id = broker.connect(tx, now);
        broker.handle_text(&id, &json!({"type": "register", "role": role}).to_string(), now);
        id
    };

    let orchestrator = join(&mut broker, "orchestrator");
    let executors = (0..executors)
        .map(|_| join(&mut broker, "executor"))
        .collect();

    Bench {
        broker,
        orchestrator,
        executors,
        inboxes,
    }
}

impl Bench {
    fn drain(&mut self) {
        for inbox in &mut self.inboxes {
            while inbox.try_recv().is_ok() {}
        }
    }
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");

    for executors in [1usize, 8] {
        let mut bench = setup(executors);
        let mut seq = 0u64;
        group.bench_function(format!("{}_executors", executors), |b| {
            b.iter(|| {
                seq += 1;
                let id = format!("cmd-{}", seq);
                let now = Instant::now();
                let command = json!({"type": "command", "id": id, "command": "click", "params": {"selector": "#go"}});
                bench
                    .broker
                    .handle_text(&bench.orchestrator, black_box(&command.to_string()), now);
                let response = json!({"type": "response", "id": id, "success": true, "data": null});
                bench
                    .broker
                    .handle_text(&bench.executors[0], black_box(&response.to_string()), now);
                bench.drain();
            })
        });
    }

    group.finish();
}

fn bench_rejections(c: &mut Criterion) {
    let mut bench = setup(1);
    let executor = bench.executors[0].clone();

    c.bench_function("reject_invalid_json", |b| {
        b.iter(|| {
            bench
                .broker
                .handle_text(&executor, black_box("{\"type\": \"command\""), Instant::now());
            bench.drain();
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_rejections);
criterion_main!(benches);
