//! Correlation and bridge packing benchmarks.
//!
//! - Request round trips through the correlator at different backlog sizes
//! - Packing envelopes for the host bridge
//!
//! Run with: cargo bench --bench correlator
//! Results saved to: target/criterion/

use std::time::Duration;

use context_bus::protocol::{pack, unpack};
use context_bus::{Correlator, Envelope, Location, ResponseId, TabId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BACKLOGS: &[usize] = &[0, 100, 1_000];
const TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Benchmark: Correlator Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("correlator");

    for &backlog in BACKLOGS {
        // Abandoned requests stay registered until the timeout.
        let correlator = rt.block_on(async {
            let correlator = Correlator::new(TIMEOUT, backlog + 1);
            for _ in 0..backlog {
                let _ = correlator.register().unwrap();
            }
            correlator
        });

        group.bench_with_input(
            BenchmarkId::new("round_trip", backlog),
            &correlator,
            |b, correlator| {
                b.to_async(&rt).iter(|| async {
                    let (id, pending) = correlator.register().unwrap();
                    correlator.resolve(&id, json!("pong")).unwrap();
                    pending.await.unwrap()
                });
            },
        );

        rt.block_on(async { correlator.shutdown() });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Bridge Packing
// ============================================================================

fn bench_bridge_packing(c: &mut Criterion) {
    let envelope = Envelope::request(
        Location::Core,
        Location::ContentScript,
        json!({"action": "query", "selector": "#main", "args": [1, 2, 3]}),
        ResponseId::generate(),
    )
    .with_orig_tab(TabId::new(7).unwrap());
    let packed = pack(&envelope).unwrap();

    let mut group = c.benchmark_group("bridge");
    group.bench_function("pack", |b| b.iter(|| pack(&envelope).unwrap()));
    group.bench_function("unpack", |b| b.iter(|| unpack(&packed).unwrap()));
    group.finish();
}

// ============================================================================
// Main
// ============================================================================

criterion_group!(benches, bench_round_trip, bench_bridge_packing);
criterion_main!(benches);
