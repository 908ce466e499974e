//! # Secure Aggregation Benchmarks
//!
//! Measures envelope seal/open throughput and weighted aggregation across
//! participant counts.
//!
//! Run: `cargo bench --bench aggregation`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use medfed::prelude::*;

fn sample_weights(kind: ModelKind, delta: f64) -> ModelWeights {
    let mut weights = kind.template();
    for tensor in weights.values_mut() {
        for x in tensor.data_mut() {
            *x += delta;
        }
    }
    weights
}

fn sealed_update(key: &EnvelopeKey, id: &str, weights: &ModelWeights, size: u64) -> LocalUpdate {
    LocalUpdate {
        participant_id: id.into(),
        model_id: "bench".into(),
        sealed: key.seal(weights).unwrap(),
        contribution_size: size,
        submitted_at: 0,
    }
}

/// Benchmark envelope seal and open on a realistic weight set
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    let key = EnvelopeKey::generate();
    let weights = sample_weights(ModelKind::DiseasePrediction, 0.5);
    let payload_len = key.seal(&weights).unwrap().payload.len() as u64;
    group.throughput(Throughput::Bytes(payload_len));

    group.bench_function("seal", |b| {
        b.iter(|| black_box(key.seal(&weights).unwrap()))
    });

    let sealed = key.seal(&weights).unwrap();
    group.bench_function("verify", |b| b.iter(|| black_box(sealed.verify())));
    group.bench_function("open", |b| {
        b.iter(|| black_box(key.open(&sealed).unwrap()))
    });

    group.finish();
}

/// Benchmark weighted aggregation as the accepted set grows
fn bench_weighted_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_aggregation");

    let key = EnvelopeKey::generate();
    let aggregator = SecureAggregator::new(key.clone());
    let template = ModelKind::DiseasePrediction.template();

    for participants in [2usize, 5, 10, 25] {
        let updates: Vec<LocalUpdate> = (0..participants)
            .map(|i| {
                let weights = sample_weights(ModelKind::DiseasePrediction, i as f64 * 0.1);
                sealed_update(&key, &format!("p{i}"), &weights, (i as u64 + 1) * 100)
            })
            .collect();

        group.throughput(Throughput::Elements(participants as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(participants),
            &updates,
            |b, updates| {
                b.iter(|| black_box(aggregator.aggregate(updates, &template).unwrap()))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_envelope, bench_weighted_aggregation);
criterion_main!(benches);
