//! Criterion benchmarks for cryptocast hot paths.
//!
//! Benchmarks:
//! 1. Series merge (incremental append onto a full cache slot)
//! 2. Cache read (snapshot clone under contention-free read lock)
//! 3. Model predict (drift and AR over a year of daily closes)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use cryptocast_core::cache::{RetentionPolicy, SeriesCache};
use cryptocast_core::data::{MarketDataProvider, SyntheticProvider};
use cryptocast_core::domain::{AssetId, Horizon, PricePoint};
use cryptocast_core::model::{AutoregressiveModel, DriftModel, Forecaster};

// ── Helpers ──────────────────────────────────────────────────────────

fn synthetic_points(asset: AssetId) -> Vec<PricePoint> {
    SyntheticProvider::new(42)
        .fetch_series(asset, None)
        .map(|f| f.points)
        .unwrap_or_default()
}

fn cache() -> SeriesCache {
    SeriesCache::new(
        Duration::from_secs(900),
        RetentionPolicy {
            max_age: chrono::Duration::days(730),
            max_points: 1000,
            floor_points: 0,
        },
    )
}

// ── 1. Merge ─────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let history = synthetic_points(AssetId::Btc);

    for tail in [1usize, 7, 30] {
        group.bench_with_input(BenchmarkId::new("incremental", tail), &tail, |b, &tail| {
            let cache = cache();
            let split = history.len().saturating_sub(tail);
            cache.merge(AssetId::Btc, &history[..split]);
            let incoming = &history[split..];
            b.iter(|| black_box(cache.merge(AssetId::Btc, black_box(incoming))));
        });
    }

    group.bench_function("initial_full", |b| {
        b.iter(|| {
            let cache = cache();
            black_box(cache.merge(AssetId::Btc, black_box(&history)))
        });
    });
    group.finish();
}

// ── 2. Read ──────────────────────────────────────────────────────────

fn bench_read(c: &mut Criterion) {
    let cache = cache();
    cache.merge(AssetId::Eth, &synthetic_points(AssetId::Eth));
    c.bench_function("read_snapshot", |b| {
        b.iter(|| black_box(cache.read(black_box(AssetId::Eth))))
    });
}

// ── 3. Predict ───────────────────────────────────────────────────────

fn bench_predict(c: &mut Criterion) {
    let cache = cache();
    cache.merge(AssetId::Sol, &synthetic_points(AssetId::Sol));
    let series = cache.read(AssetId::Sol).series;

    let drift = DriftModel {
        window: 90,
        confidence_z: 1.96,
    };
    let ar = AutoregressiveModel {
        intercept: 0.0005,
        coefficients: vec![0.08, -0.03, 0.01],
        residual_std: 0.035,
        confidence_z: 1.96,
    };

    let mut group = c.benchmark_group("predict");
    for days in [1u32, 7, 30] {
        let horizon = Horizon::clamped(days);
        group.bench_with_input(BenchmarkId::new("drift", days), &horizon, |b, &h| {
            b.iter(|| black_box(drift.predict(&series, h)))
        });
        group.bench_with_input(BenchmarkId::new("autoregressive", days), &horizon, |b, &h| {
            b.iter(|| black_box(ar.predict(&series, h)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge, bench_read, bench_predict);
criterion_main!(benches);
