//! Criterion benchmarks for the feature builder and layer hot paths.
//!
//! Benchmarks:
//! 1. h7 feature build over growing series lengths
//! 2. Rolling median (the 252-row regime window dominates build time)
//! 3. Decision policy over a large probability vector

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use fxsignal_core::features::build_features;
use fxsignal_core::features::rolling::{rolling_median, rolling_std};
use fxsignal_core::policy::{apply_threshold_policy, confidence_from_p};
use fxsignal_core::synthetic::random_walk_gold;

fn bench_build_features(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_features");
    for n in [300usize, 1_000, 5_000] {
        let gold = random_walk_gold("FXUSDCAD", n, 42);
        group.bench_with_input(BenchmarkId::from_parameter(n), &gold, |b, gold| {
            b.iter(|| build_features(black_box(gold)))
        });
    }
    group.finish();
}

fn bench_rolling(c: &mut Criterion) {
    let gold = random_walk_gold("FXUSDCAD", 5_000, 7);
    let values: Vec<f64> = gold.iter().map(|r| r.value).collect();
    let vol = rolling_std(&values, 21);

    c.bench_function("rolling_median_252", |b| {
        b.iter(|| rolling_median(black_box(&vol), 252))
    });
}

fn bench_policy(c: &mut Criterion) {
    let p: Vec<f64> = (0..100_000).map(|i| (i % 1000) as f64 / 1000.0).collect();
    c.bench_function("threshold_policy_100k", |b| {
        b.iter(|| {
            let labels = apply_threshold_policy(black_box(&p), 0.6);
            let conf = confidence_from_p(black_box(&p), 0.6);
            (labels, conf)
        })
    });
}

criterion_group!(benches, bench_build_features, bench_rolling, bench_policy);
criterion_main!(benches);
