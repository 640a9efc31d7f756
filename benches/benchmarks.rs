//! Benchmarks for ulerl operations.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ulerl::config::{CompressorConfig, CompressorKind, LearningRate, OptimizerConfig, RunConfig};
use ulerl::evolution::build_strategy;
use ulerl::kernel::{Activation, NetworkKind, SimilarityMeasure};
use ulerl::rollout::testing::ScriptedEnv;
use ulerl::rollout::RolloutSettings;
use ulerl::{
    Compressor, Controller, DimensionalityAdapter, EnvBinding, NetworkLayout, OptimizerKind,
    RolloutEngine,
};

// =============================================================================
// Fixtures
// =============================================================================

const FRAME: (usize, usize) = (32, 32);
/// Length of a downsampled observation: `FRAME` at stride 2.
const OBS_LEN: usize = 16 * 16;

fn compressor_config(initial_ncentrs: usize) -> CompressorConfig {
    CompressorConfig {
        kind: CompressorKind::Growing {
            initial_ncentrs,
            threshold: 0.95,
            lrate: LearningRate::Variable,
        },
        similarity: SimilarityMeasure::Mse,
        downsample: [2, 2],
        ..Default::default()
    }
}

fn observation(seed: usize) -> Vec<f64> {
    (0..OBS_LEN)
        .map(|i| ((i * 7 + seed * 31) % 256) as f64)
        .collect()
}

fn strategy_config(kind: OptimizerKind) -> OptimizerConfig {
    OptimizerConfig {
        kind,
        ..Default::default()
    }
}

// =============================================================================
// Compressor
// =============================================================================

fn benchmark_encode(c: &mut Criterion) {
    let compr = Compressor::new(&compressor_config(32), FRAME, 1).unwrap();
    let obs = observation(3);

    c.bench_function("encode_32_prototypes", |b| {
        b.iter(|| compr.encode(black_box(&obs)).unwrap())
    });
}

fn benchmark_novelty(c: &mut Criterion) {
    let compr = Compressor::new(&compressor_config(32), FRAME, 1).unwrap();
    let obs = observation(3);
    let code = compr.encode(&obs).unwrap();

    c.bench_function("novelty", |b| {
        b.iter(|| compr.novelty(black_box(&obs), black_box(&code)).unwrap())
    });
}

fn benchmark_train(c: &mut Criterion) {
    let config = compressor_config(8);
    let samples: Vec<_> = (0..64).map(observation).collect();

    c.bench_function("train_64_samples", |b| {
        b.iter_batched(
            || {
                let mut compr = Compressor::new(&config, FRAME, 1).unwrap();
                for s in &samples {
                    compr.enqueue(s).unwrap();
                }
                compr
            },
            |mut compr| compr.train().unwrap(),
            BatchSize::SmallInput,
        )
    });
}

// =============================================================================
// Search
// =============================================================================

fn benchmark_sample(c: &mut Criterion) {
    let layout = NetworkLayout::from_parts(NetworkKind::Recurrent, 32, &[], 6).unwrap();

    for kind in [OptimizerKind::Snes, OptimizerKind::Bdnes] {
        let config = strategy_config(kind);
        c.bench_function(&format!("sample_population_{}", kind), |b| {
            b.iter_batched(
                || build_strategy(&config, &layout, 1).unwrap(),
                |mut strategy| strategy.sample_population(),
                BatchSize::SmallInput,
            )
        });
    }
}

fn benchmark_resize(c: &mut Criterion) {
    let layout = NetworkLayout::from_parts(NetworkKind::Recurrent, 32, &[], 6).unwrap();
    let config = strategy_config(OptimizerKind::Bdnes);

    c.bench_function("resize_32_to_40", |b| {
        b.iter_batched(
            || {
                let controller = Controller::new(layout.clone(), Activation::Logistic);
                let strategy = build_strategy(&config, &layout, 1).unwrap();
                (DimensionalityAdapter::new(32), controller, strategy)
            },
            |(mut adapter, mut controller, mut strategy)| {
                adapter
                    .sync(black_box(40), &mut controller, strategy.as_mut())
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

// =============================================================================
// Rollout
// =============================================================================

fn benchmark_rollout(c: &mut Criterion) {
    let config = compressor_config(16);
    let env = ScriptedEnv::new([FRAME.0, FRAME.1, 3], 4, 50);
    let mut binding = EnvBinding::new(Box::new(env), &config).unwrap();
    let compr = Compressor::new(&config, FRAME, 1).unwrap();
    let layout = NetworkLayout::from_parts(NetworkKind::Recurrent, 16, &[], 4).unwrap();
    let mut controller = Controller::new(layout.clone(), Activation::Logistic);
    let genotype: Vec<f64> = (0..layout.nweights())
        .map(|i| ((i % 5) as f64 - 2.0) * 0.1)
        .collect();
    let settings = RolloutSettings::from(&RunConfig::default());
    let engine = RolloutEngine::new(&compr, settings).with_max_steps(50);

    c.bench_function("rollout_50_steps", |b| {
        b.iter(|| {
            engine
                .run(&mut controller, black_box(&genotype), &mut binding)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_novelty,
    benchmark_train,
    benchmark_sample,
    benchmark_resize,
    benchmark_rollout,
);

criterion_main!(benches);
