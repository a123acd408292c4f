//! Pitch estimator benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tuner_core::{Analyzer, Frame, PitchEstimator, ReferencePitch, TunerConfig};

const SAMPLE_RATE: u32 = 44100;
const FRAME_SIZES: &[usize] = &[1024, 2048, 4096];

fn piano_like(len: usize, f0: f64) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            (1..=6)
                .map(|h| (2.0 * std::f64::consts::PI * f0 * h as f64 * t).sin() * 0.3 / h as f64)
                .sum::<f64>() as f32
        })
        .collect()
}

fn bench_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate");

    for &size in FRAME_SIZES {
        group.throughput(Throughput::Elements(size as u64));

        let input = piano_like(size, 220.0);
        let mut estimator = PitchEstimator::default();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(estimator.estimate(black_box(&input), SAMPLE_RATE)))
        });
    }

    group.finish();
}

fn bench_silence(c: &mut Criterion) {
    let input = vec![0.0_f32; 2048];
    let mut estimator = PitchEstimator::default();

    c.bench_function("estimate_silence_2048", |b| {
        b.iter(|| black_box(estimator.estimate(black_box(&input), SAMPLE_RATE)))
    });
}

fn bench_analyze(c: &mut Criterion) {
    let frame = Frame { index: 0, samples: piano_like(2048, 110.0) };
    let mut analyzer = Analyzer::new(&TunerConfig::default(), ReferencePitch::default());

    c.bench_function("analyze_frame_2048", |b| {
        b.iter(|| black_box(analyzer.analyze(black_box(&frame), SAMPLE_RATE)))
    });
}

criterion_group!(benches, bench_estimate, bench_silence, bench_analyze);
criterion_main!(benches);
