//! Benchmarks for signal processing modules

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use fractal_bci_core::{FilterBankConfig, FrequencyBand};
use fractal_bci_native::pipeline::{SubjectSource, SyntheticConfig, SyntheticSource};
use fractal_bci_native::processing::{
    filters::{BandpassFilter, FilterBank, IirFilterBank},
    fractal::HiguchiEstimator,
};

/// Generate synthetic EEG data (sinusoidal with noise)
fn generate_eeg_samples(n: usize, freq_hz: f64, sample_rate: f64) -> Vec<f64> {
    use std::f64::consts::PI;

    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate;
            let signal = (2.0 * PI * freq_hz * t).sin();
            let noise = (i as f64 * 0.123).sin() * 0.1; // Pseudo-noise
            (signal + noise) * 50.0 // Scale to ~50 µV
        })
        .collect()
}

fn bench_bandpass_filtfilt(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandpass_filtfilt");

    for size in [256, 512, 1024, 2048].iter() {
        let samples = generate_eeg_samples(*size, 10.0, 250.0);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let mut filter = BandpassFilter::new(250.0, FrequencyBand::new(8.0, 12.0), 2);
            b.iter(|| black_box(filter.filtfilt(black_box(&samples))));
        });
    }

    group.finish();
}

fn bench_higuchi(c: &mut Criterion) {
    let mut group = c.benchmark_group("higuchi");

    for k_max in [10, 50, 100].iter() {
        let samples = generate_eeg_samples(1000, 10.0, 250.0);
        let estimator = HiguchiEstimator::new(*k_max);

        group.bench_with_input(BenchmarkId::from_parameter(k_max), k_max, |b, _| {
            b.iter(|| black_box(estimator.estimate(black_box(&samples))));
        });
    }

    group.finish();
}

fn bench_filter_bank(c: &mut Criterion) {
    let source = SyntheticSource::new(SyntheticConfig { trials_per_class: 10, ..Default::default() });
    let Ok(data) = source.load(1) else {
        return;
    };
    let bank = IirFilterBank::new(FilterBankConfig::default());

    c.bench_function("filter_bank_20_trials", |b| {
        b.iter(|| black_box(bank.apply(black_box(data.x()), data.sfreq())));
    });
}

criterion_group!(benches, bench_bandpass_filtfilt, bench_higuchi, bench_filter_bank);
criterion_main!(benches);
