//! Biquad filter benchmarks

use afx_dsp::MonoProcessor;
use afx_dsp::biquad::{BiquadCascade, BiquadCoeffs, BiquadDF1, BiquadTDF2};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_biquad_df1(c: &mut Criterion) {
    let mut filter = BiquadDF1::with_coeffs(BiquadCoeffs::lowpass(1000.0, 0.707, 48000.0));
    let mut buffer: Vec<f64> = (0..1024).map(|i| (i as f64 * 0.01).sin()).collect();

    c.bench_function("biquad_df1_1024", |b| {
        b.iter(|| {
            filter.process_block(black_box(&mut buffer));
        })
    });
}

fn bench_biquad_tdf2(c: &mut Criterion) {
    let mut filter = BiquadTDF2::new(48000.0);
    filter.set_lowpass(1000.0, 0.707);
    let mut buffer: Vec<f64> = (0..1024).map(|i| (i as f64 * 0.01).sin()).collect();

    c.bench_function("biquad_tdf2_1024", |b| {
        b.iter(|| {
            filter.process_block(black_box(&mut buffer));
        })
    });
}

fn bench_biquad_cascade(c: &mut Criterion) {
    let mut cascade = BiquadCascade::new(4);
    cascade.set_coeffs(BiquadCoeffs::lowpass(1000.0, 0.707, 48000.0));
    let mut buffer: Vec<f64> = (0..1024).map(|i| (i as f64 * 0.01).sin()).collect();

    c.bench_function("biquad_cascade4_1024", |b| {
        b.iter(|| {
            cascade.process_block(black_box(&mut buffer));
        })
    });
}

criterion_group!(
    benches,
    bench_biquad_df1,
    bench_biquad_tdf2,
    bench_biquad_cascade
);
criterion_main!(benches);
