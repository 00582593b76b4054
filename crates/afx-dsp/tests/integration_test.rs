//! DSP integration tests
//!
//! Verifies the cross-module properties of the kernel:
//! - Coefficient stability across the whole host-facing parameter space
//! - Closed-form magnitude response against an empirical sine sweep
//! - Compressor step response against the static-curve prediction
//! - Lookahead limiter output ceiling
//! - Crossover flat-sum reconstruction
//! - Full signal path integrity (no NaN/Inf)

use afx_core::{AtomicParam, AudioBuffer, StereoBuffer, gain_to_db};
use afx_dsp::smoothing::Inertia;
use afx_dsp::biquad::{BiquadCoeffs, BiquadDF1, FilterMode};
use afx_dsp::crossover::{CrossoverAlignment, CrossoverBank};
use afx_dsp::dynamics::{DetectionMode, GainReduction, StereoLink};
use afx_dsp::filter::SmoothedFilter;
use afx_dsp::limiter::LookaheadLimiter;
use afx_dsp::multiband::MultibandLimiter;
use afx_dsp::{MonoProcessor, ProcessorConfig, StereoProcessor};

const SR: f64 = 44100.0;

/// Generate a test sine wave
fn generate_sine(samples: usize, freq: f64) -> Vec<f64> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / SR;
            (2.0 * std::f64::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Deterministic noise without pulling in an RNG
fn generate_noise(samples: usize) -> Vec<f64> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    (0..samples)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            i.hash(&mut hasher);
            let h = hasher.finish();
            (h as f64 / u64::MAX as f64) * 2.0 - 1.0
        })
        .collect()
}

fn is_valid_signal(signal: &[f64]) -> bool {
    signal.iter().all(|&x| x.is_finite())
}

fn rms(signal: &[f64]) -> f64 {
    let sum: f64 = signal.iter().map(|x| x * x).sum();
    (sum / signal.len() as f64).sqrt()
}

// ═══════════════════════════════════════════════════════════════════════════
// STABILITY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_pole_stability_across_parameter_space() {
    let qs = [0.1, 0.5, 0.707, 2.0, 8.0, 20.0];
    let freqs = [21.0, 100.0, 1000.0, 5000.0, 15000.0, SR * 0.489];
    for &q in &qs {
        for &freq in &freqs {
            for mode in [FilterMode::Lowpass, FilterMode::Highpass, FilterMode::Bandpass] {
                let coeffs = BiquadCoeffs::design(mode, freq, q, 0.0, SR);
                let (p1, p2) = coeffs.pole_magnitudes();
                assert!(
                    p1 < 1.0 && p2 < 1.0,
                    "unstable {mode:?} at f={freq} q={q}: poles {p1}, {p2}"
                );
            }
        }
    }
}

#[test]
fn test_impulse_response_decays() {
    // lowpass at 1 kHz, Q 0.707, 44.1 kHz: the canonical smoke test
    let coeffs = BiquadCoeffs::lowpass(1000.0, 0.707, SR);
    let mut filter = BiquadDF1::with_coeffs(coeffs);

    let mut peak_after_200 = 0.0_f64;
    for i in 0..2000 {
        let x = if i == 0 { 1.0 } else { 0.0 };
        let y = filter.process_sample(x);
        assert!(y.is_finite(), "diverged at sample {i}");
        if i >= 200 {
            peak_after_200 = peak_after_200.max(y.abs());
        }
    }
    assert!(
        peak_after_200 < 1e-4,
        "impulse response still ringing: {peak_after_200}"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// MAGNITUDE FORMULA vs EMPIRICAL SWEEP
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_magnitude_matches_sine_sweep() {
    let coeffs = BiquadCoeffs::lowpass(1000.0, 2.0, SR);

    // frequencies chosen so an integer number of periods fits the window
    let window = 4410;
    for k in [50, 100, 200, 500] {
        let freq = 10.0 * k as f64;
        let mut filter = BiquadDF1::with_coeffs(coeffs);
        let input = generate_sine(8192 + window, freq);
        let mut output = Vec::with_capacity(input.len());
        for &x in &input {
            output.push(filter.process_sample(x));
        }
        let measured = rms(&output[8192..]) * std::f64::consts::SQRT_2;
        let predicted = coeffs.magnitude_at(freq, SR);
        assert!(
            (measured - predicted).abs() / predicted < 0.01,
            "at {freq} Hz: measured {measured}, formula {predicted}"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// COMPRESSOR STEP SCENARIO
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_compressor_step_settles_at_predicted_level() {
    let mut comp = GainReduction::new(SR);
    comp.set_params(
        10.0,
        100.0,
        -12.0,
        4.0,
        4.0,
        0.0,
        DetectionMode::Peak,
        StereoLink::Max,
    );

    let quiet = 0.01; // -40 dBFS
    let loud = 1.0; // 0 dBFS

    // settle at the quiet level
    for _ in 0..44100 {
        comp.process(quiet, quiet, None);
    }
    assert!(comp.current_reduction_db() < 0.01);

    // step up; after ~3x attack the output sits near
    // threshold + (input - threshold) / ratio = -9 dBFS
    let three_attacks = (3.0 * 0.010 * SR) as usize;
    let mut out = (0.0, 0.0);
    for _ in 0..three_attacks {
        out = comp.process(loud, loud, None);
    }
    let out_db = gain_to_db(out.0);
    assert!(
        (out_db - (-9.0)).abs() < 0.5,
        "settled at {out_db} dB, expected -9 dB"
    );

    // step back down; within ~3x release the reduction is gone
    let three_releases = (3.0 * 0.100 * SR) as usize;
    for _ in 0..three_releases {
        comp.process(quiet, quiet, None);
    }
    assert!(
        comp.current_reduction_db() < 0.1,
        "still reducing {} dB after release",
        comp.current_reduction_db()
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// LIMITER CEILING
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_limiter_holds_ceiling_for_24db_overshoot() {
    let mut limiter = LookaheadLimiter::new(SR);
    limiter.set_params(1.0, 5.0, 50.0, false, 1.0);

    // flush the construction mute cycle
    for _ in 0..(SR * 0.01) as usize {
        limiter.process_sample(0.0, 0.0);
    }

    let spike = 10.0_f64.powf(24.0 / 20.0);
    let ceiling = 10.0_f64.powf(0.1 / 20.0); // limit + 0.1 dB
    for i in 0..(SR as usize) {
        let base = (2.0 * std::f64::consts::PI * 330.0 * i as f64 / SR).sin() * 0.5;
        let x = if i % 9000 == 4500 { spike } else { base };
        let (l, r) = limiter.process_sample(x, x);
        assert!(
            l.abs() <= ceiling && r.abs() <= ceiling,
            "ceiling broken at sample {i}: {l}"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CROSSOVER FLAT SUM
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_crossover_two_band_sum_is_allpass() {
    let mut bank = CrossoverBank::new(SR);
    bank.configure(2, &[1000.0], CrossoverAlignment::Lr4, SR);

    // complex band responses must sum to unity magnitude everywhere,
    // including exactly at the crossover point (the tolerance covers the
    // historical truncated stage Q)
    let mut freq = 20.0;
    while freq < 20000.0 {
        let sum = bank.response_at(0, freq) + bank.response_at(1, freq);
        assert!(
            (sum.norm() - 1.0).abs() < 1e-3,
            "two-band sum not flat at {freq} Hz: {}",
            sum.norm()
        );
        freq *= 1.3;
    }
    let sum = bank.response_at(0, 1000.0) + bank.response_at(1, 1000.0);
    assert!((sum.norm() - 1.0).abs() < 1e-3);
}

#[test]
fn test_crossover_four_band_sum_is_nearly_flat() {
    let mut bank = CrossoverBank::new(SR);
    bank.configure(4, &[150.0, 1200.0, 8000.0], CrossoverAlignment::Lr4, SR);

    let mut freq = 20.0;
    while freq < 20000.0 {
        let sum: num_complex::Complex64 =
            (0..4).map(|band| bank.response_at(band, freq)).sum();
        let db = 20.0 * sum.norm().log10();
        assert!(
            db.abs() < 0.5,
            "four-band sum off by {db} dB at {freq} Hz"
        );
        freq *= 1.21;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FULL PATH INTEGRITY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_full_chain_signal_integrity() {
    let mut filter = SmoothedFilter::new(SR);
    filter.set_mode(FilterMode::Lowpass, 2);
    filter.set_cutoff(6000.0);
    filter.set_q(2.0);

    let mut limiter = MultibandLimiter::new(SR, 3);
    limiter.set_params(0.9, 5.0, 80.0, true, 1.0);

    let noise = generate_noise(SR as usize);
    let mut buffer = StereoBuffer::new(noise.len());
    for (i, &x) in noise.iter().enumerate() {
        buffer.left_mut()[i] = x * 1.5;
        buffer.right_mut()[i] = x * 1.5;
    }

    let (left, right) = buffer.channels_mut();
    filter.process_block(left, right);
    for (l, r) in left.iter_mut().zip(right.iter_mut()) {
        (*l, *r) = limiter.process_sample(*l, *r);
    }

    assert!(is_valid_signal(buffer.left()));
    assert!(is_valid_signal(buffer.right()));
    assert!(!buffer.is_empty());
    let ceiling = 0.9 * 10.0_f64.powf(0.1 / 20.0);
    assert!(buffer.left().iter().skip(20000).all(|x| x.abs() <= ceiling));
}

#[test]
fn test_parameter_slot_smoothing_absorbs_control_jumps() {
    // the control thread writes a plain scalar slot; the audio side reads
    // it once per block and lets the inertia ramp absorb the jump
    let slot = AtomicParam::new(0.0);
    let mut gain = Inertia::linear(0.0);

    let mut last = 0.0;
    let mut max_step = 0.0_f64;
    for block in 0..64 {
        // a hostile control thread jumping the value every other block
        slot.set(if block % 2 == 0 { 1.0 } else { 0.2 });
        gain.set_target(slot.get());
        for _ in 0..128 {
            let v = gain.step();
            max_step = max_step.max((v - last).abs());
            last = v;
        }
    }
    // the audible step never exceeds one ramp increment
    assert!(max_step <= 1.0 / 128.0 + 1e-12, "step {max_step}");
}

#[test]
fn test_chain_survives_invalid_input() {
    let mut limiter = LookaheadLimiter::new(SR);
    limiter.set_params(1.0, 5.0, 50.0, true, 1.0);
    let mut filter = SmoothedFilter::new(SR);

    for i in 0..10000 {
        let x = match i % 1000 {
            0 => f64::NAN,
            1 => f64::INFINITY,
            _ => (2.0 * std::f64::consts::PI * 440.0 * i as f64 / SR).sin(),
        };
        let (l, r) = limiter.process_sample(x, x);
        assert!(l.is_finite() && r.is_finite());
        // the filter itself never sees the invalid value
        let (fl, fr) = filter.process_sample(l, r);
        assert!(fl.is_finite() && fr.is_finite());
    }
}

#[test]
fn test_sample_rate_change_invalidates_designs() {
    let mut bank = CrossoverBank::new(44100.0);
    bank.configure(2, &[1000.0], CrossoverAlignment::Lr4, 44100.0);
    // LR4 is exactly -6 dB at the crossover point, independent of rate —
    // but only if the coefficients were designed for the right rate
    assert!((bank.magnitude_at(0, 1000.0) - 0.5).abs() < 1e-3);

    bank.set_sample_rate(88200.0);
    assert!((bank.magnitude_at(0, 1000.0) - 0.5).abs() < 1e-3);

    // idempotent
    let after = bank.magnitude_at(0, 1000.0);
    bank.set_sample_rate(88200.0);
    assert_eq!(bank.magnitude_at(0, 1000.0), after);
}
