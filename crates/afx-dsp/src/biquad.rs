//! Biquad filter design and execution
//!
//! Coefficient design follows the Robert Bristow-Johnson cookbook
//! equations. Two execution forms are provided: Direct Form I (more state,
//! numerically robust under coefficient changes) and Transposed Direct
//! Form II (less state, the form used when coefficients are stable within
//! a run). Both produce equivalent steady-state output for the same
//! coefficients.

use afx_core::{Sample, flush_denormal};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::{MonoProcessor, Processor, ProcessorConfig};

/// Lowest designable cutoff in Hz
pub const MIN_FREQ: f64 = 1.0;
/// Cutoff ceiling as a fraction of the sample rate (just below Nyquist)
pub const MAX_FREQ_RATIO: f64 = 0.49;
/// Q clamp range
pub const MIN_Q: f64 = 0.01;
pub const MAX_Q: f64 = 32.0;

/// Maximum cascade length (48 dB/oct)
pub const MAX_STAGES: usize = 4;

/// Biquad filter modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    BandReject,
    Allpass,
    LowShelf,
    HighShelf,
    Peaking,
}

/// Clamp host-supplied design parameters into the stable region.
///
/// Out-of-range values are never an error: audio must keep flowing, so the
/// design proceeds with the nearest valid value.
#[inline]
fn clamp_design(freq: f64, q: f64, sample_rate: f64) -> (f64, f64) {
    let freq = if freq.is_finite() { freq } else { 1000.0 };
    let q = if q.is_finite() { q } else { 0.707 };
    (
        freq.clamp(MIN_FREQ, sample_rate * MAX_FREQ_RATIO),
        q.clamp(MIN_Q, MAX_Q),
    )
}

/// Biquad coefficients, normalized so the output tap gain is 1
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::bypass()
    }
}

impl BiquadCoeffs {
    /// Design coefficients for any mode. `gain_db` is only used by the
    /// shelving and peaking modes.
    pub fn design(mode: FilterMode, freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        match mode {
            FilterMode::Lowpass => Self::lowpass(freq, q, sample_rate),
            FilterMode::Highpass => Self::highpass(freq, q, sample_rate),
            FilterMode::Bandpass => Self::bandpass(freq, q, sample_rate),
            FilterMode::BandReject => Self::band_reject(freq, q, sample_rate),
            FilterMode::Allpass => Self::allpass(freq, q, sample_rate),
            FilterMode::LowShelf => Self::low_shelf(freq, q, gain_db, sample_rate),
            FilterMode::HighShelf => Self::high_shelf(freq, q, gain_db, sample_rate),
            FilterMode::Peaking => Self::peaking(freq, q, gain_db, sample_rate),
        }
    }

    /// Calculate lowpass filter coefficients
    pub fn lowpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let inv = 1.0 / (1.0 + alpha);

        let b0 = (1.0 - cos_omega) * 0.5 * inv;
        Self {
            b0,
            b1: b0 + b0,
            b2: b0,
            a1: -2.0 * cos_omega * inv,
            a2: (1.0 - alpha) * inv,
        }
    }

    /// Calculate highpass filter coefficients
    pub fn highpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let inv = 1.0 / (1.0 + alpha);

        let b0 = (1.0 + cos_omega) * 0.5 * inv;
        Self {
            b0,
            b1: -2.0 * b0,
            b2: b0,
            a1: -2.0 * cos_omega * inv,
            a2: (1.0 - alpha) * inv,
        }
    }

    /// Calculate bandpass filter coefficients (unity gain at the center)
    pub fn bandpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let inv = 1.0 / (1.0 + alpha);

        Self {
            b0: alpha * inv,
            b1: 0.0,
            b2: -alpha * inv,
            a1: -2.0 * cos_omega * inv,
            a2: (1.0 - alpha) * inv,
        }
    }

    /// Calculate band-reject (notch) filter coefficients
    pub fn band_reject(freq: f64, q: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let inv = 1.0 / (1.0 + alpha);

        Self {
            b0: inv,
            b1: -2.0 * cos_omega * inv,
            b2: inv,
            a1: -2.0 * cos_omega * inv,
            a2: (1.0 - alpha) * inv,
        }
    }

    /// Calculate allpass filter coefficients
    pub fn allpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let inv = 1.0 / (1.0 + alpha);

        Self {
            b0: (1.0 - alpha) * inv,
            b1: -2.0 * cos_omega * inv,
            b2: 1.0,
            a1: -2.0 * cos_omega * inv,
            a2: (1.0 - alpha) * inv,
        }
    }

    /// Calculate peaking EQ filter coefficients
    pub fn peaking(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let inv = 1.0 / (1.0 + alpha / a);

        Self {
            b0: (1.0 + alpha * a) * inv,
            b1: -2.0 * cos_omega * inv,
            b2: (1.0 - alpha * a) * inv,
            a1: -2.0 * cos_omega * inv,
            a2: (1.0 - alpha / a) * inv,
        }
    }

    /// Calculate low shelf filter coefficients
    pub fn low_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let b0 = a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha);
        let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega);
        let b2 = a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha);
        let a0 = (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha;
        let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega);
        let a2 = (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate high shelf filter coefficients
    pub fn high_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let (freq, q) = clamp_design(freq, q, sample_rate);
        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let b0 = a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha);
        let b1 = -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega);
        let b2 = a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha);
        let a0 = (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha;
        let a1 = 2.0 * ((a - 1.0) - (a + 1.0) * cos_omega);
        let a2 = (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Bypass (unity gain, no filtering)
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Evaluate the transfer function at `z = e^{-jw}`.
    ///
    /// The substitution uses the negative exponent so the same convention
    /// as the frequency graphs holds at the DC/Nyquist boundary; do not
    /// "fix" the sign, external response displays depend on it.
    pub fn response_at(&self, freq: f64, sample_rate: f64) -> Complex64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let z = 1.0 / Complex64::new(0.0, omega).exp();
        let num = Complex64::new(self.b0, 0.0) + self.b1 * z + self.b2 * z * z;
        let den = Complex64::new(1.0, 0.0) + self.a1 * z + self.a2 * z * z;
        num / den
    }

    /// Return the filter's linear gain at `freq`
    #[inline]
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        self.response_at(freq, sample_rate).norm()
    }

    /// Magnitudes of the two feedback poles (stability: both < 1)
    pub fn pole_magnitudes(&self) -> (f64, f64) {
        // roots of z^2 + a1 z + a2
        let disc = self.a1 * self.a1 - 4.0 * self.a2;
        if disc >= 0.0 {
            let s = disc.sqrt();
            (
                ((-self.a1 + s) * 0.5).abs(),
                ((-self.a1 - s) * 0.5).abs(),
            )
        } else {
            // complex conjugate pair, |z| = sqrt(a2)
            let m = self.a2.abs().sqrt();
            (m, m)
        }
    }
}

/// Direct Form I biquad filter
///
/// Four state variables; tolerates coefficient updates mid-stream better
/// than the transposed form, so the smoothed/ramped filters use it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadDF1 {
    coeffs: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadDF1 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            ..Self::default()
        }
    }

    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Flush denormal state to zero; call on a periodic cadence, not
    /// necessarily every sample
    #[inline]
    pub fn sanitize(&mut self) {
        self.x1 = flush_denormal(self.x1);
        self.x2 = flush_denormal(self.x2);
        self.y1 = flush_denormal(self.y1);
        self.y2 = flush_denormal(self.y2);
    }

    /// Has the feedback state decayed to silence?
    #[inline]
    pub fn is_quiet(&self) -> bool {
        self.y1 == 0.0 && self.y2 == 0.0
    }
}

impl Processor for BiquadDF1 {
    fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

impl MonoProcessor for BiquadDF1 {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let c = &self.coeffs;
        let output =
            c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Transposed Direct Form II biquad filter
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
    sample_rate: f64,
}

impl BiquadTDF2 {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            coeffs: BiquadCoeffs::bypass(),
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        }
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs, sample_rate: f64) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        }
    }

    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Set as lowpass filter
    pub fn set_lowpass(&mut self, freq: f64, q: f64) {
        self.coeffs = BiquadCoeffs::lowpass(freq, q, self.sample_rate);
    }

    /// Set as highpass filter
    pub fn set_highpass(&mut self, freq: f64, q: f64) {
        self.coeffs = BiquadCoeffs::highpass(freq, q, self.sample_rate);
    }

    /// Set as bandpass filter
    pub fn set_bandpass(&mut self, freq: f64, q: f64) {
        self.coeffs = BiquadCoeffs::bandpass(freq, q, self.sample_rate);
    }

    /// Set as band-reject filter
    pub fn set_band_reject(&mut self, freq: f64, q: f64) {
        self.coeffs = BiquadCoeffs::band_reject(freq, q, self.sample_rate);
    }

    /// Set as bypass
    pub fn set_bypass(&mut self) {
        self.coeffs = BiquadCoeffs::bypass();
    }

    /// Flush denormal state to zero
    #[inline]
    pub fn sanitize(&mut self) {
        self.z1 = flush_denormal(self.z1);
        self.z2 = flush_denormal(self.z2);
    }

    #[inline]
    pub fn is_quiet(&self) -> bool {
        self.z1 == 0.0 && self.z2 == 0.0
    }
}

impl Processor for BiquadTDF2 {
    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

impl MonoProcessor for BiquadTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }
}

impl ProcessorConfig for BiquadTDF2 {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }
}

/// Fixed-capacity cascade of identical biquad stages
///
/// Cascading N copies of a 12 dB/oct section yields 12*N dB/oct; the
/// composed response is the product of the stage responses.
#[derive(Debug, Clone)]
pub struct BiquadCascade {
    stages: [BiquadDF1; MAX_STAGES],
    num_stages: usize,
}

impl BiquadCascade {
    pub fn new(num_stages: usize) -> Self {
        Self {
            stages: Default::default(),
            num_stages: num_stages.clamp(1, MAX_STAGES),
        }
    }

    pub fn set_num_stages(&mut self, num_stages: usize) {
        self.num_stages = num_stages.clamp(1, MAX_STAGES);
    }

    #[inline]
    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        for stage in &mut self.stages[..self.num_stages] {
            stage.set_coeffs(coeffs);
        }
    }

    /// Composed complex response (product over active stages)
    pub fn response_at(&self, freq: f64, sample_rate: f64) -> Complex64 {
        self.stages[..self.num_stages]
            .iter()
            .map(|s| s.coeffs().response_at(freq, sample_rate))
            .product()
    }

    /// Composed linear gain at `freq`
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        self.response_at(freq, sample_rate).norm()
    }

    #[inline]
    pub fn sanitize(&mut self) {
        for stage in &mut self.stages[..self.num_stages] {
            stage.sanitize();
        }
    }
}

impl Processor for BiquadCascade {
    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

impl MonoProcessor for BiquadCascade {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let mut signal = input;
        for stage in &mut self.stages[..self.num_stages] {
            signal = stage.process_sample(signal);
        }
        signal
    }
}
