//! Linkwitz-Riley crossover filter bank
//!
//! Splits a wide-band signal into up to [`MAX_BANDS`] frequency bands
//! that sum back to (approximately) the original when recombined at unity
//! gain. Each crossover edge is a low-pass/high-pass pair of cascaded RBJ
//! stages; bands are built recursively: band 0 is the low-pass output of
//! edge 0, the high-pass residue feeds edge 1, and so on.
//!
//! Per-band level/mute/phase/delay controls are applied after the split
//! so they never disturb the crossover design itself.

use afx_core::Sample;
use serde::{Deserialize, Serialize};

use crate::biquad::{BiquadCoeffs, BiquadDF1};
use crate::{MonoProcessor, Processor, ProcessorConfig};

/// Compile-time band capacity
pub const MAX_BANDS: usize = 8;

/// Stages per crossover edge at the steepest alignment
const MAX_FILTERS: usize = 4;

/// Per-band post-split delay capacity in samples
pub const MAX_BAND_DELAY: usize = 4800;

/// Frequency limits for crossover edges
const MIN_EDGE_HZ: f64 = 10.0;
const MAX_EDGE_HZ: f64 = 20000.0;

/// Default edge frequencies when the host does not supply any
const DEFAULT_EDGES: [f64; MAX_BANDS - 1] =
    [100.0, 250.0, 800.0, 2000.0, 4000.0, 8000.0, 12000.0];

/// Crossover alignment: how many cascaded stages per edge, and their Qs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrossoverAlignment {
    /// 12 dB/oct, one stage. Needs alternate-band polarity inversion for
    /// a flat sum (classic LR2 behavior).
    Lr2,
    /// 24 dB/oct, two Butterworth stages (phase-matched flat sum)
    #[default]
    Lr4,
    /// 48 dB/oct, four stages
    Lr8,
}

impl CrossoverAlignment {
    #[inline]
    pub fn filter_count(self) -> usize {
        match self {
            Self::Lr2 => 1,
            Self::Lr4 => 2,
            Self::Lr8 => 4,
        }
    }

    /// Q for cascade stage `index`
    #[inline]
    fn stage_q(self, index: usize) -> f64 {
        match self {
            Self::Lr2 => 0.5,
            Self::Lr4 => 0.7071,
            // two interleaved 4th-order Butterworth Q pairs
            Self::Lr8 => {
                if index % 2 == 0 {
                    0.54
                } else {
                    1.34
                }
            }
        }
    }
}

/// The crossover filter bank (stereo, up to [`MAX_BANDS`] bands)
pub struct CrossoverBank {
    bands: usize,
    alignment: CrossoverAlignment,
    freq: [f64; MAX_BANDS],
    active: [bool; MAX_BANDS],
    level: [f64; MAX_BANDS],
    invert: [bool; MAX_BANDS],
    delay_samples: [usize; MAX_BANDS],

    lp: [[[BiquadDF1; MAX_FILTERS]; MAX_BANDS]; 2],
    hp: [[[BiquadDF1; MAX_FILTERS]; MAX_BANDS]; 2],
    out: [[Sample; MAX_BANDS]; 2],

    // post-split delay rings, allocated at configure time only
    delay_buf: Vec<Sample>,
    delay_pos: usize,

    sample_rate: f64,
    warned_capacity: bool,
}

impl CrossoverBank {
    pub fn new(sample_rate: f64) -> Self {
        let mut bank = Self {
            bands: 2,
            alignment: CrossoverAlignment::default(),
            freq: [0.0; MAX_BANDS],
            active: [true; MAX_BANDS],
            level: [1.0; MAX_BANDS],
            invert: [false; MAX_BANDS],
            delay_samples: [0; MAX_BANDS],
            lp: [[[BiquadDF1::default(); MAX_FILTERS]; MAX_BANDS]; 2],
            hp: [[[BiquadDF1::default(); MAX_FILTERS]; MAX_BANDS]; 2],
            out: [[0.0; MAX_BANDS]; 2],
            delay_buf: vec![0.0; MAX_BAND_DELAY * MAX_BANDS * 2],
            delay_pos: 0,
            sample_rate,
            warned_capacity: false,
        };
        bank.configure(2, &[], CrossoverAlignment::default(), sample_rate);
        bank
    }

    /// (Re)configure the bank. A band count beyond the fixed capacity is
    /// clamped and reported once; audio keeps flowing either way.
    pub fn configure(
        &mut self,
        bands: usize,
        edge_freqs: &[f64],
        alignment: CrossoverAlignment,
        sample_rate: f64,
    ) {
        if bands > MAX_BANDS && !self.warned_capacity {
            log::warn!(
                "crossover band count {bands} exceeds capacity {MAX_BANDS}; clamping"
            );
            self.warned_capacity = true;
        }
        self.bands = bands.clamp(2, MAX_BANDS);
        self.alignment = alignment;
        self.sample_rate = sample_rate;

        for band in 0..self.bands {
            self.active[band] = true;
            self.level[band] = 1.0;
            self.invert[band] = false;
            self.delay_samples[band] = 0;
        }
        self.out = [[0.0; MAX_BANDS]; 2];
        // seed ascending edges, then apply (clamped) host frequencies
        for edge in 0..self.bands - 1 {
            self.freq[edge] = DEFAULT_EDGES[edge];
        }
        for (edge, &f) in edge_freqs.iter().enumerate().take(self.bands - 1) {
            self.freq[edge] = f.clamp(MIN_EDGE_HZ, MAX_EDGE_HZ);
        }
        for edge in 0..self.bands - 1 {
            self.rebuild_edge(edge);
        }
        self.reset();
    }

    #[inline]
    pub fn bands(&self) -> usize {
        self.bands
    }

    #[inline]
    pub fn alignment(&self) -> CrossoverAlignment {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: CrossoverAlignment) {
        if self.alignment == alignment {
            return;
        }
        self.alignment = alignment;
        for edge in 0..self.bands - 1 {
            self.rebuild_edge(edge);
        }
    }

    /// Move a crossover edge. The frequency is kept between its
    /// neighbours and inside [10 Hz, 20 kHz]; returns the value actually
    /// applied. No-op (and no filter rebuild) when nothing changed.
    pub fn set_frequency(&mut self, edge: usize, freq: f64) -> f64 {
        if edge >= self.bands - 1 {
            return 0.0;
        }
        let mut f = freq;
        if edge > 0 {
            f = f.max(self.freq[edge - 1] * 1.1);
        }
        if edge + 1 < self.bands - 1 {
            f = f.min(self.freq[edge + 1] * 0.9);
        }
        f = f.clamp(MIN_EDGE_HZ, MAX_EDGE_HZ);
        if self.freq[edge] == f {
            return f;
        }
        self.freq[edge] = f;
        self.rebuild_edge(edge);
        f
    }

    #[inline]
    pub fn frequency(&self, edge: usize) -> f64 {
        self.freq[edge]
    }

    fn rebuild_edge(&mut self, edge: usize) {
        let count = self.alignment.filter_count();
        for stage in 0..count {
            let q = self.alignment.stage_q(stage);
            let lp = BiquadCoeffs::lowpass(self.freq[edge], q, self.sample_rate);
            let hp = BiquadCoeffs::highpass(self.freq[edge], q, self.sample_rate);
            for ch in 0..2 {
                self.lp[ch][edge][stage].set_coeffs(lp);
                self.hp[ch][edge][stage].set_coeffs(hp);
            }
        }
    }

    pub fn set_active(&mut self, band: usize, active: bool) {
        if band < self.bands {
            self.active[band] = active;
        }
    }

    pub fn set_level(&mut self, band: usize, level: f64) {
        if band < self.bands {
            self.level[band] = level.clamp(0.0, 4.0);
        }
    }

    pub fn set_invert(&mut self, band: usize, invert: bool) {
        if band < self.bands {
            self.invert[band] = invert;
        }
    }

    /// Post-split alignment delay for one band, in samples
    pub fn set_delay(&mut self, band: usize, samples: usize) {
        if band >= self.bands {
            return;
        }
        if samples >= MAX_BAND_DELAY && !self.warned_capacity {
            log::warn!(
                "band delay {samples} exceeds capacity {MAX_BAND_DELAY}; clamping"
            );
            self.warned_capacity = true;
        }
        self.delay_samples[band] = samples.min(MAX_BAND_DELAY - 1);
    }

    #[inline]
    fn delay_slot(&self, ch: usize, band: usize, offset: usize) -> usize {
        ((band * 2 + ch) * MAX_BAND_DELAY) + offset
    }

    /// Split one stereo frame into the band outputs.
    ///
    /// Band b is the low-pass of edge b applied to the running high-pass
    /// residue; the final band is the remaining residue. Filter state is
    /// flushed of denormals as it goes.
    pub fn process(&mut self, left: Sample, right: Sample) {
        let count = self.alignment.filter_count();
        let input = [left, right];
        for ch in 0..2 {
            let mut residue = input[ch];
            for edge in 0..self.bands - 1 {
                let mut band_out = residue;
                for stage in 0..count {
                    band_out = self.lp[ch][edge][stage].process_sample(band_out);
                    self.lp[ch][edge][stage].sanitize();
                    residue = self.hp[ch][edge][stage].process_sample(residue);
                    self.hp[ch][edge][stage].sanitize();
                }
                self.out[ch][edge] = band_out;
            }
            self.out[ch][self.bands - 1] = residue;

            for band in 0..self.bands {
                let mut v = self.out[ch][band];
                if !self.active[band] {
                    v = 0.0;
                }
                if self.invert[band] {
                    v = -v;
                }
                v *= self.level[band];
                if self.delay_samples[band] > 0 {
                    let write = self.delay_slot(ch, band, self.delay_pos % MAX_BAND_DELAY);
                    let read_off =
                        (self.delay_pos + MAX_BAND_DELAY - self.delay_samples[band])
                            % MAX_BAND_DELAY;
                    let read = self.delay_slot(ch, band, read_off);
                    self.delay_buf[write] = v;
                    v = self.delay_buf[read];
                }
                self.out[ch][band] = v;
            }
        }
        self.delay_pos = (self.delay_pos + 1) % MAX_BAND_DELAY;
    }

    /// Band output for the last processed frame (`ch`: 0 = left)
    #[inline]
    pub fn band_output(&self, ch: usize, band: usize) -> Sample {
        self.out[ch][band]
    }

    /// Sum of all band outputs for the last processed frame
    pub fn recombined(&self, ch: usize) -> Sample {
        self.out[ch][..self.bands].iter().sum()
    }

    /// Complex response of one band's isolation path at `freq`,
    /// including level, polarity, and mute (delay excluded). The complex
    /// sum over all bands is what the response-graph collaborator plots
    /// as the recombined curve.
    pub fn response_at(&self, band: usize, freq: f64) -> num_complex::Complex64 {
        use num_complex::Complex64;
        if band >= self.bands || !self.active[band] {
            return Complex64::new(0.0, 0.0);
        }
        let count = self.alignment.filter_count();
        let mut response = Complex64::new(1.0, 0.0);
        if band < self.bands - 1 {
            for stage in 0..count {
                response *= self.lp[0][band][stage]
                    .coeffs()
                    .response_at(freq, self.sample_rate);
            }
        }
        for edge in 0..band {
            for stage in 0..count {
                response *= self.hp[0][edge][stage]
                    .coeffs()
                    .response_at(freq, self.sample_rate);
            }
        }
        let sign = if self.invert[band] { -1.0 } else { 1.0 };
        response * self.level[band] * sign
    }

    /// Linear gain of one band's isolation filters at `freq`, including
    /// the band level. Used by the response-graph collaborator.
    pub fn magnitude_at(&self, band: usize, freq: f64) -> f64 {
        if band >= self.bands {
            return 0.0;
        }
        let count = self.alignment.filter_count();
        let mut gain = 1.0;
        if band < self.bands - 1 {
            for stage in 0..count {
                gain *= self.lp[0][band][stage]
                    .coeffs()
                    .magnitude_at(freq, self.sample_rate);
            }
        }
        for edge in 0..band {
            for stage in 0..count {
                gain *= self.hp[0][edge][stage]
                    .coeffs()
                    .magnitude_at(freq, self.sample_rate);
            }
        }
        gain * self.level[band]
    }
}

impl ProcessorConfig for CrossoverBank {
    /// Idempotent; rebuilds every edge design for the new rate and clears
    /// all filter state
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for edge in 0..self.bands - 1 {
            self.rebuild_edge(edge);
        }
        self.reset();
    }
}

impl Processor for CrossoverBank {
    fn reset(&mut self) {
        for ch in 0..2 {
            for edge in 0..MAX_BANDS {
                for stage in 0..MAX_FILTERS {
                    self.lp[ch][edge][stage].reset();
                    self.hp[ch][edge][stage].reset();
                }
            }
        }
        self.out = [[0.0; MAX_BANDS]; 2];
        self.delay_buf.fill(0.0);
        self.delay_pos = 0;
    }
}
