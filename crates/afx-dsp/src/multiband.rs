//! Multiband dynamics: a crossover bank fanning into per-band processors
//!
//! The [`CrossoverBank`] splits the signal into phase-aligned bands; each
//! band hosts its own gain-reduction or lookahead-limiter instance, and
//! the bands are recombined by summation. The multiband limiter runs a
//! broadband limiter across the recombined signal as a final safety
//! ceiling, the way the original does.

use afx_core::{Sample, db_to_gain};

use crate::crossover::{CrossoverAlignment, CrossoverBank, MAX_BANDS};
use crate::dynamics::{DetectionMode, GainReduction, StereoLink};
use crate::limiter::LookaheadLimiter;
use crate::{Processor, ProcessorConfig, StereoProcessor};

/// Multiband compressor: one [`GainReduction`] strip per band
pub struct MultibandCompressor {
    bank: CrossoverBank,
    strips: Vec<GainReduction>,
    solo: [bool; MAX_BANDS],
    mute: [bool; MAX_BANDS],
    bands: usize,
    output_gain_db: f64,
    meter_in: f64,
    meter_out: f64,
}

impl MultibandCompressor {
    pub fn new(sample_rate: f64, bands: usize) -> Self {
        let bands = bands.clamp(2, MAX_BANDS);
        let mut bank = CrossoverBank::new(sample_rate);
        bank.configure(bands, &[], CrossoverAlignment::Lr4, sample_rate);
        Self {
            bank,
            strips: (0..bands).map(|_| GainReduction::new(sample_rate)).collect(),
            solo: [false; MAX_BANDS],
            mute: [false; MAX_BANDS],
            bands,
            output_gain_db: 0.0,
            meter_in: 0.0,
            meter_out: 0.0,
        }
    }

    #[inline]
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Move a crossover edge; returns the frequency actually applied
    pub fn set_crossover(&mut self, edge: usize, freq: f64) -> f64 {
        self.bank.set_frequency(edge, freq)
    }

    pub fn set_alignment(&mut self, alignment: CrossoverAlignment) {
        self.bank.set_alignment(alignment);
    }

    /// Per-band compressor parameters
    #[allow(clippy::too_many_arguments)]
    pub fn set_band_params(
        &mut self,
        band: usize,
        attack_ms: f64,
        release_ms: f64,
        threshold_db: f64,
        ratio: f64,
        knee_db: f64,
        makeup_db: f64,
        detection: DetectionMode,
        link: StereoLink,
    ) {
        if let Some(strip) = self.strips.get_mut(band) {
            strip.set_params(
                attack_ms,
                release_ms,
                threshold_db,
                ratio,
                knee_db,
                makeup_db,
                detection,
                link,
            );
        }
    }

    pub fn set_solo(&mut self, band: usize, solo: bool) {
        if band < self.bands {
            self.solo[band] = solo;
        }
    }

    pub fn set_mute(&mut self, band: usize, mute: bool) {
        if band < self.bands {
            self.mute[band] = mute;
        }
    }

    pub fn set_output_gain(&mut self, db: f64) {
        self.output_gain_db = db.clamp(-24.0, 24.0);
    }

    pub fn strip(&self, band: usize) -> Option<&GainReduction> {
        self.strips.get(band)
    }

    pub fn strip_mut(&mut self, band: usize) -> Option<&mut GainReduction> {
        self.strips.get_mut(band)
    }

    /// Per-band gain reduction in dB for metering
    pub fn reductions_db(&self) -> Vec<f64> {
        self.strips.iter().map(|s| s.current_reduction_db()).collect()
    }

    /// Band isolation gain at `freq` (graph query, delegates to the bank)
    pub fn magnitude_at(&self, band: usize, freq: f64) -> f64 {
        self.bank.magnitude_at(band, freq)
    }

    #[inline]
    pub fn input_level(&self) -> f64 {
        self.meter_in
    }

    #[inline]
    pub fn output_level(&self) -> f64 {
        self.meter_out
    }
}

impl Processor for MultibandCompressor {
    fn reset(&mut self) {
        self.bank.reset();
        for strip in &mut self.strips {
            strip.reset();
        }
        self.meter_in = 0.0;
        self.meter_out = 0.0;
    }
}

impl StereoProcessor for MultibandCompressor {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        self.meter_in = left.abs().max(right.abs());
        self.bank.process(left, right);

        let any_solo = self.solo[..self.bands].iter().any(|&s| s);
        let mut out_l = 0.0;
        let mut out_r = 0.0;

        for band in 0..self.bands {
            let band_l = self.bank.band_output(0, band);
            let band_r = self.bank.band_output(1, band);
            let (proc_l, proc_r) = self.strips[band].process(band_l, band_r, None);

            if self.mute[band] || (any_solo && !self.solo[band]) {
                continue;
            }
            out_l += proc_l;
            out_r += proc_r;
        }

        let gain = db_to_gain(self.output_gain_db);
        out_l *= gain;
        out_r *= gain;
        self.meter_out = out_l.abs().max(out_r.abs());
        (out_l, out_r)
    }
}

impl ProcessorConfig for MultibandCompressor {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.bank.set_sample_rate(sample_rate);
        for strip in &mut self.strips {
            strip.set_sample_rate(sample_rate);
        }
    }
}

/// Metering snapshot polled by the GUI once per frame
#[derive(Debug, Clone, Copy)]
pub struct MultibandLimiterMeters {
    /// Per-band minimum attenuation since the last poll, scaled by the
    /// broadband attenuation (1.0 = none)
    pub band_attenuation: [f64; MAX_BANDS],
    /// Broadband minimum attenuation since the last poll
    pub broadband_attenuation: f64,
    /// ASC engaged anywhere since the last poll
    pub asc_active: bool,
}

/// Multiband limiter: a lookahead limiter per band plus a broadband
/// limiter over the recombined signal
pub struct MultibandLimiter {
    bank: CrossoverBank,
    strips: Vec<LookaheadLimiter>,
    broadband: LookaheadLimiter,
    solo: [bool; MAX_BANDS],
    release_offset: [f64; MAX_BANDS],
    weight_offset: [f64; MAX_BANDS],
    bands: usize,

    limit: f64,
    attack_ms: f64,
    release_ms: f64,
    asc_enabled: bool,
    asc_coeff: f64,
}

impl MultibandLimiter {
    pub fn new(sample_rate: f64, bands: usize) -> Self {
        let bands = bands.clamp(2, MAX_BANDS);
        let mut bank = CrossoverBank::new(sample_rate);
        bank.configure(bands, &[], CrossoverAlignment::Lr4, sample_rate);
        let mut limiter = Self {
            bank,
            strips: (0..bands).map(|_| LookaheadLimiter::new(sample_rate)).collect(),
            broadband: LookaheadLimiter::new(sample_rate),
            solo: [false; MAX_BANDS],
            release_offset: [0.0; MAX_BANDS],
            weight_offset: [0.0; MAX_BANDS],
            bands,
            limit: 1.0,
            attack_ms: 5.0,
            release_ms: 50.0,
            asc_enabled: false,
            asc_coeff: 1.0,
        };
        limiter.apply_params();
        limiter
    }

    #[inline]
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Global limiter parameters, fanned out to every strip with the
    /// per-band release/weight offsets applied
    pub fn set_params(
        &mut self,
        limit: f64,
        attack_ms: f64,
        release_ms: f64,
        asc_enabled: bool,
        asc_coeff: f64,
    ) {
        self.limit = limit;
        self.attack_ms = attack_ms;
        self.release_ms = release_ms;
        self.asc_enabled = asc_enabled;
        self.asc_coeff = asc_coeff;
        self.apply_params();
    }

    /// Per-band release skew in [-1, 1]; the effective release is
    /// `release * 4^offset`
    pub fn set_band_release_offset(&mut self, band: usize, offset: f64) {
        if band < self.bands {
            self.release_offset[band] = offset.clamp(-1.0, 1.0);
            self.apply_params();
        }
    }

    /// Per-band ceiling skew in [-1, 1]; the band limit is scaled by
    /// `4^offset`
    pub fn set_band_weight(&mut self, band: usize, offset: f64) {
        if band < self.bands {
            self.weight_offset[band] = offset.clamp(-1.0, 1.0);
            self.strips[band].set_weight(0.25_f64.powf(-self.weight_offset[band]));
        }
    }

    /// Effective release time of one band in ms; exposed for the GUI
    pub fn effective_release(&self, band: usize) -> f64 {
        self.release_ms * 0.25_f64.powf(-self.release_offset[band])
    }

    pub fn set_solo(&mut self, band: usize, solo: bool) {
        if band < self.bands {
            self.solo[band] = solo;
        }
    }

    pub fn set_crossover(&mut self, edge: usize, freq: f64) -> f64 {
        self.bank.set_frequency(edge, freq)
    }

    fn apply_params(&mut self) {
        for band in 0..self.bands {
            let release = self.release_ms * 0.25_f64.powf(-self.release_offset[band]);
            self.strips[band].set_params(
                self.limit,
                self.attack_ms,
                release,
                self.asc_enabled,
                self.asc_coeff,
            );
            self.strips[band].set_weight(0.25_f64.powf(-self.weight_offset[band]));
        }
        self.broadband.set_params(
            self.limit,
            self.attack_ms,
            self.release_ms,
            self.asc_enabled,
            self.asc_coeff,
        );
    }

    /// Drain the metering state (per-band and broadband attenuation, ASC)
    pub fn meters(&mut self) -> MultibandLimiterMeters {
        let broadband_attenuation = self.broadband.attenuation();
        let mut band_attenuation = [1.0; MAX_BANDS];
        let mut asc_active = self.broadband.take_asc_active();
        for band in 0..self.bands {
            band_attenuation[band] = self.strips[band].attenuation() * broadband_attenuation;
            asc_active |= self.strips[band].take_asc_active();
        }
        MultibandLimiterMeters {
            band_attenuation,
            broadband_attenuation,
            asc_active,
        }
    }

    pub fn magnitude_at(&self, band: usize, freq: f64) -> f64 {
        self.bank.magnitude_at(band, freq)
    }
}

impl Processor for MultibandLimiter {
    fn reset(&mut self) {
        self.bank.reset();
        for strip in &mut self.strips {
            strip.reset();
        }
        self.broadband.reset();
    }

    fn latency(&self) -> usize {
        // per-band window plus the broadband window
        self.strips[0].latency() + self.broadband.latency()
    }
}

impl StereoProcessor for MultibandLimiter {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        self.bank.process(left, right);

        let any_solo = self.solo[..self.bands].iter().any(|&s| s);
        let mut sum_l = 0.0;
        let mut sum_r = 0.0;
        for band in 0..self.bands {
            let (band_l, band_r) = self.strips[band].process_sample(
                self.bank.band_output(0, band),
                self.bank.band_output(1, band),
            );
            if any_solo && !self.solo[band] {
                continue;
            }
            sum_l += band_l;
            sum_r += band_r;
        }

        self.broadband.process_sample(sum_l, sum_r)
    }
}

impl ProcessorConfig for MultibandLimiter {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.bank.set_sample_rate(sample_rate);
        for strip in &mut self.strips {
            strip.set_sample_rate(sample_rate);
        }
        self.broadband.set_sample_rate(sample_rate);
        self.apply_params();
    }
}
