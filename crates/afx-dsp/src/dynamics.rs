//! Dynamics gain computation: the curve engine shared by compressors,
//! gates, and expanders
//!
//! A detector (peak or RMS, optionally fed from an external sidechain)
//! drives an asymmetric one-pole envelope; the envelope level is mapped
//! through a static soft-knee curve to a time-varying linear gain. Both
//! channels always receive the same gain when stereo-linked, preserving
//! the stereo image.

use afx_core::{Sample, db_to_gain, flush_denormal, gain_to_db};
use serde::{Deserialize, Serialize};

use crate::{Processor, ProcessorConfig};

/// Detector level estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Smoothed squared magnitude
    #[default]
    Rms,
    /// Absolute sample value
    Peak,
}

/// How per-channel detector inputs combine before the curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StereoLink {
    #[default]
    Average,
    Max,
}

#[inline]
fn envelope_coeff(ms: f64, sample_rate: f64) -> f64 {
    (-1.0 / (ms * 0.001 * sample_rate)).exp()
}

#[inline]
fn combine(link: StereoLink, left: Sample, right: Sample) -> f64 {
    match link {
        StereoLink::Average => (left.abs() + right.abs()) * 0.5,
        StereoLink::Max => left.abs().max(right.abs()),
    }
}

/// Compressor static curve parameters, all in the dB domain
#[derive(Debug, Clone, Copy)]
struct CurveParams {
    threshold_db: f64,
    ratio: f64,
    knee_db: f64,
}

impl CurveParams {
    /// Downward-compression gain in dB for detector level `level_db`.
    ///
    /// Zero below the knee, quadratic inside it, `(1/ratio - 1)(L - T)`
    /// above. Value and first derivative are continuous at both knee
    /// edges; a zero-width knee degenerates to the hard curve.
    #[inline]
    fn compressor_gain_db(&self, level_db: f64) -> f64 {
        let half_knee = self.knee_db * 0.5;
        let slope = 1.0 / self.ratio - 1.0;
        if level_db <= self.threshold_db - half_knee {
            0.0
        } else if self.knee_db > 0.0 && level_db < self.threshold_db + half_knee {
            let x = level_db - self.threshold_db + half_knee;
            slope * x * x / (2.0 * self.knee_db)
        } else {
            slope * (level_db - self.threshold_db)
        }
    }

    /// Downward-expansion gain in dB: attenuates *below* the threshold
    /// with slope `ratio - 1`, mirrored quadratic knee.
    #[inline]
    fn expander_gain_db(&self, level_db: f64) -> f64 {
        let half_knee = self.knee_db * 0.5;
        let slope = self.ratio - 1.0;
        if level_db >= self.threshold_db + half_knee {
            0.0
        } else if self.knee_db > 0.0 && level_db > self.threshold_db - half_knee {
            let x = self.threshold_db + half_knee - level_db;
            -slope * x * x / (2.0 * self.knee_db)
        } else {
            (level_db - self.threshold_db) * slope
        }
    }
}

/// The gain-reduction engine used by the compressor family
#[derive(Debug, Clone)]
pub struct GainReduction {
    // Parameters
    attack_ms: f64,
    release_ms: f64,
    curve: CurveParams,
    makeup_db: f64,
    detection: DetectionMode,
    link: StereoLink,

    // Cached old values; the curve-dependent derivations only rerun when
    // a driving parameter actually moved
    old_threshold_db: f64,
    old_ratio: f64,
    old_knee_db: f64,

    // Derived
    attack_coeff: f64,
    release_coeff: f64,
    makeup_gain: f64,

    // State
    envelope: f64,
    reduction_gain: f64,
    meter_out: f64,
    curve_changed: bool,

    sample_rate: f64,
}

impl GainReduction {
    pub fn new(sample_rate: f64) -> Self {
        let mut gr = Self {
            attack_ms: 10.0,
            release_ms: 100.0,
            curve: CurveParams {
                threshold_db: -20.0,
                ratio: 4.0,
                knee_db: 6.0,
            },
            makeup_db: 0.0,
            detection: DetectionMode::default(),
            link: StereoLink::default(),
            old_threshold_db: f64::NAN,
            old_ratio: f64::NAN,
            old_knee_db: f64::NAN,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            makeup_gain: 1.0,
            envelope: 0.0,
            reduction_gain: 1.0,
            meter_out: 0.0,
            curve_changed: true,
            sample_rate,
        };
        gr.update_coeffs();
        gr
    }

    /// Set all parameters. Out-of-range values clamp; nothing is rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn set_params(
        &mut self,
        attack_ms: f64,
        release_ms: f64,
        threshold_db: f64,
        ratio: f64,
        knee_db: f64,
        makeup_db: f64,
        detection: DetectionMode,
        link: StereoLink,
    ) {
        self.attack_ms = attack_ms.clamp(0.01, 500.0);
        self.release_ms = release_ms.clamp(1.0, 5000.0);
        self.curve.threshold_db = threshold_db.clamp(-60.0, 0.0);
        self.curve.ratio = ratio.clamp(1.0, 100.0);
        self.curve.knee_db = knee_db.clamp(0.0, 24.0);
        self.makeup_db = makeup_db.clamp(-24.0, 24.0);
        self.detection = detection;
        self.link = link;

        if self.curve.threshold_db != self.old_threshold_db
            || self.curve.ratio != self.old_ratio
            || self.curve.knee_db != self.old_knee_db
        {
            self.old_threshold_db = self.curve.threshold_db;
            self.old_ratio = self.curve.ratio;
            self.old_knee_db = self.curve.knee_db;
            self.curve_changed = true;
        }
        self.update_coeffs();
    }

    fn update_coeffs(&mut self) {
        self.attack_coeff = envelope_coeff(self.attack_ms, self.sample_rate);
        self.release_coeff = envelope_coeff(self.release_ms, self.sample_rate);
        self.makeup_gain = db_to_gain(self.makeup_db);
    }

    /// True once after the static curve changed; the GUI polls this to
    /// know when to redraw the transfer graph
    pub fn take_curve_changed(&mut self) -> bool {
        std::mem::take(&mut self.curve_changed)
    }

    /// Static-curve gain (linear) at a detector level in dB; used by the
    /// external graph renderer so it never duplicates the curve math
    pub fn gain_at(&self, level_db: f64) -> f64 {
        db_to_gain(self.curve.compressor_gain_db(level_db))
    }

    /// Process one stereo frame. `sidechain` substitutes an external
    /// detector pair for the main signal.
    pub fn process(
        &mut self,
        left: Sample,
        right: Sample,
        sidechain: Option<(Sample, Sample)>,
    ) -> (Sample, Sample) {
        let (det_l, det_r) = sidechain.unwrap_or((left, right));
        let mut level = combine(self.link, det_l, det_r);
        if self.detection == DetectionMode::Rms {
            level *= level;
        }

        self.envelope = flush_denormal(self.envelope);
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = level + coeff * (self.envelope - level);

        let detected = match self.detection {
            DetectionMode::Rms => self.envelope.max(0.0).sqrt(),
            DetectionMode::Peak => self.envelope,
        };

        self.reduction_gain = if detected > 0.0 {
            db_to_gain(self.curve.compressor_gain_db(gain_to_db(detected)))
        } else {
            1.0
        };

        let gain = self.reduction_gain * self.makeup_gain;
        let out_l = left * gain;
        let out_r = right * gain;
        self.meter_out = out_l.abs().max(out_r.abs());
        (out_l, out_r)
    }

    /// Current gain reduction in dB (positive amount of reduction)
    pub fn current_reduction_db(&self) -> f64 {
        -gain_to_db(self.reduction_gain)
    }

    /// Current reduction as a linear multiplier
    #[inline]
    pub fn reduction_gain(&self) -> f64 {
        self.reduction_gain
    }

    /// Output level meter (peak of the last frame)
    #[inline]
    pub fn output_level(&self) -> f64 {
        self.meter_out
    }
}

impl Processor for GainReduction {
    fn reset(&mut self) {
        self.envelope = 0.0;
        self.reduction_gain = 1.0;
        self.meter_out = 0.0;
    }
}

impl ProcessorConfig for GainReduction {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.update_coeffs();
    }
}

/// Stereo linkage for the expander's detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpanderLink {
    Linked(StereoLink),
    /// Independent per-channel envelopes and gains
    Unlinked,
}

impl Default for ExpanderLink {
    fn default() -> Self {
        Self::Linked(StereoLink::Average)
    }
}

/// Downward expander / gate gain engine
///
/// The inverse of [`GainReduction`]: attenuates below the threshold, with
/// a `range_db` floor bounding the maximum attenuation (the gate depth).
#[derive(Debug, Clone)]
pub struct Expander {
    attack_ms: f64,
    release_ms: f64,
    curve: CurveParams,
    makeup_db: f64,
    range_db: f64,
    detection: DetectionMode,
    link: ExpanderLink,

    attack_coeff: f64,
    release_coeff: f64,
    makeup_gain: f64,
    range_gain: f64,

    envelope_l: f64,
    envelope_r: f64,
    reduction_gain: f64,
    meter_out: f64,

    sample_rate: f64,
}

impl Expander {
    pub fn new(sample_rate: f64) -> Self {
        let mut exp = Self {
            attack_ms: 5.0,
            release_ms: 100.0,
            curve: CurveParams {
                threshold_db: -40.0,
                ratio: 2.0,
                knee_db: 6.0,
            },
            makeup_db: 0.0,
            range_db: -60.0,
            detection: DetectionMode::default(),
            link: ExpanderLink::default(),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            makeup_gain: 1.0,
            range_gain: 0.001,
            envelope_l: 0.0,
            envelope_r: 0.0,
            reduction_gain: 1.0,
            meter_out: 0.0,
            sample_rate,
        };
        exp.update_coeffs();
        exp
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_params(
        &mut self,
        attack_ms: f64,
        release_ms: f64,
        threshold_db: f64,
        ratio: f64,
        knee_db: f64,
        makeup_db: f64,
        range_db: f64,
        detection: DetectionMode,
        link: ExpanderLink,
    ) {
        self.attack_ms = attack_ms.clamp(0.01, 500.0);
        self.release_ms = release_ms.clamp(1.0, 5000.0);
        self.curve.threshold_db = threshold_db.clamp(-80.0, 0.0);
        self.curve.ratio = ratio.clamp(1.0, 100.0);
        self.curve.knee_db = knee_db.clamp(0.0, 24.0);
        self.makeup_db = makeup_db.clamp(-24.0, 24.0);
        self.range_db = range_db.clamp(-96.0, 0.0);
        self.detection = detection;
        self.link = link;
        self.update_coeffs();
    }

    fn update_coeffs(&mut self) {
        self.attack_coeff = envelope_coeff(self.attack_ms, self.sample_rate);
        self.release_coeff = envelope_coeff(self.release_ms, self.sample_rate);
        self.makeup_gain = db_to_gain(self.makeup_db);
        self.range_gain = db_to_gain(self.range_db);
    }

    #[inline]
    fn track(&self, envelope: f64, level: f64) -> f64 {
        let coeff = if level > envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        level + coeff * (envelope - level)
    }

    #[inline]
    fn gain_for(&self, envelope: f64) -> f64 {
        let detected = match self.detection {
            DetectionMode::Rms => envelope.max(0.0).sqrt(),
            DetectionMode::Peak => envelope,
        };
        if detected > 0.0 {
            db_to_gain(self.curve.expander_gain_db(gain_to_db(detected))).max(self.range_gain)
        } else {
            self.range_gain
        }
    }

    /// Static-curve gain (linear) at a detector level in dB, with the
    /// range floor applied; GUI graph query
    pub fn gain_at(&self, level_db: f64) -> f64 {
        db_to_gain(self.curve.expander_gain_db(level_db)).max(self.range_gain)
    }

    pub fn process(
        &mut self,
        left: Sample,
        right: Sample,
        sidechain: Option<(Sample, Sample)>,
    ) -> (Sample, Sample) {
        let (det_l, det_r) = sidechain.unwrap_or((left, right));

        let (gain_l, gain_r) = match self.link {
            ExpanderLink::Linked(link) => {
                let mut level = combine(link, det_l, det_r);
                if self.detection == DetectionMode::Rms {
                    level *= level;
                }
                self.envelope_l = flush_denormal(self.envelope_l);
                self.envelope_l = self.track(self.envelope_l, level);
                let gain = self.gain_for(self.envelope_l);
                (gain, gain)
            }
            ExpanderLink::Unlinked => {
                let mut level_l = det_l.abs();
                let mut level_r = det_r.abs();
                if self.detection == DetectionMode::Rms {
                    level_l *= level_l;
                    level_r *= level_r;
                }
                self.envelope_l = flush_denormal(self.envelope_l);
                self.envelope_r = flush_denormal(self.envelope_r);
                self.envelope_l = self.track(self.envelope_l, level_l);
                self.envelope_r = self.track(self.envelope_r, level_r);
                (self.gain_for(self.envelope_l), self.gain_for(self.envelope_r))
            }
        };

        self.reduction_gain = gain_l;
        let out_l = left * gain_l * self.makeup_gain;
        let out_r = right * gain_r * self.makeup_gain;
        self.meter_out = out_l.abs().max(out_r.abs());
        (out_l, out_r)
    }

    /// Current attenuation in dB (positive amount)
    pub fn current_reduction_db(&self) -> f64 {
        -gain_to_db(self.reduction_gain)
    }

    #[inline]
    pub fn reduction_gain(&self) -> f64 {
        self.reduction_gain
    }

    #[inline]
    pub fn output_level(&self) -> f64 {
        self.meter_out
    }
}

impl Processor for Expander {
    fn reset(&mut self) {
        self.envelope_l = 0.0;
        self.envelope_r = 0.0;
        self.reduction_gain = 1.0;
        self.meter_out = 0.0;
    }
}

impl ProcessorConfig for Expander {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.update_coeffs();
    }
}
