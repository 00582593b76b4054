//! Lookahead brickwall limiter with automatic sustain control (ASC)
//!
//! The un-attenuated signal sits in a fixed-length delay buffer while a
//! peak detector scans the same window ahead of the output position, so
//! gain comes down *before* a transient reaches the output. Upcoming
//! peaks are kept in a small schedule ring; the steepest required
//! attenuation ramp always wins and obsolete entries are dropped when a
//! newer peak dominates them.
//!
//! ASC watches the average level of peaks above the limit. While it is
//! engaged, release walks toward the attenuation that average would need
//! instead of all the way back to unity, trading transient loudness for a
//! calmer gain ride during long loud passages.

use afx_core::{Sample, flush_denormal};

use crate::{Processor, ProcessorConfig, StereoProcessor};

/// Upper bound on the lookahead window in seconds; the delay buffer is
/// sized for this at construction and never resized in the hot path
pub const MAX_LOOKAHEAD_S: f64 = 0.1;

/// Attenuation floor; reaching it means the attack was shortened under a
/// peak that is still in flight
const ATT_FLOOR: f64 = 1e-13;

/// Limiter state for diagnostics/metering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterStage {
    Idle,
    Attenuating,
    Releasing,
}

/// Lookahead limiter for one stereo channel group
#[derive(Debug, Clone)]
pub struct LookaheadLimiter {
    // Parameters
    limit: f64,
    attack_s: f64,
    release_s: f64,
    auto_release: bool,
    asc_coeff: f64,
    weight: f64,

    // Delay line (capacity fixed, active length follows the attack time)
    buf_l: Vec<Sample>,
    buf_r: Vec<Sample>,
    frames: usize,
    pos: usize,

    // Pending-peak schedule ring
    next_pos: Vec<i64>,
    next_delta: Vec<f64>,
    next_len: usize,
    next_iter: usize,

    // Attenuation state
    att: f64,
    att_min: f64,
    delta: f64,

    // ASC accumulator
    asc: f64,
    asc_count: u32,
    asc_pos: i64,
    asc_changed: bool,
    asc_active: bool,

    sanitizing: bool,
    saw_invalid_input: bool,
    sample_rate: f64,
}

impl LookaheadLimiter {
    pub fn new(sample_rate: f64) -> Self {
        let capacity = (sample_rate * MAX_LOOKAHEAD_S) as usize + 1;
        let mut limiter = Self {
            limit: 1.0,
            attack_s: 0.005,
            release_s: 0.05,
            auto_release: false,
            asc_coeff: 1.0,
            weight: 1.0,
            buf_l: vec![0.0; capacity],
            buf_r: vec![0.0; capacity],
            frames: 2,
            pos: 0,
            next_pos: vec![-1; capacity],
            next_delta: vec![0.0; capacity],
            next_len: 0,
            next_iter: 0,
            att: 1.0,
            att_min: 1.0,
            delta: 0.0,
            asc: 0.0,
            asc_count: 0,
            asc_pos: -1,
            asc_changed: false,
            asc_active: false,
            sanitizing: false,
            saw_invalid_input: false,
            sample_rate,
        };
        limiter.reset();
        limiter
    }

    /// Set all parameters. `limit` is a linear amplitude ceiling; an
    /// attack change rebuilds the active window and mutes output for one
    /// buffer pass while stale samples flush out.
    pub fn set_params(
        &mut self,
        limit: f64,
        attack_ms: f64,
        release_ms: f64,
        asc_enabled: bool,
        asc_coeff: f64,
    ) {
        self.limit = limit.clamp(0.03125, 1.0);
        self.release_s = (release_ms.clamp(1.0, 1000.0)) / 1000.0;
        self.auto_release = asc_enabled;
        self.asc_coeff = asc_coeff.clamp(0.25, 4.0);

        let attack_s = (attack_ms.clamp(0.1, MAX_LOOKAHEAD_S * 1000.0)) / 1000.0;
        if attack_s != self.attack_s {
            self.attack_s = attack_s;
            self.reset();
        }
    }

    /// Effective-limit multiplier used by the multiband strips
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight.clamp(0.0625, 4.0);
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Instantaneous attenuation (1.0 = none)
    #[inline]
    pub fn current_attenuation(&self) -> f64 {
        self.att
    }

    /// Minimum attenuation since the last call (metering); resets the
    /// window
    pub fn attenuation(&mut self) -> f64 {
        let a = self.att_min;
        self.att_min = 1.0;
        a
    }

    /// One-shot ASC indicator for the host LED
    pub fn take_asc_active(&mut self) -> bool {
        std::mem::take(&mut self.asc_active)
    }

    /// One-shot flag: a NaN/Inf input was replaced with silence since the
    /// last poll. The hot path only sets a bool; surfacing the warning is
    /// the collaborator's job.
    pub fn take_invalid_input(&mut self) -> bool {
        std::mem::take(&mut self.saw_invalid_input)
    }

    /// Current limiter stage
    pub fn stage(&self) -> LimiterStage {
        if self.delta < 0.0 {
            LimiterStage::Attenuating
        } else if self.delta > 0.0 {
            LimiterStage::Releasing
        } else {
            LimiterStage::Idle
        }
    }

    fn reset_asc(&mut self) {
        self.asc = 0.0;
        self.asc_count = 0;
        self.asc_pos = self.pos as i64;
        self.asc_changed = true;
    }

    /// Release delta toward unity, or toward the ASC average-peak
    /// attenuation when that walk is gentler (floored at a tenth of the
    /// plain release so the limiter always lets go eventually)
    fn release_delta(&mut self, att: f64, use_asc: bool) -> f64 {
        let rdelta = (1.0 - att) / (self.sample_rate * self.release_s);
        if use_asc && self.auto_release && self.asc_count > 0 && self.asc > 0.0 {
            let avg_att = (self.limit * self.weight) / (self.asc_coeff * self.asc)
                * self.asc_count as f64;
            if avg_att > att {
                let alt =
                    ((avg_att - att) / (self.sample_rate * self.release_s)).max(rdelta / 10.0);
                if alt < rdelta {
                    self.asc_active = true;
                    return alt;
                }
            }
        }
        rdelta
    }

    #[inline]
    fn frame_peak(&self, index: usize) -> f64 {
        self.buf_l[index].abs().max(self.buf_r[index].abs())
    }
}

impl Processor for LookaheadLimiter {
    fn reset(&mut self) {
        self.frames = ((self.sample_rate * self.attack_s) as usize).max(2);
        self.sanitizing = true;
        self.pos = 0;
        self.next_pos[0] = -1;
        self.next_len = 0;
        self.next_iter = 0;
        self.delta = 0.0;
        self.att = 1.0;
        self.reset_asc();
    }

    fn latency(&self) -> usize {
        self.frames - 1
    }
}

impl StereoProcessor for LookaheadLimiter {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        // numerically invalid input is silence for this frame only
        let valid = left.is_finite() && right.is_finite();
        if !valid {
            self.saw_invalid_input = true;
        }
        let left = if left.is_finite() { left } else { 0.0 };
        let right = if right.is_finite() { right } else { 0.0 };

        let frames = self.frames;

        // fill the lookahead buffer; while flushing after an attack
        // change, write silence instead of samples
        if self.sanitizing {
            self.buf_l[self.pos] = 0.0;
            self.buf_r[self.pos] = 0.0;
        } else {
            self.buf_l[self.pos] = left;
            self.buf_r[self.pos] = right;
        }

        let limit = self.limit * self.weight;
        let peak = left.abs().max(right.abs());

        // feed the ASC accumulator with peaks above the limit
        if self.auto_release && peak > limit {
            self.asc += peak;
            self.asc_count += 1;
        }

        if peak > limit {
            let required = (limit / peak).min(1.0);
            let rdelta = self.release_delta(required, false);
            // delta that reaches the required attenuation exactly when
            // this peak is emitted
            let candidate = (limit / peak - self.att) / frames as f64;

            if candidate < self.delta {
                // steeper than anything pending: the stored peaks cannot
                // matter any more, restart the schedule from here
                self.next_pos[0] = self.pos as i64;
                self.next_pos[1 % frames] = -1;
                self.next_delta[0] = rdelta;
                self.next_len = 1;
                self.next_iter = 0;
                self.delta = candidate;
            } else {
                // shallower than the current ramp; but it may still
                // dominate one of the stored release points
                let mut found = None;
                for k in 0..self.next_len {
                    let j = (self.next_iter + k) % frames;
                    let idx = self.next_pos[j] as usize;
                    let stored_peak = self.frame_peak(idx);
                    let gap = (frames + self.pos - idx) % frames;
                    if gap == 0 || stored_peak <= 0.0 {
                        continue;
                    }
                    let step = (limit / peak - limit / stored_peak) / gap as f64;
                    if step < self.next_delta[j] {
                        self.next_delta[j] = step;
                        found = Some(k);
                        break;
                    }
                }
                if let Some(k) = found {
                    // everything after the dominated entry is obsolete;
                    // append this peak's release point
                    self.next_len = k + 1;
                    let slot = (self.next_iter + self.next_len) % frames;
                    self.next_pos[slot] = self.pos as i64;
                    self.next_delta[slot] = rdelta;
                    self.next_pos[(self.next_iter + self.next_len + 1) % frames] = -1;
                    self.next_len += 1;
                }
            }
        }

        // emit the oldest frame in the window
        let out_idx = (self.pos + 1) % frames;
        let mut out_l = self.buf_l[out_idx];
        let mut out_r = self.buf_r[out_idx];
        let out_peak = out_l.abs().max(out_r.abs());

        // a peak leaving the window also leaves the ASC accumulator
        if self.pos as i64 == self.asc_pos && !self.asc_changed {
            self.asc_pos = -1;
        }
        if self.auto_release && self.asc_pos == -1 && out_peak > limit {
            self.asc -= out_peak;
            self.asc_count = self.asc_count.saturating_sub(1);
        }

        self.att += self.delta;
        out_l *= self.att;
        out_r *= self.att;

        if out_idx as i64 == self.next_pos[self.next_iter] {
            // a scheduled peak just got emitted: switch to its release
            if self.auto_release {
                self.delta = self.release_delta(self.att, true);
                if self.next_len > 1 {
                    // keep the ramp between consecutive peaks no steeper
                    // than the path to the next one
                    let nid = self.next_pos[(self.next_iter + 1) % frames] as usize;
                    let npeak = self.frame_peak(nid);
                    let gap = (frames + nid - out_idx) % frames;
                    if npeak > 0.0 && gap > 0 {
                        let step = (limit / npeak - self.att) / gap as f64;
                        if step < self.delta {
                            self.delta = step;
                        }
                    }
                }
            } else {
                self.delta = self.next_delta[self.next_iter];
                if out_peak > 0.0 {
                    self.att = (limit / out_peak).min(1.0);
                }
            }
            self.next_len -= 1;
            self.next_pos[self.next_iter] = -1;
            self.next_iter = (self.next_iter + 1) % frames;
        }

        if self.att > 1.0 {
            // release ran out; back to unity
            self.att = 1.0;
            self.delta = 0.0;
            self.next_iter = 0;
            self.next_len = 0;
            self.next_pos[0] = -1;
        }

        if self.sanitizing {
            out_l = 0.0;
            out_r = 0.0;
        }

        if self.att <= 0.0 {
            // can happen when the attack is shortened mid-peak
            self.att = ATT_FLOOR;
            self.delta = (1.0 - self.att) / (self.sample_rate * self.release_s);
        }
        if self.att != 1.0 && 1.0 - self.att < ATT_FLOOR {
            self.att = 1.0;
        }
        if self.delta != 0.0 && self.delta.abs() < 1e-14 {
            self.delta = 0.0;
        }

        out_l = flush_denormal(out_l);
        out_r = flush_denormal(out_r);

        self.att_min = self.att_min.min(self.att);

        self.pos = (self.pos + 1) % frames;
        // the flush cycle ends after one full pass through the window
        if self.sanitizing && self.pos == 0 {
            self.sanitizing = false;
        }
        self.asc_changed = false;

        (out_l, out_r)
    }
}

impl ProcessorConfig for LookaheadLimiter {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        let capacity = (sample_rate * MAX_LOOKAHEAD_S) as usize + 1;
        self.buf_l = vec![0.0; capacity];
        self.buf_r = vec![0.0; capacity];
        self.next_pos = vec![-1; capacity];
        self.next_delta = vec![0.0; capacity];
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    fn settled(limiter: &mut LookaheadLimiter) {
        // run one full buffer pass so the sanitize cycle finishes
        for _ in 0..limiter.frames + 1 {
            limiter.process_sample(0.0, 0.0);
        }
    }

    #[test]
    fn test_passthrough_below_limit() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 50.0, false, 1.0);
        settled(&mut limiter);

        let latency = limiter.latency();
        let mut outputs = Vec::new();
        for i in 0..1000 {
            let x = if i < 500 { 0.25 } else { 0.0 };
            outputs.push(limiter.process_sample(x, x).0);
        }
        // the delayed signal comes through unattenuated
        assert!((outputs[latency + 10] - 0.25).abs() < 1e-12);
        assert_eq!(limiter.current_attenuation(), 1.0);
    }

    #[test]
    fn test_single_transient_bounded() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 50.0, false, 1.0);
        settled(&mut limiter);

        // one sample 24 dB over the ceiling
        let spike = 10.0_f64.powf(24.0 / 20.0);
        let epsilon = 10.0_f64.powf(0.1 / 20.0);
        for i in 0..4000 {
            let x = if i == 100 { spike } else { 0.1 };
            let (l, r) = limiter.process_sample(x, x);
            assert!(
                l.abs() <= epsilon && r.abs() <= epsilon,
                "sample {i} exceeded limit: {l}"
            );
        }
    }

    #[test]
    fn test_sustained_overdrive_bounded() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(0.5, 5.0, 100.0, false, 1.0);
        settled(&mut limiter);

        let epsilon = 0.5 * 10.0_f64.powf(0.1 / 20.0);
        for i in 0..(SR as usize) {
            let x = (2.0 * std::f64::consts::PI * 220.0 * i as f64 / SR).sin() * 2.0;
            let (l, _) = limiter.process_sample(x, x);
            assert!(l.abs() <= epsilon, "sample {i} exceeded limit: {l}");
        }
        assert!(limiter.attenuation() < 0.5);
    }

    #[test]
    fn test_release_returns_to_unity() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 2.0, 10.0, false, 1.0);
        settled(&mut limiter);

        for i in 0..200 {
            let x = if i < 50 { 4.0 } else { 0.0 };
            limiter.process_sample(x, x);
        }
        // after several release times the attenuation is gone
        for _ in 0..(SR * 0.1) as usize {
            limiter.process_sample(0.0, 0.0);
        }
        assert_eq!(limiter.current_attenuation(), 1.0);
        assert_eq!(limiter.stage(), LimiterStage::Idle);
    }

    #[test]
    fn test_stage_reporting() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 100.0, false, 1.0);
        settled(&mut limiter);

        assert_eq!(limiter.stage(), LimiterStage::Idle);
        limiter.process_sample(8.0, 8.0);
        assert_eq!(limiter.stage(), LimiterStage::Attenuating);
        // push the peak through the window, then observe the release
        for _ in 0..limiter.frames {
            limiter.process_sample(0.0, 0.0);
        }
        assert_eq!(limiter.stage(), LimiterStage::Releasing);
    }

    #[test]
    fn test_nan_treated_as_silence() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 50.0, false, 1.0);
        settled(&mut limiter);

        for i in 0..2000 {
            let x = if i % 100 == 0 { f64::NAN } else { 0.3 };
            let (l, r) = limiter.process_sample(x, x);
            assert!(l.is_finite() && r.is_finite());
        }
        assert_eq!(limiter.current_attenuation(), 1.0);
        // the diagnostic flag reports once, then clears
        assert!(limiter.take_invalid_input());
        assert!(!limiter.take_invalid_input());
    }

    #[test]
    fn test_asc_engages_on_sustained_limiting() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(0.25, 5.0, 200.0, true, 1.0);
        settled(&mut limiter);

        let mut engaged = false;
        for i in 0..(SR as usize * 2) {
            let x = (2.0 * std::f64::consts::PI * 110.0 * i as f64 / SR).sin();
            limiter.process_sample(x, x);
            engaged |= limiter.take_asc_active();
        }
        assert!(engaged, "ASC never engaged under sustained heavy limiting");
    }

    #[test]
    fn test_attack_change_flushes_buffer() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 50.0, false, 1.0);
        settled(&mut limiter);
        for _ in 0..100 {
            limiter.process_sample(0.5, 0.5);
        }
        // attack change triggers a mute-and-flush cycle
        limiter.set_params(1.0, 10.0, 50.0, false, 1.0);
        let (l, r) = limiter.process_sample(0.5, 0.5);
        assert_eq!((l, r), (0.0, 0.0));
    }

    #[test]
    fn test_attenuation_meter_resets() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 50.0, false, 1.0);
        settled(&mut limiter);

        for _ in 0..1000 {
            limiter.process_sample(2.0, 2.0);
        }
        let first = limiter.attenuation();
        assert!(first < 1.0);
        // window was reset; with silence the meter recovers
        for _ in 0..(SR * 0.5) as usize {
            limiter.process_sample(0.0, 0.0);
        }
        let _ = limiter.attenuation();
        for _ in 0..10 {
            limiter.process_sample(0.0, 0.0);
        }
        assert_eq!(limiter.attenuation(), 1.0);
    }

    #[test]
    fn test_latency_matches_window() {
        let mut limiter = LookaheadLimiter::new(SR);
        limiter.set_params(1.0, 5.0, 50.0, false, 1.0);
        // 5 ms at 44.1 kHz
        assert_eq!(limiter.latency(), (SR * 0.005) as usize - 1);
    }
}
