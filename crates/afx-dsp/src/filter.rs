//! Smoothed stereo filter: biquad cascades driven by inertia ramps
//!
//! Control changes land on [`Inertia`] ramps; every sample the ramps step
//! cheaply, and only on [`ControlTimer`] ticks are the trig-heavy
//! coefficient designs rebuilt from the ramps' current values. That
//! bounds CPU cost while keeping sweeps audibly smooth.

use afx_core::{Sample, StateVersion};

use crate::biquad::{BiquadCascade, BiquadCoeffs, FilterMode, MAX_STAGES};
use crate::smoothing::{ControlTimer, DEFAULT_TICK_PERIOD, Inertia, RampKind};
use crate::{MonoProcessor, Processor, ProcessorConfig, StereoProcessor};

/// Parameter ramp length; several control ticks long so a sweep glides
/// through a handful of intermediate designs
const PARAM_RAMP_LEN: u32 = 512;

/// Stereo filter with parameter inertia and timer-batched redesigns
pub struct SmoothedFilter {
    mode: FilterMode,
    cutoff: Inertia,
    q: Inertia,
    gain_db: f64,

    cascade_l: BiquadCascade,
    cascade_r: BiquadCascade,
    timer: ControlTimer,
    dirty: bool,
    /// a ramp was mid-flight at the previous redesign; one more rebuild is
    /// owed after it snaps to target
    settling: bool,
    version: StateVersion,

    sample_rate: f64,
}

impl SmoothedFilter {
    pub fn new(sample_rate: f64) -> Self {
        let mut filter = Self {
            mode: FilterMode::Lowpass,
            cutoff: Inertia::new(RampKind::Exponential, PARAM_RAMP_LEN, 1000.0),
            q: Inertia::new(RampKind::Linear, PARAM_RAMP_LEN, 0.707),
            gain_db: 0.0,
            cascade_l: BiquadCascade::new(1),
            cascade_r: BiquadCascade::new(1),
            timer: ControlTimer::new(DEFAULT_TICK_PERIOD),
            dirty: false,
            settling: false,
            version: StateVersion::new(),
            sample_rate,
        };
        filter.update_coeffs();
        filter
    }

    /// Select filter mode and cascade length (stages × 12 dB/oct)
    pub fn set_mode(&mut self, mode: FilterMode, stages: usize) {
        if self.mode != mode || stages.clamp(1, MAX_STAGES) != self.cascade_l.num_stages() {
            self.mode = mode;
            self.cascade_l.set_num_stages(stages);
            self.cascade_r.set_num_stages(stages);
            self.dirty = true;
            self.timer.signal();
        }
    }

    /// Cutoff target in Hz; ramps exponentially (equal ratios sound
    /// equally spaced)
    pub fn set_cutoff(&mut self, freq: f64) {
        self.cutoff
            .set_target(freq.clamp(1.0, self.sample_rate * 0.49));
    }

    /// Q target; ramps linearly
    pub fn set_q(&mut self, q: f64) {
        self.q.set_target(q.clamp(0.01, 32.0));
    }

    /// Shelf/peaking gain in dB (takes effect at the next tick)
    pub fn set_gain_db(&mut self, gain_db: f64) {
        if self.gain_db != gain_db {
            self.gain_db = gain_db.clamp(-36.0, 36.0);
            self.dirty = true;
        }
    }

    /// Version counter bumped on every coefficient rebuild; the GUI polls
    /// it to know when the response graph is stale
    pub fn version(&self) -> &StateVersion {
        &self.version
    }

    /// Composed linear gain at `freq` (graph query)
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        self.cascade_l.magnitude_at(freq, self.sample_rate)
    }

    fn update_coeffs(&mut self) {
        let coeffs = BiquadCoeffs::design(
            self.mode,
            self.cutoff.get(),
            self.q.get(),
            self.gain_db,
            self.sample_rate,
        );
        self.cascade_l.set_coeffs(coeffs);
        self.cascade_r.set_coeffs(coeffs);
        self.version.bump();
    }

    /// Rebuild coefficients on a control tick when anything moved; the
    /// tick after a ramp finishes still rebuilds once so the exact target
    /// value lands in the design
    fn on_tick(&mut self) {
        let active = self.cutoff.is_active() || self.q.is_active();
        if self.dirty || active || self.settling {
            self.update_coeffs();
            self.dirty = false;
            self.settling = active;
        }
    }
}

impl Processor for SmoothedFilter {
    fn reset(&mut self) {
        self.cascade_l.reset();
        self.cascade_r.reset();
        self.timer.start();
    }
}

impl StereoProcessor for SmoothedFilter {
    fn process_sample(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        if self.timer.elapsed() {
            self.on_tick();
        }
        self.timer.take(1);
        self.cutoff.step();
        self.q.step();
        (
            self.cascade_l.process_sample(left),
            self.cascade_r.process_sample(right),
        )
    }

    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        debug_assert_eq!(left.len(), right.len());
        let len = left.len();
        let mut i = 0;
        while i < len {
            if self.timer.elapsed() {
                self.on_tick();
            }
            let run = self.timer.take((len - i) as u32) as usize;
            for j in i..i + run {
                self.cutoff.step();
                self.q.step();
                left[j] = self.cascade_l.process_sample(left[j]);
                right[j] = self.cascade_r.process_sample(right[j]);
            }
            self.cascade_l.sanitize();
            self.cascade_r.sanitize();
            i += run;
        }
    }
}

impl ProcessorConfig for SmoothedFilter {
    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.cascade_l.reset();
        self.cascade_r.reset();
        self.update_coeffs();
        self.timer.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 48000.0;

    #[test]
    fn test_redesigns_batched_on_ticks() {
        let mut filter = SmoothedFilter::new(SR);
        let before = filter.version().current();

        filter.set_cutoff(8000.0);
        let mut left = vec![0.1; 1024];
        let mut right = vec![0.1; 1024];
        filter.process_block(&mut left, &mut right);

        let redesigns = filter.version().current() - before;
        // one design per tick, not one per sample
        assert!(redesigns >= 4 && redesigns <= 1024 / DEFAULT_TICK_PERIOD as u64 + 1,
            "got {redesigns} redesigns");
    }

    #[test]
    fn test_no_redesign_when_static() {
        let mut filter = SmoothedFilter::new(SR);
        let mut left = vec![0.1; 1024];
        let mut right = vec![0.1; 1024];
        filter.process_block(&mut left, &mut right);
        let settled = filter.version().current();

        filter.process_block(&mut left, &mut right);
        assert_eq!(filter.version().current(), settled);
    }

    #[test]
    fn test_sweep_stays_finite() {
        let mut filter = SmoothedFilter::new(SR);
        filter.set_mode(FilterMode::Lowpass, 2);
        filter.set_q(8.0);
        let mut left: Vec<f64> = (0..48000)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / SR).sin())
            .collect();
        let mut right = left.clone();

        for chunk in 0..10 {
            filter.set_cutoff(200.0 * (chunk + 1) as f64);
            let start = chunk * 4800;
            filter.process_block(&mut left[start..start + 4800], &mut right[start..start + 4800]);
        }
        assert!(left.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_response_reaches_target_after_ramp() {
        let mut filter = SmoothedFilter::new(SR);
        filter.set_cutoff(4000.0);
        let mut left = vec![0.0; 4096];
        let mut right = vec![0.0; 4096];
        filter.process_block(&mut left, &mut right);

        // ramp finished and a tick has passed: design matches the target
        let expected = BiquadCoeffs::lowpass(4000.0, 0.707, SR).magnitude_at(4000.0, SR);
        assert!((filter.magnitude_at(4000.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_set_sample_rate_idempotent() {
        let mut filter = SmoothedFilter::new(SR);
        filter.set_sample_rate(96000.0);
        let v = filter.version().current();
        let m = filter.magnitude_at(1000.0);
        filter.set_sample_rate(96000.0);
        assert_eq!(filter.magnitude_at(1000.0), m);
        assert!(filter.version().current() > v); // recompute is allowed, state unchanged
    }
}
