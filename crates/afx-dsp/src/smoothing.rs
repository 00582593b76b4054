//! Parameter smoothing ("inertia") and control-tick scheduling
//!
//! Control values arrive at block rate; audio runs at sample rate. An
//! [`Inertia`] interpolates a scalar toward its target over a fixed number
//! of samples so a control jump never lands as a click. A [`ControlTimer`]
//! batches the expensive part (trig-heavy coefficient design) onto a
//! fixed-period tick while ramps step cheaply every sample.

use serde::{Deserialize, Serialize};

/// Default ramp length in samples (~3 ms at 44.1 kHz)
pub const DEFAULT_RAMP_LEN: u32 = 128;

/// Default control tick period in samples
pub const DEFAULT_TICK_PERIOD: u32 = 128;

/// Floor for exponential ramp endpoints; a geometric step is undefined at
/// zero, so gains/frequencies ramp down to this instead
pub const EXP_RAMP_FLOOR: f64 = 1e-8;

/// Ramp interpolation kind
///
/// Linear for most continuous parameters; exponential for quantities
/// perceived on a log scale (gain, cutoff frequency), where equal ratios
/// sound equally spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RampKind {
    #[default]
    Linear,
    Exponential,
}

/// A scalar value that follows its target over `ramp_len` samples
#[derive(Debug, Clone)]
pub struct Inertia {
    kind: RampKind,
    ramp_len: u32,
    /// last target set; equals `value` once the ramp finishes
    old_value: f64,
    value: f64,
    delta: f64,
    steps_remaining: u32,
}

impl Inertia {
    pub fn new(kind: RampKind, ramp_len: u32, initial: f64) -> Self {
        Self {
            kind,
            ramp_len: ramp_len.max(1),
            old_value: initial,
            value: initial,
            delta: match kind {
                RampKind::Linear => 0.0,
                RampKind::Exponential => 1.0,
            },
            steps_remaining: 0,
        }
    }

    pub fn linear(initial: f64) -> Self {
        Self::new(RampKind::Linear, DEFAULT_RAMP_LEN, initial)
    }

    pub fn exponential(initial: f64) -> Self {
        Self::new(RampKind::Exponential, DEFAULT_RAMP_LEN, initial)
    }

    pub fn set_ramp_len(&mut self, ramp_len: u32) {
        self.ramp_len = ramp_len.max(1);
    }

    #[inline]
    pub fn ramp_len(&self) -> u32 {
        self.ramp_len
    }

    /// Set the value immediately, cancelling any ramp
    pub fn set_now(&mut self, value: f64) {
        self.value = value;
        self.old_value = value;
        self.steps_remaining = 0;
    }

    /// Set a new target. A no-op when the target equals the last-set
    /// target, so a static control re-sent every tick never re-triggers
    /// the ramp. A changed target restarts (not resumes) the ramp from the
    /// current value.
    pub fn set_target(&mut self, target: f64) {
        if target == self.old_value {
            return;
        }
        match self.kind {
            RampKind::Linear => {
                self.delta = (target - self.value) / self.ramp_len as f64;
            }
            RampKind::Exponential => {
                let start = self.value.max(EXP_RAMP_FLOOR);
                let end = target.max(EXP_RAMP_FLOOR);
                self.value = start;
                self.delta = (end / start).powf(1.0 / self.ramp_len as f64);
            }
        }
        self.old_value = target;
        self.steps_remaining = self.ramp_len;
    }

    /// Advance one sample and return the current value. The step that
    /// exhausts the ramp snaps exactly to the target so downstream
    /// equality checks see no residual rounding drift.
    #[inline]
    pub fn step(&mut self) -> f64 {
        if self.steps_remaining == 0 {
            return self.old_value;
        }
        self.value = match self.kind {
            RampKind::Linear => self.value + self.delta,
            RampKind::Exponential => self.value * self.delta,
        };
        self.steps_remaining -= 1;
        if self.steps_remaining == 0 {
            self.value = self.old_value;
        }
        self.value
    }

    /// Convenience: set the target and take one step
    #[inline]
    pub fn follow(&mut self, target: f64) -> f64 {
        self.set_target(target);
        self.step()
    }

    /// Current value without stepping
    #[inline]
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Target value
    #[inline]
    pub fn target(&self) -> f64 {
        self.old_value
    }

    /// True while a ramp is in flight; false exactly when value == target
    #[inline]
    pub fn is_active(&self) -> bool {
        self.steps_remaining > 0
    }
}

/// Periodic control tick: fires once every `period` samples
///
/// Between ticks, [`take`](ControlTimer::take) bounds a requested run
/// length to the remainder of the current period, which is what keeps
/// sub-chunks of a host block to a fixed maximum length.
#[derive(Debug, Clone)]
pub struct ControlTimer {
    period: u32,
    left: u32,
}

impl ControlTimer {
    pub fn new(period: u32) -> Self {
        let period = period.max(1);
        Self {
            period,
            left: period,
        }
    }

    /// Restart the current period
    pub fn start(&mut self) {
        self.left = self.period;
    }

    /// Force the timer into the elapsed state so the next `elapsed()`
    /// check fires immediately (used after parameter changes)
    pub fn signal(&mut self) {
        self.left = 0;
    }

    /// Consume up to `desired` samples from the current period; returns
    /// how many may be processed before the next tick
    #[inline]
    pub fn take(&mut self, desired: u32) -> u32 {
        if desired > self.left {
            let granted = self.left;
            self.left = 0;
            granted
        } else {
            self.left -= desired;
            desired
        }
    }

    /// Did the period elapse? Re-arms the timer when it did.
    #[inline]
    pub fn elapsed(&mut self) -> bool {
        if self.left == 0 {
            self.left = self.period;
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn period(&self) -> u32 {
        self.period
    }
}
