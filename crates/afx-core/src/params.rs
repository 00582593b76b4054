//! Parameter types for audio processors
//!
//! The control/GUI thread writes plain scalar slots; the audio thread
//! reads them once per block or control tick. Word-level atomicity is the
//! only synchronization: a mid-update read yields a stale-but-valid value
//! which downstream smoothing absorbs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Parameter ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamId(pub u32);

/// Parameter value (normalized 0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedValue(f64);

impl NormalizedValue {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);
    pub const HALF: Self = Self(0.5);

    #[inline]
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    /// Map to a range
    #[inline]
    pub fn map(self, min: f64, max: f64) -> f64 {
        min + self.0 * (max - min)
    }

    /// Map logarithmically (for frequency, etc.)
    #[inline]
    pub fn map_log(self, min: f64, max: f64) -> f64 {
        let log_min = min.ln();
        let log_max = max.ln();
        (log_min + self.0 * (log_max - log_min)).exp()
    }
}

impl Default for NormalizedValue {
    fn default() -> Self {
        Self::HALF
    }
}

/// Atomic parameter slot for lock-free access
///
/// One slot per control; also used for the "output" metering slots the
/// GUI polls (gain reduction, levels).
pub struct AtomicParam {
    bits: AtomicU64,
}

impl AtomicParam {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Monotonic version published by the audio thread whenever its visible
/// state (coefficients, static curves) changes; the GUI reads the latest
/// version without ever blocking the publisher.
#[derive(Debug, Default)]
pub struct StateVersion {
    version: AtomicU64,
}

impl StateVersion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a state change (audio thread)
    #[inline]
    pub fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Read the latest published version (GUI thread)
    #[inline]
    pub fn current(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Parameter range specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub skew: ParamSkew,
}

impl ParamRange {
    pub fn linear(min: f64, max: f64, default: f64) -> Self {
        Self {
            min,
            max,
            default,
            skew: ParamSkew::Linear,
        }
    }

    pub fn logarithmic(min: f64, max: f64, default: f64) -> Self {
        Self {
            min,
            max,
            default,
            skew: ParamSkew::Logarithmic,
        }
    }

    /// Denormalize a 0-1 value to actual value
    pub fn denormalize(&self, normalized: f64) -> f64 {
        match self.skew {
            ParamSkew::Linear => self.min + normalized * (self.max - self.min),
            ParamSkew::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (log_min + normalized * (log_max - log_min)).exp()
            }
        }
    }

    /// Normalize an actual value to 0-1
    pub fn normalize(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        match self.skew {
            ParamSkew::Linear => (clamped - self.min) / (self.max - self.min),
            ParamSkew::Logarithmic => {
                let log_min = self.min.ln();
                let log_max = self.max.ln();
                (clamped.ln() - log_min) / (log_max - log_min)
            }
        }
    }

    /// Clamp a host-supplied value into range (never rejects)
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Parameter skew type
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ParamSkew {
    Linear,
    Logarithmic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_param_roundtrip() {
        let p = AtomicParam::new(0.25);
        assert_eq!(p.get(), 0.25);
        p.set(-3.5);
        assert_eq!(p.get(), -3.5);
    }

    #[test]
    fn test_state_version_monotonic() {
        let v = StateVersion::new();
        let before = v.current();
        v.bump();
        v.bump();
        assert_eq!(v.current(), before + 2);
    }

    #[test]
    fn test_range_normalize_roundtrip() {
        let range = ParamRange::logarithmic(20.0, 20000.0, 1000.0);
        for f in [20.0, 100.0, 1000.0, 20000.0] {
            let n = range.normalize(f);
            assert!((range.denormalize(n) - f).abs() / f < 1e-9);
        }
    }

    #[test]
    fn test_range_clamps_out_of_range() {
        let range = ParamRange::linear(0.0, 1.0, 0.5);
        assert_eq!(range.clamp(2.0), 1.0);
        assert_eq!(range.normalize(-1.0), 0.0);
    }

    #[test]
    fn test_normalized_map_log() {
        let n = NormalizedValue::new(0.5);
        let mapped = n.map_log(20.0, 20000.0);
        // geometric midpoint
        assert!((mapped - 632.455).abs() < 0.01);
    }
}
