//! Error types for the AFX crates
//!
//! Only configuration-time APIs return errors. The audio hot path never
//! does: out-of-range values are clamped and numerical hazards sanitized
//! locally.

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum AfxError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Configuration exceeds fixed capacity: {0}")]
    CapacityExceeded(String),
}

/// Result type alias
pub type AfxResult<T> = Result<T, AfxError>;
