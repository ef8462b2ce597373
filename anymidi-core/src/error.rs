//! Error types for the analysis core.
//!
//! The steady-state audio path never fails: out-of-range notes, short
//! harmonic sets and analysis overruns all degrade to "no event this tick".
//! Errors only surface when building an analyzer or applying a new
//! configuration snapshot, and when a MIDI sink reports a transport failure.

use thiserror::Error;

/// Core errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A configuration snapshot failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame size must be a non-zero power of two
    #[error("Invalid frame size {0}: must be a power of two >= 64")]
    InvalidFrameSize(usize),

    /// Sample rate must be positive and finite
    #[error("Invalid sample rate {0} Hz")]
    InvalidSampleRate(f64),

    /// The external MIDI sink failed to deliver a block
    #[error("MIDI sink error: {0}")]
    Sink(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
