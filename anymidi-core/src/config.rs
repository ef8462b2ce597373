//! Configuration snapshots for the analysis pipeline.
//!
//! [`AnalyzerSettings`] fixes the structural parameters (sample rate and
//! frame size) for the lifetime of an analyzer. [`AnalysisConfig`] holds the
//! tunables a host may change between any two frames; it is handed to the
//! processor as a whole snapshot and validated before it takes effect.

use std::ops::Range;

use crate::error::{CoreError, Result};
use crate::window::WindowingMethod;

/// Largest number of partials the estimator will consider.
pub const MAX_PARTIALS: usize = 32;

/// Structural parameters of the analyzer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerSettings {
    /// Sample rate of the incoming audio in Hz.
    pub sample_rate: f64,
    /// Samples per analysis frame (power of two).
    pub frame_size: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            frame_size: 1024,
        }
    }
}

impl AnalyzerSettings {
    pub fn new(sample_rate: f64, frame_size: usize) -> Result<Self> {
        let settings = Self {
            sample_rate,
            frame_size,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(CoreError::InvalidSampleRate(self.sample_rate));
        }
        if self.frame_size < 64 || !self.frame_size.is_power_of_two() {
            return Err(CoreError::InvalidFrameSize(self.frame_size));
        }
        Ok(())
    }
}

/// Tunable parameters, read once per analysis step.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Amplitude a note must exceed to start sounding.
    pub attack_threshold: f64,
    /// Amplitude below which a sounding note is released.
    pub release_threshold: f64,
    /// Number of partials (K) extracted from each spectrum.
    pub partial_count: usize,
    /// Partials quieter than this fraction of the loudest one are dropped.
    pub partial_floor: f64,
    /// High-pass cutoff applied to the input, in Hz.
    pub low_cut_hz: f64,
    /// Low-pass cutoff applied to the input, in Hz.
    pub high_cut_hz: f64,
    /// Window applied to each frame.
    pub window: WindowingMethod,
    /// Output MIDI channel, 1-based.
    pub midi_channel: u8,
    /// Added to every estimated note before it is sent.
    pub note_offset: i32,
    /// Outgoing note numbers outside this range are dropped.
    pub output_range: Range<i32>,
    /// Release the sounding note when a frame yields no partials at all.
    pub release_on_silence: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            attack_threshold: 0.1,
            release_threshold: 0.001,
            partial_count: 6,
            partial_floor: 0.05,
            low_cut_hz: 75.0, // just under a guitar's low E (~82 Hz)
            high_cut_hz: 24_000.0,
            window: WindowingMethod::Hamming,
            midi_channel: 10,
            note_offset: 0,
            output_range: 40..90,
            release_on_silence: true,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !positive(self.attack_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "attack threshold must be positive, got {}",
                self.attack_threshold
            )));
        }
        if !positive(self.release_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "release threshold must be positive, got {}",
                self.release_threshold
            )));
        }
        if self.release_threshold >= self.attack_threshold {
            return Err(CoreError::InvalidConfig(format!(
                "release threshold {} must be below attack threshold {}",
                self.release_threshold, self.attack_threshold
            )));
        }
        if self.partial_count == 0 || self.partial_count > MAX_PARTIALS {
            return Err(CoreError::InvalidConfig(format!(
                "partial count must be within 1..={}, got {}",
                MAX_PARTIALS, self.partial_count
            )));
        }
        if !(0.0..1.0).contains(&self.partial_floor) {
            return Err(CoreError::InvalidConfig(format!(
                "partial floor must be within [0, 1), got {}",
                self.partial_floor
            )));
        }
        if !positive(self.low_cut_hz) || !positive(self.high_cut_hz) {
            return Err(CoreError::InvalidConfig(format!(
                "filter cutoffs must be positive, got {} / {}",
                self.low_cut_hz, self.high_cut_hz
            )));
        }
        if self.low_cut_hz >= self.high_cut_hz {
            return Err(CoreError::InvalidConfig(format!(
                "low cut {} Hz must be below high cut {} Hz",
                self.low_cut_hz, self.high_cut_hz
            )));
        }
        if !(1..=16).contains(&self.midi_channel) {
            return Err(CoreError::InvalidConfig(format!(
                "MIDI channel must be within 1..=16, got {}",
                self.midi_channel
            )));
        }
        if self.output_range.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "output range {:?} is empty",
                self.output_range
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
        assert!(AnalyzerSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_frame_sizes() {
        assert_eq!(
            AnalyzerSettings::new(48_000.0, 1000),
            Err(CoreError::InvalidFrameSize(1000))
        );
        assert!(AnalyzerSettings::new(48_000.0, 32).is_err());
        assert!(AnalyzerSettings::new(0.0, 1024).is_err());
        assert!(AnalyzerSettings::new(f64::NAN, 1024).is_err());
        assert!(AnalyzerSettings::new(44_100.0, 2048).is_ok());
    }

    #[test]
    fn rejects_each_invalid_field() {
        let cases: Vec<Box<dyn Fn(&mut AnalysisConfig)>> = vec![
            Box::new(|c| c.attack_threshold = 0.0),
            Box::new(|c| c.attack_threshold = f64::NAN),
            Box::new(|c| c.release_threshold = -1.0),
            Box::new(|c| c.release_threshold = 0.5),
            Box::new(|c| c.partial_count = 0),
            Box::new(|c| c.partial_count = MAX_PARTIALS + 1),
            Box::new(|c| c.partial_floor = -0.1),
            Box::new(|c| c.partial_floor = 1.0),
            Box::new(|c| c.partial_floor = f64::NAN),
            Box::new(|c| c.low_cut_hz = 0.0),
            Box::new(|c| c.high_cut_hz = f64::INFINITY),
            Box::new(|c| c.low_cut_hz = 30_000.0),
            Box::new(|c| c.midi_channel = 0),
            Box::new(|c| c.midi_channel = 17),
            Box::new(|c| c.output_range = 60..60),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = AnalysisConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(CoreError::InvalidConfig(_))),
                "case {} accepted",
                i
            );
        }
    }
}
