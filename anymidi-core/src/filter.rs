//! Input conditioning ahead of the analyzer.
//!
//! A high-pass at the low cut removes rumble and handling noise below the
//! lowest string; a low-pass at the high cut trims content the instrument
//! cannot produce. Both are RBJ cookbook biquads with Butterworth Q.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Biquad filter, Direct Form II Transposed.
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    s1: f64,
    s2: f64,
}

impl Biquad {
    /// Pass-through filter.
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            s1: 0.0,
            s2: 0.0,
        }
    }

    /// Second-order high-pass (Audio EQ Cookbook).
    pub fn highpass(cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        Self::normalized(b0, b1, b2, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Second-order low-pass (Audio EQ Cookbook).
    pub fn lowpass(cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;
        Self::normalized(b0, b1, b2, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            s1: 0.0,
            s2: 0.0,
        }
    }

    /// Swaps in new coefficients but keeps the delay line, so a cutoff
    /// change mid-stream does not click.
    fn retune(&mut self, other: &Biquad) {
        self.b0 = other.b0;
        self.b1 = other.b1;
        self.b2 = other.b2;
        self.a1 = other.a1;
        self.a2 = other.a2;
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.s1;
        self.s1 = self.b1 * x - self.a1 * y + self.s2;
        self.s2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}

/// High-pass followed by low-pass, as configured by the low and high cuts.
#[derive(Debug, Clone)]
pub struct InputFilter {
    sample_rate: f64,
    highpass: Biquad,
    lowpass: Biquad,
}

impl InputFilter {
    pub fn new(sample_rate: f64, low_cut_hz: f64, high_cut_hz: f64) -> Self {
        let mut filter = Self {
            sample_rate,
            highpass: Biquad::identity(),
            lowpass: Biquad::identity(),
        };
        filter.set_cutoffs(low_cut_hz, high_cut_hz);
        filter
    }

    /// Recomputes both stages. A high cut at or above Nyquist disables the
    /// low-pass stage.
    pub fn set_cutoffs(&mut self, low_cut_hz: f64, high_cut_hz: f64) {
        let nyquist = self.sample_rate / 2.0;

        let highpass = if low_cut_hz > 0.0 && low_cut_hz < nyquist {
            Biquad::highpass(low_cut_hz, FRAC_1_SQRT_2, self.sample_rate)
        } else {
            Biquad::identity()
        };
        let lowpass = if high_cut_hz < nyquist {
            Biquad::lowpass(high_cut_hz, FRAC_1_SQRT_2, self.sample_rate)
        } else {
            Biquad::identity()
        };

        self.highpass.retune(&highpass);
        self.lowpass.retune(&lowpass);
    }

    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        let hp = self.highpass.process(sample as f64);
        self.lowpass.process(hp) as f32
    }

    pub fn reset(&mut self) {
        self.highpass.reset();
        self.lowpass.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 48_000.0;

    fn sine_peak(filter: &mut InputFilter, freq: f64) -> f32 {
        let n = SR as usize / 2;
        let mut peak = 0.0f32;
        for i in 0..n {
            let x = (2.0 * PI * freq * i as f64 / SR).sin() as f32;
            let y = filter.process(x);
            // Skip the start-up transient
            if i > n / 2 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn highpass_removes_dc() {
        let mut filter = InputFilter::new(SR, 75.0, 24_000.0);
        let mut last = 1.0;
        for _ in 0..48_000 {
            last = filter.process(1.0);
        }
        assert!(last.abs() < 1e-3, "dc leaked: {}", last);
    }

    #[test]
    fn passband_is_untouched() {
        let mut filter = InputFilter::new(SR, 75.0, 24_000.0);
        let peak = sine_peak(&mut filter, 440.0);
        assert!((peak - 1.0).abs() < 0.02, "440 Hz peak = {}", peak);
    }

    #[test]
    fn high_cut_attenuates_above_cutoff() {
        let mut filter = InputFilter::new(SR, 75.0, 1_000.0);
        let peak = sine_peak(&mut filter, 8_000.0);
        assert!(peak < 0.05, "8 kHz peak = {}", peak);
    }

    #[test]
    fn high_cut_at_nyquist_is_bypass() {
        let mut filter = InputFilter::new(SR, 0.0, 24_000.0);
        for x in [0.25f32, -0.5, 0.75, 0.0] {
            assert_eq!(filter.process(x), x);
        }
    }
}
