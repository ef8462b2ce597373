//! Window functions applied to each frame before the transform.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Shape parameter used for the Kaiser window.
const KAISER_BETA: f64 = 10.0;

/// Available windowing methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WindowingMethod {
    Rectangular,
    Hann,
    #[default]
    Hamming,
    Blackman,
    FlatTop,
    Kaiser,
}

impl WindowingMethod {
    /// Every method, in presentation order.
    pub const ALL: [WindowingMethod; 6] = [
        WindowingMethod::Rectangular,
        WindowingMethod::Hann,
        WindowingMethod::Hamming,
        WindowingMethod::Blackman,
        WindowingMethod::FlatTop,
        WindowingMethod::Kaiser,
    ];

    /// Display name for menus and logs.
    pub fn name(self) -> &'static str {
        match self {
            WindowingMethod::Rectangular => "Rectangular",
            WindowingMethod::Hann => "Hann",
            WindowingMethod::Hamming => "Hamming",
            WindowingMethod::Blackman => "Blackman",
            WindowingMethod::FlatTop => "Flat top",
            WindowingMethod::Kaiser => "Kaiser",
        }
    }

    /// Gain applied to every bin after the transform so that a given input
    /// level reads roughly the same whichever window is selected.
    pub fn amplitude_compensation(self) -> f64 {
        match self {
            WindowingMethod::Rectangular => 1.0,
            WindowingMethod::Hann => 2.0,
            WindowingMethod::Hamming => 1.85,
            WindowingMethod::Blackman => 2.8,
            WindowingMethod::FlatTop => 4.18,
            WindowingMethod::Kaiser => 2.49,
        }
    }

    /// Fills `table` with this window evaluated over `table.len()` points.
    ///
    /// Callers size the table one longer than the frame and only apply the
    /// first `frame_size` values, which gives the periodic form of each
    /// window.
    pub fn fill_table(self, table: &mut [f32]) {
        let size = table.len();
        if size < 2 {
            table.fill(1.0);
            return;
        }
        let n = (size - 1) as f64;

        for (i, value) in table.iter_mut().enumerate() {
            let x = i as f64 / n;
            let c1 = (2.0 * PI * x).cos();
            let c2 = (4.0 * PI * x).cos();
            let w = match self {
                WindowingMethod::Rectangular => 1.0,
                WindowingMethod::Hann => 0.5 - 0.5 * c1,
                WindowingMethod::Hamming => 0.54 - 0.46 * c1,
                WindowingMethod::Blackman => 0.42 - 0.5 * c1 + 0.08 * c2,
                WindowingMethod::FlatTop => 0.281_063_9 - 0.520_897_2 * c1 + 0.198_039_9 * c2,
                WindowingMethod::Kaiser => {
                    let r = 2.0 * x - 1.0;
                    bessel_i0(KAISER_BETA * (1.0 - r * r).max(0.0).sqrt()) / bessel_i0(KAISER_BETA)
                }
            };
            *value = w as f32;
        }
    }
}

impl fmt::Display for WindowingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowingMethod {
    type Err = CoreError;

    /// Accepts the display name or a compact form (`"flattop"`, `"flat-top"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "rectangular" | "rect" | "none" => Ok(WindowingMethod::Rectangular),
            "hann" | "hanning" => Ok(WindowingMethod::Hann),
            "hamming" => Ok(WindowingMethod::Hamming),
            "blackman" => Ok(WindowingMethod::Blackman),
            "flattop" => Ok(WindowingMethod::FlatTop),
            "kaiser" => Ok(WindowingMethod::Kaiser),
            _ => Err(CoreError::InvalidConfig(format!(
                "unknown windowing method '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<usize> for WindowingMethod {
    type Error = CoreError;

    /// Position in [`WindowingMethod::ALL`], as used by selector widgets.
    fn try_from(index: usize) -> Result<Self, Self::Error> {
        WindowingMethod::ALL.get(index).copied().ok_or_else(|| {
            CoreError::InvalidConfig(format!("windowing method index {} out of range", index))
        })
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    let mut k = 1.0;
    loop {
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
        k += 1.0;
    }
    sum
}
