//! Median based noise estimation over a sliding m/z window

use crate::helper_functions::median;
use crate::spectrum::SpectrumView;

/// The default m/z width of the estimation window in Th
pub const DEFAULT_NOISE_WINDOW: f64 = 100.0;

/// Estimates the local noise level of a peak as the median intensity of the
/// peaks inside an m/z window around it. The median is robust against the
/// signal peaks themselves, so the ratio of a peak over its local median
/// approximates its signal to noise ratio.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct NoiseEstimator {
    window: f64,
}

impl Default for NoiseEstimator {
    fn default() -> Self {
        Self {
            window: DEFAULT_NOISE_WINDOW,
        }
    }
}

impl NoiseEstimator {
    /// Create a new estimator with the given window width in Th
    pub const fn new(window: f64) -> Self {
        Self { window }
    }

    /// The local noise level around the given peak, the median intensity of
    /// the window. At least the peak itself is in the window, so the level
    /// is strictly positive for a positive peak.
    pub fn noise_level(&self, scan: &SpectrumView, peak_index: usize) -> f64 {
        let center = scan.mz(peak_index).value;
        let start = scan.lower_bound(center - self.window / 2.0);
        let intensities = (start..scan.len())
            .take_while(|index| scan.mz(*index).value <= center + self.window / 2.0)
            .map(|index| f64::from(scan.intensity(index)))
            .collect::<Vec<_>>();
        median(&intensities)
    }

    /// The ratio of the peak's intensity over the local noise level
    pub fn signal_to_noise(&self, scan: &SpectrumView, peak_index: usize) -> f64 {
        let noise = self.noise_level(scan, peak_index).max(f64::MIN_POSITIVE);
        f64::from(scan.intensity(peak_index)) / noise
    }
}
