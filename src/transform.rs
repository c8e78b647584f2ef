//! The per scan continuous wavelet transform against the isotope wavelet

use serde::{Deserialize, Serialize};

use crate::spectrum::SpectrumView;
use crate::wavelet::WaveletBank;

/// The sampling strategy of the transform
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Debug, Serialize, Deserialize)]
pub enum TransformMode {
    /// Evaluate the convolution at the input peak positions, the output is
    /// aligned with the scan
    #[default]
    Centroided,
    /// Resample the scan onto a uniform m/z grid of a quarter of the minimal
    /// spacing and evaluate the convolution at every grid point
    HighRes,
}

/// A single output sample of the transform
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct WaveletSample {
    /// The m/z position of this sample
    pub mz: f64,
    /// The wavelet response at this position
    pub response: f32,
}

/// The per scan continuous wavelet transform for a sequence of charge
/// hypotheses, drawing its kernels from a shared bank
#[derive(Debug)]
pub struct WaveletTransform<'a> {
    bank: &'a WaveletBank,
    mode: TransformMode,
}

impl<'a> WaveletTransform<'a> {
    /// Create a new transform over the given kernel bank
    pub const fn new(bank: &'a WaveletBank, mode: TransformMode) -> Self {
        Self { bank, mode }
    }

    /// Transform a single scan for a single charge hypothesis. The
    /// convolution truncates at the boundaries of the scan's m/z range and
    /// accumulates in f64 before the final cast.
    pub fn transform(&self, scan: &SpectrumView, charge: u8) -> Vec<WaveletSample> {
        match self.mode {
            TransformMode::Centroided => self.transform_centroided(scan, charge),
            TransformMode::HighRes => self.transform_high_res(scan, charge),
        }
    }

    fn transform_centroided(&self, scan: &SpectrumView, charge: u8) -> Vec<WaveletSample> {
        (0..scan.len())
            .map(|index| {
                let position = scan.mz(index).value;
                let kernel = self.bank.kernel(charge, position);
                let half = kernel.half_support();
                let mut response = 0.0_f64;
                let mut peak = scan.lower_bound(position - half);
                while peak < scan.len() && scan.mz(peak).value <= position + half {
                    response += f64::from(scan.intensity(peak))
                        * kernel.value(scan.mz(peak).value - position);
                    peak += 1;
                }
                WaveletSample {
                    mz: position,
                    response: response as f32,
                }
            })
            .collect()
    }

    fn transform_high_res(&self, scan: &SpectrumView, charge: u8) -> Vec<WaveletSample> {
        if scan.len() < 2 {
            return Vec::new();
        }
        let step = self.bank.step();
        let first = scan.mz(0).value;
        let last = scan.mz(scan.len() - 1).value;
        let samples = ((last - first) / step).floor() as usize + 1;

        // Resample onto the uniform grid by linear interpolation between
        // adjacent peaks
        let mut resampled = Vec::with_capacity(samples);
        let mut right = 1;
        for index in 0..samples {
            let x = (index as f64).mul_add(step, first);
            while right < scan.len() - 1 && scan.mz(right).value < x {
                right += 1;
            }
            let left = right - 1;
            resampled.push(crate::helper_functions::linear_interpolation(
                scan.mz(left).value,
                f64::from(scan.intensity(left)),
                scan.mz(right).value,
                f64::from(scan.intensity(right)),
                x,
            ));
        }

        (0..samples)
            .map(|index| {
                let position = (index as f64).mul_add(step, first);
                let kernel = self.bank.kernel(charge, position);
                let reach = (kernel.half_support() / step).ceil() as usize;
                let start = index.saturating_sub(reach);
                let end = (index + reach + 1).min(samples);
                let mut response = 0.0_f64;
                for (offset, value) in resampled[start..end].iter().enumerate() {
                    let x = ((start + offset) as f64).mul_add(step, first);
                    response += value * kernel.value(x - position);
                }
                WaveletSample {
                    mz: position,
                    response: response as f32,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::averagine::{PatternCache, AVERAGINE_SPACING};
    use crate::spectrum::{CentroidPeak, Scan};
    use crate::system::f64::*;

    fn isotope_scan(mono_mz: f64, charge: u8, weights: &[f32]) -> Scan {
        Scan::new(
            100.0,
            1,
            "scan=1",
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    CentroidPeak::new(
                        (k as f64).mul_add(AVERAGINE_SPACING / f64::from(charge), mono_mz),
                        w * 1000.0,
                    )
                })
                .collect(),
        )
    }

    fn bank() -> WaveletBank {
        WaveletBank::new(0.01, Arc::new(PatternCache::new()))
    }

    #[test]
    fn centroided_output_is_aligned_with_the_scan() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        let bank = bank();
        let transform = WaveletTransform::new(&bank, TransformMode::Centroided);
        let view = SpectrumView::new(Time::new::<s>(100.0), 1, &scan.peaks);
        let out = transform.transform(&view, 2);
        assert_eq!(out.len(), scan.peaks.len());
        for (sample, peak) in out.iter().zip(&scan.peaks) {
            assert!((sample.mz - peak.mz.value).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn matching_charge_gives_the_strongest_response() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        let bank = bank();
        let transform = WaveletTransform::new(&bank, TransformMode::Centroided);
        let view = SpectrumView::new(Time::new::<s>(100.0), 1, &scan.peaks);
        let at_mono =
            |charge: u8| transform.transform(&view, charge)[0].response;
        assert!(at_mono(2) > at_mono(1));
        assert!(at_mono(2) > at_mono(3));
        assert!(at_mono(2) > 0.0);
    }

    #[test]
    fn high_res_covers_the_scan_densely() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        let bank = bank();
        let transform = WaveletTransform::new(&bank, TransformMode::HighRes);
        let view = SpectrumView::new(Time::new::<s>(100.0), 1, &scan.peaks);
        let out = transform.transform(&view, 2);
        assert!(out.len() > scan.peaks.len());
        let width = scan.peaks.last().unwrap().mz.value - scan.peaks[0].mz.value;
        assert_eq!(out.len(), (width / bank.step()).floor() as usize + 1);
        // At the monoisotopic position the kernel aligns with the resampled
        // isotope comb, the response there is clearly positive
        let at_mono = out
            .iter()
            .min_by(|a, b| {
                (a.mz - 500.25).abs().total_cmp(&(b.mz - 500.25).abs())
            })
            .unwrap();
        assert!(at_mono.response > 0.0);
    }
}
