//! Scoring of wavelet responses into charge annotated candidates

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::averagine::{PatternCache, AVERAGINE_SPACING, PROTON_MASS};
use crate::config::Config;
use crate::helper_functions::{mean_sd, pearson_correlation, percentile};
use crate::spectrum::SpectrumView;
use crate::system::f64::*;
use crate::transform::WaveletSample;

/// A scored candidate point: a peak that may be part of an isotope pattern
/// of the given charge
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Candidate {
    /// The index of the scan this candidate was found in
    pub scan_index: usize,
    /// The index of the underlying peak in that scan
    pub peak_index: usize,
    /// The m/z of the underlying peak
    pub mz: f64,
    /// The inferred monoisotopic m/z of the pattern this peak belongs to
    pub monoisotopic_mz: f64,
    /// The charge hypothesis
    pub charge: u8,
    /// The wavelet response at the candidate position
    pub score: f32,
    /// The intensity of the underlying peak
    pub ref_intensity: f32,
}

/// Scores the wavelet transform of a single scan into candidates for a
/// single charge hypothesis
#[derive(Debug)]
pub struct ChargeScorer<'a> {
    patterns: &'a PatternCache,
    score_threshold: f32,
    correlation_threshold: f32,
    mz_tolerance_ppm: f64,
    check_ppm: bool,
    cutoff_amplitude_factor: Option<f32>,
}

impl<'a> ChargeScorer<'a> {
    /// Create a new scorer with the thresholds from the given configuration
    pub const fn new(config: &Config, patterns: &'a PatternCache) -> Self {
        Self {
            patterns,
            score_threshold: config.score_threshold,
            correlation_threshold: config.isotope_correlation_threshold,
            mz_tolerance_ppm: config.mz_tolerance_ppm,
            check_ppm: config.check_ppm,
            cutoff_amplitude_factor: config.cutoff_amplitude_factor,
        }
    }

    /// Score one transformed scan. Local maxima of the response above the
    /// floor are snapped to the nearest real peak, the isotope index is
    /// found by correlating the observed intensities against the predicted
    /// envelope, and candidates failing the correlation or the optional
    /// mass accuracy check are dropped. At most one candidate per peak is
    /// kept, the one with the highest response.
    pub fn score(
        &self,
        scan_index: usize,
        scan: &SpectrumView,
        transform: &[WaveletSample],
        charge: u8,
    ) -> Vec<Candidate> {
        if scan.is_empty() || transform.is_empty() {
            return Vec::new();
        }
        let floor = self.response_floor(transform);
        let mut candidates: Vec<Candidate> = Vec::new();

        for index in 0..transform.len() {
            let response = transform[index].response;
            if f64::from(response) <= floor
                || (index > 0 && transform[index - 1].response >= response)
                || (index + 1 < transform.len() && transform[index + 1].response > response)
            {
                continue;
            }
            let peak_index = scan.nearest(th(transform[index].mz));
            let Some((monoisotopic_mz, _)) = self.locate_monoisotopic(scan, peak_index, charge)
            else {
                continue;
            };
            if self.check_ppm && !self.passes_mass_rule(monoisotopic_mz, charge) {
                continue;
            }
            let candidate = Candidate {
                scan_index,
                peak_index,
                mz: scan.mz(peak_index).value,
                monoisotopic_mz,
                charge,
                score: response,
                ref_intensity: scan.intensity(peak_index),
            };
            if let Some(position) = candidates
                .iter()
                .position(|c| c.peak_index == peak_index)
            {
                if candidates[position].score < candidate.score {
                    candidates[position] = candidate;
                }
            } else {
                candidates.push(candidate);
            }
        }
        candidates.sort_by(|a, b| a.peak_index.cmp(&b.peak_index));
        candidates
    }

    /// The response floor: the absolute threshold, the same threshold
    /// relative to the 95th percentile response, and optionally the
    /// amplitude cutoff of `mean + factor * sd` over the positive responses
    fn response_floor(&self, transform: &[WaveletSample]) -> f64 {
        let responses = transform
            .iter()
            .map(|sample| f64::from(sample.response))
            .collect_vec();
        let absolute = f64::from(self.score_threshold);
        let mut floor = absolute.max(absolute * percentile(&responses, 0.95));
        if let Some(factor) = self.cutoff_amplitude_factor {
            let positive = responses
                .iter()
                .copied()
                .filter(|response| *response > 0.0)
                .collect_vec();
            let (mean, sd) = mean_sd(&positive);
            floor = floor.max(f64::from(factor).mul_add(sd, mean));
        }
        floor
    }

    /// Find the isotope index that best explains the peak: for every
    /// hypothesis the observed intensities along the predicted envelope are
    /// correlated against the averagine weights, the best hypothesis wins
    /// and has to reach the correlation threshold. A hypothesis without
    /// both the monoisotopic and the first isotope peak observed is not a
    /// pattern at this charge and is dropped outright.
    fn locate_monoisotopic(
        &self,
        scan: &SpectrumView,
        peak_index: usize,
        charge: u8,
    ) -> Option<(f64, f64)> {
        let peak_mz = scan.mz(peak_index).value;
        let spacing = AVERAGINE_SPACING / f64::from(charge);
        let pattern = self
            .patterns
            .get(da((peak_mz - PROTON_MASS) * f64::from(charge)));
        if pattern.len() < 2 {
            return None;
        }

        let mut best: Option<(f64, f64)> = None;
        for isotope_index in 0..pattern.len() {
            let mono = (isotope_index as f64).mul_add(-spacing, peak_mz);
            let observed = (0..pattern.len())
                .map(|j| {
                    scan.nearest_within_ppm(
                        th((j as f64).mul_add(spacing, mono)),
                        self.mz_tolerance_ppm,
                    )
                    .map_or(0.0, |index| f64::from(scan.intensity(index)))
                })
                .collect_vec();
            if observed[0] <= 0.0 || observed[1] <= 0.0 {
                continue;
            }
            if let Some(correlation) = pearson_correlation(&observed, pattern.weights()) {
                if best.map_or(true, |(_, c)| correlation > c) {
                    best = Some((mono, correlation));
                }
            }
        }
        best.filter(|(_, correlation)| *correlation >= f64::from(self.correlation_threshold))
    }

    /// The peptide mass rule: the neutral mass of a real peptide lies close
    /// to a multiple of the averagine spacing
    fn passes_mass_rule(&self, monoisotopic_mz: f64, charge: u8) -> bool {
        let neutral = (monoisotopic_mz - PROTON_MASS) * f64::from(charge);
        let rule = (neutral / AVERAGINE_SPACING).round() * AVERAGINE_SPACING;
        let theoretical = rule / f64::from(charge) + PROTON_MASS;
        th(monoisotopic_mz).ppm(th(theoretical)) <= self.mz_tolerance_ppm
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::spectrum::{CentroidPeak, Scan};
    use crate::transform::{TransformMode, WaveletTransform};
    use crate::wavelet::WaveletBank;

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

    fn score_scan(scan: &Scan, charge: u8, config: &Config) -> Vec<Candidate> {
        let patterns = Arc::new(PatternCache::new());
        let bank = WaveletBank::new(0.01, patterns.clone());
        let transform = WaveletTransform::new(&bank, TransformMode::Centroided);
        let view = SpectrumView::new(scan.rt, scan.ms_level, &scan.peaks);
        let transformed = transform.transform(&view, charge);
        ChargeScorer::new(config, &patterns).score(0, &view, &transformed, charge)
    }

    #[test]
    fn recognises_a_clean_pattern() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        let candidates = score_scan(&scan, 2, &Config::default());
        assert!(!candidates.is_empty());
        let best = candidates
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        assert_eq!(best.charge, 2);
        assert!((best.monoisotopic_mz - 500.25).abs() < 0.01);
    }

    #[test]
    fn isotope_peak_maps_back_to_the_monoisotopic_peak() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        let candidates = score_scan(&scan, 2, &Config::default());
        for candidate in candidates {
            assert!(
                (candidate.monoisotopic_mz - 500.25).abs() < 0.01,
                "candidate at {} resolved to {}",
                candidate.mz,
                candidate.monoisotopic_mz
            );
        }
    }

    #[test]
    fn correlation_threshold_drops_incoherent_peaks() {
        let scan = Scan::new(
            100.0,
            1,
            "scan=1",
            vec![
                CentroidPeak::new(500.25, 550.0),
                CentroidPeak::new(500.93, 530.0),
                CentroidPeak::new(501.61, 520.0),
            ],
        );
        let config = Config::default().isotope_correlation_threshold(0.95);
        let candidates = score_scan(&scan, 2, &config);
        assert!(candidates.is_empty());
    }

    #[test]
    fn mass_rule_check() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        // 500.25 at charge 2 is within the rule for default tolerances
        let config = Config::default().check_ppm(true);
        assert!(!score_scan(&scan, 2, &config).is_empty());
        // A tolerance below the deviation from the rule rejects it
        let config = Config::default().check_ppm(true).mz_tolerance_ppm(5.0);
        assert!(score_scan(&scan, 2, &config).is_empty());
    }

    #[test]
    fn amplitude_cutoff_prunes_weak_maxima() {
        let scan = isotope_scan(500.25, 2, &[0.55, 0.30, 0.11, 0.04]);
        let none = Config::default();
        let strict = Config::default().cutoff_amplitude_factor(Some(100.0));
        assert!(!score_scan(&scan, 2, &none).is_empty());
        assert!(score_scan(&scan, 2, &strict).is_empty());
    }
}
