//! The feature finder: composes the pipeline stages into the public contract

use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::averagine::{PatternCache, PROTON_MASS};
use crate::blacklist::Blacklist;
use crate::boxes::{BoxStateMachine, BoxStatus, FeatureBox};
use crate::config::{CancelToken, Config, Phase, ProgressCallback};
use crate::error::CustomError;
use crate::extender::FeatureExtender;
use crate::feature::{Feature, HullSlice, IsotopeTrace, Statistics};
use crate::fitter::{ElutionFit, FitError, TraceFitter};
use crate::map_index::MapIndex;
use crate::noise::NoiseEstimator;
use crate::scorer::{Candidate, ChargeScorer};
use crate::seeder::Seeder;
use crate::system::f64::*;
use crate::transform::{TransformMode, WaveletTransform};
use crate::wavelet::WaveletBank;

/// The feature finding pipeline. Construction validates the configuration;
/// a cancellation token and a progress observer can be attached before the
/// run. The finder itself is stateless between runs: `find_features` is pure
/// with respect to the input map.
pub struct FeatureFinder {
    config: Config,
    cancel: Option<CancelToken>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for FeatureFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureFinder")
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl FeatureFinder {
    /// Create a new finder for the given configuration.
    ///
    /// # Errors
    /// A [`CustomError`] naming the first violated configuration rule, no
    /// work is performed on an invalid configuration.
    pub fn new(config: Config) -> Result<Self, CustomError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
            progress: None,
        })
    }

    /// The validated configuration of this finder
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Attach a cancellation token, checked at every scan boundary and
    /// every box closure
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach a purely observational progress callback
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run the pipeline over the given map: per scan wavelet transform and
    /// charge scoring, seeded region growing with blacklisting, and bounded
    /// trace fitting of the matured boxes. Features are returned in the
    /// order their boxes closed. On cancellation the features emitted so
    /// far are returned together with the `cancelled` flag in the
    /// statistics, never an error.
    ///
    /// # Errors
    /// Only for structural problems, which [`MapIndex`] construction
    /// already rules out; kept in the signature so future input checks stay
    /// non breaking.
    pub fn find_features(
        &self,
        map: &MapIndex,
    ) -> Result<(Vec<Feature>, Statistics), CustomError> {
        let charges = (self.config.min_charge..=self.config.max_charge).collect::<Vec<_>>();
        self.find_features_with_charges(map, &charges)
    }

    /// The pipeline with an explicit charge hypothesis order. The candidate
    /// lists are merged through a full sort before seeding, so the order the
    /// hypotheses are tested in cannot show up in the output; the tests pin
    /// this down by running the reversed order.
    fn find_features_with_charges(
        &self,
        map: &MapIndex,
        charges: &[u8],
    ) -> Result<(Vec<Feature>, Statistics), CustomError> {
        let mut statistics = Statistics::default();
        let patterns = Arc::new(PatternCache::new());
        let bank = WaveletBank::new(map.min_mz_spacing() / 4.0, patterns.clone());

        let candidates = self.collect_candidates(map, &bank, &patterns, charges, &mut statistics);
        if self.cancelled() {
            statistics.cancelled = true;
            return Ok((Vec::new(), statistics));
        }
        statistics.candidates = candidates.len();
        let mut candidates = resolve_charge_ties(candidates);
        if self.config.seed_signal_to_noise > 0.0 {
            let estimator = NoiseEstimator::default();
            candidates.retain(|candidate| {
                estimator.signal_to_noise(&map.scan(candidate.scan_index), candidate.peak_index)
                    >= f64::from(self.config.seed_signal_to_noise)
            });
        }

        let mut blacklist = Blacklist::new(map);
        let mut machine = BoxStateMachine::new(self.config.mz_tolerance_ppm);
        let extender = FeatureExtender::new(
            map,
            &patterns,
            self.config.mz_tolerance_ppm,
            self.config.rt_interleave,
        );
        let mut seeder = Seeder::new(candidates, self.config.seed_min_intensity);
        while let Some(seed) = seeder.next(&blacklist) {
            if self.cancelled() {
                statistics.cancelled = true;
                return Ok((Vec::new(), statistics));
            }
            statistics.seeds_accepted += 1;
            let handle = machine.open(&seed);
            statistics.boxes_opened += 1;
            machine.get_mut(handle).status = BoxStatus::Extending;
            extender.extend(&seed, machine.get_mut(handle), &mut blacklist);
            machine.close(handle);
        }
        statistics.boxes_merged = machine.merged();

        let fitter = TraceFitter::new(self.config.trace_model);
        let closed = machine.closed_boxes();
        let total = closed.len();
        let mut features = Vec::new();
        for (done, handle) in closed.into_iter().enumerate() {
            if self.cancelled() {
                statistics.cancelled = true;
                break;
            }
            self.report(Phase::Fit, done + 1, total);
            let feature_box = machine.get(handle);
            let long_enough = feature_box.mono_trace().filter(|trace| {
                feature_box.entries.len() as u32 >= self.config.min_rt_votes
                    && trace.points.len() as u32 >= self.config.min_mono_length.max(1)
            });
            let Some(trace) = long_enough else {
                machine.get_mut(handle).status = BoxStatus::Discarded;
                statistics.short_boxes += 1;
                continue;
            };
            let rt = trace
                .points
                .iter()
                .map(|point| map.scan(point.scan_index).rt().value)
                .collect::<Vec<_>>();
            let intensity = trace
                .points
                .iter()
                .map(|point| f64::from(point.intensity))
                .collect::<Vec<_>>();
            match fitter.fit(&rt, &intensity) {
                Ok(fit) if fit.quality >= self.config.q_min => {
                    features.push(self.build_feature(map, feature_box, &fit));
                    machine.get_mut(handle).status = BoxStatus::Emitted;
                }
                Ok(_) | Err(FitError::DidNotConverge(_) | FitError::InsufficientPoints) => {
                    machine.get_mut(handle).status = BoxStatus::Discarded;
                    statistics.fit_failures += 1;
                }
            }
        }
        statistics.features_emitted = features.len();
        Ok((features, statistics))
    }

    /// Transform and score every MS1 scan for every charge hypothesis. The
    /// per scan lists are concatenated scan ascending, charges in the given
    /// order, so the result does not depend on the parallel schedule.
    fn collect_candidates(
        &self,
        map: &MapIndex,
        bank: &WaveletBank,
        patterns: &PatternCache,
        charges: &[u8],
        statistics: &mut Statistics,
    ) -> Vec<Candidate> {
        let total = map.num_scans();

        #[cfg(feature = "rayon")]
        let lists = {
            let counter = std::sync::atomic::AtomicUsize::new(0);
            (0..total)
                .into_par_iter()
                .map(|scan_index| {
                    if self.cancelled() {
                        return None;
                    }
                    let result = self.scan_candidates(map, bank, patterns, charges, scan_index);
                    let done = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                    self.report(Phase::Transform, done.min(total), total);
                    result
                })
                .collect::<Vec<_>>()
        };

        #[cfg(not(feature = "rayon"))]
        let lists = {
            let mut lists = Vec::with_capacity(total);
            for scan_index in 0..total {
                if self.cancelled() {
                    break;
                }
                lists.push(self.scan_candidates(map, bank, patterns, charges, scan_index));
                self.report(Phase::Transform, scan_index + 1, total);
            }
            lists
        };

        statistics.scans_processed = lists.iter().filter(|list| list.is_some()).count();
        lists.into_iter().flatten().flatten().collect()
    }

    /// Transform and score a single scan, `None` for scans the transform
    /// skips (wrong MS level or not enough peaks to convolve)
    fn scan_candidates(
        &self,
        map: &MapIndex,
        bank: &WaveletBank,
        patterns: &PatternCache,
        charges: &[u8],
        scan_index: usize,
    ) -> Option<Vec<Candidate>> {
        let scan = map.scan(scan_index);
        if scan.ms_level() != 1 || scan.len() < 2 {
            return None;
        }
        let mode = if self.config.high_res {
            TransformMode::HighRes
        } else {
            TransformMode::Centroided
        };
        let transform = WaveletTransform::new(bank, mode);
        let scorer = ChargeScorer::new(&self.config, patterns);
        let mut candidates = Vec::new();
        for charge in charges {
            let transformed = transform.transform(&scan, *charge);
            candidates.extend(scorer.score(scan_index, &scan, &transformed, *charge));
        }
        Some(candidates)
    }

    /// Assemble the emitted record from a fitted box
    fn build_feature(&self, map: &MapIndex, feature_box: &FeatureBox, fit: &ElutionFit) -> Feature {
        let rt_start = map.scan(feature_box.first_scan()).rt();
        let rt_end = map.scan(feature_box.last_scan()).rt();
        let traces = feature_box
            .traces
            .iter()
            .filter(|trace| !trace.points.is_empty())
            .map(|trace| IsotopeTrace {
                isotope_index: trace.isotope_index,
                points: trace
                    .points
                    .iter()
                    .map(|point| (map.scan(point.scan_index).rt(), point.intensity))
                    .collect(),
                peaks: trace
                    .points
                    .iter()
                    .map(|point| (point.scan_index, point.peak_index))
                    .collect(),
            })
            .collect::<Vec<_>>();
        let intensity = traces
            .iter()
            .flat_map(|trace| trace.points.iter().map(|(_, value)| f64::from(*value)))
            .sum();
        let convex_hull = self.config.hull_points.then(|| {
            feature_box
                .entries
                .keys()
                .map(|scan_index| {
                    let claimed = feature_box
                        .traces
                        .iter()
                        .flat_map(|trace| &trace.points)
                        .filter(|point| point.scan_index == *scan_index)
                        .map(|point| point.mz)
                        .collect::<Vec<_>>();
                    HullSlice {
                        rt: map.scan(*scan_index).rt(),
                        mz_low: th(claimed.iter().copied().fold(f64::INFINITY, f64::min)),
                        mz_high: th(claimed.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                    }
                })
                .collect()
        });
        Feature {
            monoisotopic_mass: da(
                (feature_box.median_mono_mz() - PROTON_MASS) * f64::from(feature_box.charge)
            ),
            charge: feature_box.charge,
            rt_apex: Time::new::<s>(fit.apex().clamp(rt_start.value, rt_end.value)),
            rt_start,
            rt_end,
            intensity,
            quality: fit.quality,
            convex_hull,
            traces,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn report(&self, phase: Phase, done: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(phase, done, total);
        }
    }
}

/// When two charge hypotheses explain the same peak the higher score wins,
/// on an exact tie the higher charge
fn resolve_charge_ties(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        (a.scan_index, a.peak_index)
            .cmp(&(b.scan_index, b.peak_index))
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| b.charge.cmp(&a.charge))
    });
    candidates.dedup_by_key(|candidate| (candidate.scan_index, candidate.peak_index));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{CentroidPeak, Scan};

    #[test]
    fn invalid_configuration_fails_fast() {
        assert!(FeatureFinder::new(Config::default().charge_range(3, 2)).is_err());
    }

    #[test]
    fn empty_map_yields_nothing() {
        let finder = FeatureFinder::new(Config::default()).unwrap();
        let map = MapIndex::new(Vec::new()).unwrap();
        let (features, statistics) = finder.find_features(&map).unwrap();
        assert!(features.is_empty());
        assert_eq!(statistics.scans_processed, 0);
        assert!(!statistics.cancelled);
    }

    #[test]
    fn ms2_scans_are_skipped() {
        let map = MapIndex::new(vec![
            Scan::new(1.0, 2, "scan=1", vec![
                CentroidPeak::new(500.0, 10.0),
                CentroidPeak::new(500.5, 5.0),
            ]),
            Scan::new(2.0, 2, "scan=2", vec![
                CentroidPeak::new(500.0, 10.0),
                CentroidPeak::new(500.5, 5.0),
            ]),
        ])
        .unwrap();
        let finder = FeatureFinder::new(Config::default()).unwrap();
        let (features, statistics) = finder.find_features(&map).unwrap();
        assert!(features.is_empty());
        assert_eq!(statistics.scans_processed, 0);
        assert_eq!(statistics.candidates, 0);
    }

    #[test]
    fn pre_tripped_token_cancels_before_any_work() {
        let token = CancelToken::new();
        token.cancel();
        let finder = FeatureFinder::new(Config::default())
            .unwrap()
            .with_cancel_token(token);
        let map = MapIndex::new(vec![Scan::new(
            1.0,
            1,
            "scan=1",
            vec![CentroidPeak::new(500.0, 10.0), CentroidPeak::new(500.5, 5.0)],
        )])
        .unwrap();
        let (features, statistics) = finder.find_features(&map).unwrap();
        assert!(features.is_empty());
        assert!(statistics.cancelled);
    }

    /// Two elution profiles whose envelopes interleave in m/z, one at charge
    /// two and one at charge three
    fn overlapping_charges_map() -> MapIndex {
        let weights = [0.55_f32, 0.30, 0.11, 0.04];
        MapIndex::new(
            (0..9)
                .map(|index| {
                    let rt = f64::from(index).mul_add(2.0, 112.0);
                    let elution = (-(rt - 120.0).powi(2) / 32.0).exp();
                    let mut peaks = Vec::new();
                    for (mono, charge, height) in [(500.25, 2_u8, 1000.0), (500.26, 3_u8, 800.0)] {
                        for (k, weight) in weights.iter().enumerate() {
                            let intensity = height * f64::from(*weight) * elution;
                            if intensity >= 1.0 {
                                peaks.push(CentroidPeak::new(
                                    (k as f64).mul_add(
                                        crate::averagine::AVERAGINE_SPACING / f64::from(charge),
                                        mono,
                                    ),
                                    intensity as f32,
                                ));
                            }
                        }
                    }
                    Scan::new(rt, 1, format!("scan={index}"), peaks)
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn charge_order_invariance_up_to_ties() {
        let map = overlapping_charges_map();
        let finder = FeatureFinder::new(Config::default()).unwrap();
        let (ascending, ascending_statistics) = finder.find_features(&map).unwrap();
        let (descending, descending_statistics) = finder
            .find_features_with_charges(&map, &[4, 3, 2, 1])
            .unwrap();
        // Swapping the order the charge hypotheses are tested in changes
        // nothing, the seed intensity ordering is the only source of priority
        assert_eq!(ascending, descending);
        assert_eq!(ascending_statistics, descending_statistics);
        assert_eq!(ascending.len(), 2);
    }

    #[test]
    fn charge_tie_resolution() {
        let base = Candidate {
            scan_index: 0,
            peak_index: 4,
            mz: 500.0,
            monoisotopic_mz: 500.0,
            charge: 2,
            score: 1.0,
            ref_intensity: 10.0,
        };
        let resolved = resolve_charge_ties(vec![
            Candidate { charge: 3, score: 0.5, ..base.clone() },
            base.clone(),
            Candidate { charge: 1, score: 1.0, ..base.clone() },
            Candidate { peak_index: 5, charge: 1, score: 0.1, ..base.clone() },
        ]);
        assert_eq!(resolved.len(), 2);
        // The highest score wins, the exact tie between charge 1 and 2 goes
        // to the higher charge
        assert_eq!(resolved[0].charge, 2);
        assert_eq!(resolved[1].peak_index, 5);
    }
}
