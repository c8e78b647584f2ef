//! Region growing of a seed through adjacent scans along its isotope traces

use crate::averagine::{PatternCache, AVERAGINE_SPACING, PROTON_MASS};
use crate::blacklist::Blacklist;
use crate::boxes::{BoxEntry, BoxTrace, FeatureBox, TracePoint};
use crate::helper_functions::pearson_correlation;
use crate::map_index::MapIndex;
use crate::scorer::Candidate;
use crate::system::f64::*;

/// Grows a seed through adjacent MS1 scans, claiming one peak per isotope
/// per scan. Every accepted peak is marked used immediately, so an earlier
/// (higher priority) seed always wins a contested peak.
#[derive(Debug)]
pub struct FeatureExtender<'a> {
    map: &'a MapIndex,
    patterns: &'a PatternCache,
    mz_tolerance_ppm: f64,
    rt_interleave: u32,
}

impl<'a> FeatureExtender<'a> {
    /// Create a new extender over the given map
    pub const fn new(
        map: &'a MapIndex,
        patterns: &'a PatternCache,
        mz_tolerance_ppm: f64,
        rt_interleave: u32,
    ) -> Self {
        Self {
            map,
            patterns,
            mz_tolerance_ppm,
            rt_interleave,
        }
    }

    /// Extend the box of the given seed in both retention time directions.
    /// The monoisotopic trace bounds the feature: a direction ends once its
    /// gap count exceeds the tolerated interleave, the other isotopes stop
    /// individually. The box entries are rebuilt from the claimed peaks.
    pub fn extend(&self, seed: &Candidate, feature_box: &mut FeatureBox, blacklist: &mut Blacklist) {
        let charge = f64::from(seed.charge);
        let spacing = AVERAGINE_SPACING / charge;
        let pattern = self
            .patterns
            .get(da((seed.monoisotopic_mz - PROTON_MASS) * charge));
        let predicted = (0..pattern.len())
            .map(|k| (k as f64).mul_add(spacing, seed.monoisotopic_mz))
            .collect::<Vec<_>>();

        feature_box.traces = (0..predicted.len()).map(BoxTrace::new).collect();

        // The seed scan itself, then forward, then backward
        self.claim_scan(seed.scan_index, &predicted, &mut feature_box.traces, blacklist);
        self.walk(
            (seed.scan_index + 1..self.map.num_scans()).collect::<Vec<_>>(),
            &predicted,
            &mut feature_box.traces,
            blacklist,
        );
        self.walk(
            (0..seed.scan_index).rev().collect::<Vec<_>>(),
            &predicted,
            &mut feature_box.traces,
            blacklist,
        );

        for trace in &mut feature_box.traces {
            trace.points.sort_by_key(|point| point.scan_index);
        }
        self.rebuild_entries(seed, pattern.weights(), feature_box);
    }

    /// Walk the given scans in order, claiming peaks until the monoisotopic
    /// gap count exceeds the tolerated interleave
    fn walk(
        &self,
        scans: Vec<usize>,
        predicted: &[f64],
        traces: &mut [BoxTrace],
        blacklist: &mut Blacklist,
    ) {
        let mut gaps = vec![0_u32; predicted.len()];
        let mut alive = vec![true; predicted.len()];
        for scan_index in scans {
            let scan = self.map.scan(scan_index);
            // Only MS1 scans take part, an empty MS1 scan counts as a gap
            if scan.ms_level() != 1 {
                continue;
            }
            for (isotope, target) in predicted.iter().enumerate() {
                if !alive[isotope] {
                    continue;
                }
                let matched = scan
                    .nearest_within_ppm(th(*target), self.mz_tolerance_ppm)
                    .filter(|peak| !blacklist.contains(scan_index, *peak));
                if let Some(peak) = matched {
                    blacklist.mark(scan_index, peak);
                    traces[isotope].points.push(TracePoint {
                        scan_index,
                        peak_index: peak,
                        mz: scan.mz(peak).value,
                        intensity: scan.intensity(peak),
                    });
                    gaps[isotope] = 0;
                } else {
                    gaps[isotope] += 1;
                    if gaps[isotope] > self.rt_interleave {
                        alive[isotope] = false;
                    }
                }
            }
            if !alive[0] {
                break;
            }
        }
    }

    /// Claim the peaks of the seed scan itself
    fn claim_scan(
        &self,
        scan_index: usize,
        predicted: &[f64],
        traces: &mut [BoxTrace],
        blacklist: &mut Blacklist,
    ) {
        let scan = self.map.scan(scan_index);
        if scan.ms_level() != 1 || scan.is_empty() {
            return;
        }
        for (isotope, target) in predicted.iter().enumerate() {
            let matched = scan
                .nearest_within_ppm(th(*target), self.mz_tolerance_ppm)
                .filter(|peak| !blacklist.contains(scan_index, *peak));
            if let Some(peak) = matched {
                blacklist.mark(scan_index, peak);
                traces[isotope].points.push(TracePoint {
                    scan_index,
                    peak_index: peak,
                    mz: scan.mz(peak).value,
                    intensity: scan.intensity(peak),
                });
            }
        }
    }

    /// Rebuild the per scan entries from the claimed peaks: the monoisotopic
    /// m/z, the summed intensity, and the envelope correlation per scan
    fn rebuild_entries(&self, seed: &Candidate, weights: &[f64], feature_box: &mut FeatureBox) {
        feature_box.entries.clear();
        let scans = feature_box
            .traces
            .iter()
            .flat_map(|trace| trace.points.iter().map(|point| point.scan_index))
            .collect::<std::collections::BTreeSet<_>>();
        for scan_index in scans {
            let mut observed = vec![0.0; weights.len()];
            let mut mono_mz = None;
            for trace in &feature_box.traces {
                if let Some(point) = trace
                    .points
                    .iter()
                    .find(|point| point.scan_index == scan_index)
                {
                    observed[trace.isotope_index] = f64::from(point.intensity);
                    if trace.isotope_index == 0 {
                        mono_mz = Some(point.mz);
                    }
                }
            }
            let score = pearson_correlation(&observed, weights)
                .map_or(0.0, |correlation| correlation as f32);
            feature_box.entries.insert(
                scan_index,
                BoxEntry {
                    mz: mono_mz.unwrap_or(seed.monoisotopic_mz),
                    intensity: observed.iter().sum(),
                    score,
                },
            );
        }
    }
}
