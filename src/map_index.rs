//! The two dimensional index over an LC-MS run

use std::cmp::Ordering;
use std::sync::OnceLock;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Context, CustomError};
use crate::spectrum::{Scan, ScanReader, SpectrumView};
use crate::system::f64::*;

/// The fallback for the minimal m/z spacing when a map contains no two
/// consecutive peaks, to keep the wavelet tabulation step strictly positive
const FALLBACK_MIN_SPACING: f64 = 1e-3;

/// A two dimensional index over an experiment: per scan views plus a
/// retention time ordered scan list. The index is validated on construction
/// and read-only afterwards, so it can be shared freely between threads.
#[derive(Debug, Serialize, Deserialize)]
pub struct MapIndex {
    scans: Vec<Scan>,
    #[serde(skip)]
    min_spacing: OnceLock<f64>,
}

impl MapIndex {
    /// Create a new index over the given scans.
    ///
    /// # Errors
    /// If the scans are not sorted ascending in retention time (ties broken
    /// by native ID), if any retention time is not finite, if any scan's m/z
    /// values are not strictly ascending, or if any intensity is not finite
    /// or below zero.
    pub fn new(scans: Vec<Scan>) -> Result<Self, CustomError> {
        for (index, scan) in scans.iter().enumerate() {
            if !scan.rt.value.is_finite() {
                return Err(CustomError::error(
                    "Invalid scan",
                    "The retention time of a scan has to be a finite number",
                    Context::scan(index, scan.rt.value),
                ));
            }
            if index > 0 {
                let previous = &scans[index - 1];
                let order = previous
                    .rt
                    .value
                    .total_cmp(&scan.rt.value)
                    .then_with(|| previous.native_id.cmp(&scan.native_id));
                if order == Ordering::Greater {
                    return Err(CustomError::error(
                        "Invalid map",
                        "The scans have to be sorted ascending in retention time, ties broken by native ID",
                        Context::scan(index, scan.rt.value),
                    ));
                }
            }
            for (peak_index, peak) in scan.peaks.iter().enumerate() {
                if !peak.mz.value.is_finite()
                    || !peak.intensity.is_finite()
                    || peak.intensity.into_inner() < 0.0
                {
                    return Err(CustomError::error(
                        "Invalid scan",
                        "All peaks need a finite m/z and a finite non negative intensity",
                        Context::scan(index, scan.rt.value),
                    ));
                }
                if peak_index > 0 && scan.peaks[peak_index - 1].mz.value >= peak.mz.value {
                    return Err(CustomError::error(
                        "Invalid scan",
                        "The m/z values of a scan have to be sorted strictly ascending",
                        Context::scan(index, scan.rt.value),
                    ));
                }
            }
        }
        Ok(Self {
            scans,
            min_spacing: OnceLock::new(),
        })
    }

    /// Create a new index by copying all scans out of the given reader.
    ///
    /// # Errors
    /// The same structural validation as [`Self::new`].
    pub fn from_reader<R: ScanReader + ?Sized>(reader: &R) -> Result<Self, CustomError> {
        Self::new(
            (0..reader.num_scans())
                .map(|index| {
                    let scan = reader.scan(index);
                    Scan {
                        rt: scan.rt,
                        ms_level: scan.ms_level,
                        native_id: scan.native_id.to_string(),
                        peaks: scan.peaks.to_vec(),
                    }
                })
                .collect(),
        )
    }

    /// The number of scans in this map
    pub fn num_scans(&self) -> usize {
        self.scans.len()
    }

    /// A view over the scan at the given index
    pub fn scan(&self, index: usize) -> SpectrumView<'_> {
        let scan = &self.scans[index];
        SpectrumView::new(scan.rt, scan.ms_level, &scan.peaks)
    }

    /// Iterate over all scans as views
    pub fn scans(&self) -> impl ExactSizeIterator<Item = SpectrumView<'_>> {
        self.scans
            .iter()
            .map(|scan| SpectrumView::new(scan.rt, scan.ms_level, &scan.peaks))
    }

    /// The index of the first scan with a retention time not below the given value
    pub fn rt_lower_bound(&self, rt: Time) -> usize {
        self.scans
            .partition_point(|scan| scan.rt.value.total_cmp(&rt.value) == Ordering::Less)
    }

    /// The lowest retention time in the map, zero for an empty map
    pub fn min_rt(&self) -> Time {
        self.scans.first().map_or_else(|| Time::new::<s>(0.0), |scan| scan.rt)
    }

    /// The highest retention time in the map, zero for an empty map
    pub fn max_rt(&self) -> Time {
        self.scans.last().map_or_else(|| Time::new::<s>(0.0), |scan| scan.rt)
    }

    /// The smallest positive m/z gap between two consecutive peaks over all
    /// scans. Computed lazily on first use and cached. Falls back to a small
    /// constant for maps without two consecutive peaks.
    pub fn min_mz_spacing(&self) -> f64 {
        *self.min_spacing.get_or_init(|| {
            let smallest = self
                .scans
                .iter()
                .flat_map(|scan| {
                    scan.peaks
                        .iter()
                        .tuple_windows()
                        .map(|(left, right)| right.mz.value - left.mz.value)
                })
                .filter(|gap| *gap > 0.0)
                .fold(f64::INFINITY, f64::min);
            if smallest.is_finite() {
                smallest
            } else {
                FALLBACK_MIN_SPACING
            }
        })
    }
}
