//! The emitted feature records and the run statistics

use serde::{Deserialize, Serialize};

use crate::system::f64::*;

/// One isotope's mass trace of an emitted feature
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct IsotopeTrace {
    /// The isotope index, zero for the monoisotopic trace
    pub isotope_index: usize,
    /// The observed (retention time, intensity) points
    pub points: Vec<(Time, f32)>,
    /// The claimed input peaks as (scan index, peak index)
    pub peaks: Vec<(usize, usize)>,
}

/// One retention time slice of a feature's convex hull
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct HullSlice {
    /// The retention time of the slice
    pub rt: Time,
    /// The lowest claimed m/z in this slice
    pub mz_low: MassOverCharge,
    /// The highest claimed m/z in this slice
    pub mz_high: MassOverCharge,
}

/// A quantitative peptide observation: the final output of the pipeline.
/// Immutable after emission.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Feature {
    /// The neutral monoisotopic mass
    pub monoisotopic_mass: Mass,
    /// The charge state
    pub charge: u8,
    /// The fitted elution apex
    pub rt_apex: Time,
    /// The first observed retention time
    pub rt_start: Time,
    /// The last observed retention time
    pub rt_end: Time,
    /// The summed intensity over all isotope traces
    pub intensity: f64,
    /// The elution fit quality, in [0, 1]
    pub quality: f32,
    /// The per scan m/z extent of the claimed peaks, when requested
    pub convex_hull: Option<Vec<HullSlice>>,
    /// The observed mass traces per isotope
    pub traces: Vec<IsotopeTrace>,
}

/// Counters describing a feature finding run, returned next to the features
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// The number of MS1 scans that were transformed
    pub scans_processed: usize,
    /// The number of scored candidate points over all scans and charges
    pub candidates: usize,
    /// The number of seeds that opened a box
    pub seeds_accepted: usize,
    /// The number of boxes opened
    pub boxes_opened: usize,
    /// The number of boxes absorbed into an older box
    pub boxes_merged: usize,
    /// The number of boxes discarded because their fit failed or did not
    /// reach the quality floor
    pub fit_failures: usize,
    /// The number of boxes discarded for spanning too few scans or too short
    /// a monoisotopic trace
    pub short_boxes: usize,
    /// The number of features handed to the caller
    pub features_emitted: usize,
    /// Whether the run was interrupted through its cancellation token
    pub cancelled: bool,
}
