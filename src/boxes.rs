//! The box state machine: candidate features on their way to emission

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::helper_functions::median;
use crate::scorer::Candidate;
use crate::system::f64::*;

/// One claimed peak inside a box trace
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct TracePoint {
    /// The scan the peak was claimed in
    pub scan_index: usize,
    /// The index of the peak in that scan
    pub peak_index: usize,
    /// The m/z of the peak
    pub mz: f64,
    /// The intensity of the peak
    pub intensity: f32,
}

/// The claimed peaks of one isotope of a box over retention time
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BoxTrace {
    /// The isotope index, zero for the monoisotopic trace
    pub isotope_index: usize,
    /// The claimed peaks, sorted by scan
    pub points: Vec<TracePoint>,
}

impl BoxTrace {
    /// Create an empty trace for the given isotope
    pub const fn new(isotope_index: usize) -> Self {
        Self {
            isotope_index,
            points: Vec::new(),
        }
    }
}

/// The per scan summary of a box
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BoxEntry {
    /// The m/z of the monoisotopic peak in this scan, predicted when missing
    pub mz: f64,
    /// The summed intensity over all isotopes in this scan
    pub intensity: f64,
    /// The envelope correlation of this scan's observed intensities
    pub score: f32,
}

/// The lifecycle state of a box
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum BoxStatus {
    /// Freshly created from an accepted seed
    Open,
    /// The extender is adding entries
    Extending,
    /// No more extension possible in either direction
    Closed,
    /// Fitted successfully and handed to the caller
    Emitted,
    /// Dropped: failed fit, too few scans, or too short a monoisotopic trace
    Discarded,
}

/// An in progress feature: one charge state, per scan entries, and the
/// traces of the claimed peaks per isotope
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FeatureBox {
    /// The charge shared by all entries
    pub charge: u8,
    /// The monoisotopic m/z the seed predicted
    pub monoisotopic_mz: f64,
    /// The scan the seed was found in
    pub seed_scan_index: usize,
    /// The per scan summaries
    pub entries: BTreeMap<usize, BoxEntry>,
    /// The claimed peaks per isotope
    pub traces: Vec<BoxTrace>,
    /// The lifecycle state
    pub status: BoxStatus,
    /// When this box was absorbed by an older box during merging, its index
    absorbed_into: Option<usize>,
}

impl FeatureBox {
    /// Create a new box from an accepted seed
    pub fn open(seed: &Candidate) -> Self {
        Self {
            charge: seed.charge,
            monoisotopic_mz: seed.monoisotopic_mz,
            seed_scan_index: seed.scan_index,
            entries: BTreeMap::new(),
            traces: Vec::new(),
            status: BoxStatus::Open,
            absorbed_into: None,
        }
    }

    /// The first scan with an entry, the seed scan for an empty box
    pub fn first_scan(&self) -> usize {
        self.entries
            .keys()
            .next()
            .copied()
            .unwrap_or(self.seed_scan_index)
    }

    /// The last scan with an entry, the seed scan for an empty box
    pub fn last_scan(&self) -> usize {
        self.entries
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.seed_scan_index)
    }

    /// The monoisotopic trace, if any of its peaks were claimed
    pub fn mono_trace(&self) -> Option<&BoxTrace> {
        self.traces
            .iter()
            .find(|trace| trace.isotope_index == 0 && !trace.points.is_empty())
    }

    /// The median m/z over the claimed monoisotopic peaks, falling back to
    /// the seed prediction for a box without monoisotopic points
    pub fn median_mono_mz(&self) -> f64 {
        self.mono_trace().map_or(self.monoisotopic_mz, |trace| {
            median(&trace.points.iter().map(|point| point.mz).collect::<Vec<_>>())
        })
    }

    /// Check if this box was absorbed into an older box
    pub const fn is_absorbed(&self) -> bool {
        self.absorbed_into.is_some()
    }
}

/// Owns all boxes, drives their lifecycle, and merges boxes that turn out to
/// observe the same feature. Emission order is the order in which boxes
/// closed, not the order their seeds were accepted.
#[derive(Debug)]
pub struct BoxStateMachine {
    boxes: Vec<FeatureBox>,
    closed_order: Vec<usize>,
    mz_tolerance_ppm: f64,
    merged: usize,
}

impl BoxStateMachine {
    /// Create an empty state machine with the given merge tolerance
    pub const fn new(mz_tolerance_ppm: f64) -> Self {
        Self {
            boxes: Vec::new(),
            closed_order: Vec::new(),
            mz_tolerance_ppm,
            merged: 0,
        }
    }

    /// Open a new box for an accepted seed, returns its handle
    pub fn open(&mut self, seed: &Candidate) -> usize {
        self.boxes.push(FeatureBox::open(seed));
        self.boxes.len() - 1
    }

    /// Access a box
    pub fn get(&self, index: usize) -> &FeatureBox {
        &self.boxes[index]
    }

    /// Mutable access to a box
    pub fn get_mut(&mut self, index: usize) -> &mut FeatureBox {
        &mut self.boxes[index]
    }

    /// Close a box: no more extension is possible. The closing box is
    /// compared against the already closed boxes; when it observes the same
    /// feature as an older box, the older box absorbs it.
    pub fn close(&mut self, index: usize) {
        self.boxes[index].status = BoxStatus::Closed;
        let target = self
            .closed_order
            .iter()
            .copied()
            .find(|other| {
                !self.boxes[*other].is_absorbed()
                    && self.boxes[*other].status == BoxStatus::Closed
                    && self.mergeable(*other, index)
            });
        if let Some(older) = target {
            self.absorb(older, index);
            self.merged += 1;
        } else {
            self.closed_order.push(index);
        }
    }

    /// The closed boxes in closure order, skipping absorbed boxes
    pub fn closed_boxes(&self) -> Vec<usize> {
        self.closed_order
            .iter()
            .copied()
            .filter(|index| !self.boxes[*index].is_absorbed())
            .collect()
    }

    /// The number of merges performed
    pub const fn merged(&self) -> usize {
        self.merged
    }

    /// Two boxes observe the same feature when they share the charge, their
    /// m/z windows overlap within tolerance, their scan ranges overlap, and
    /// their monoisotopic traces agree over the shared scans
    fn mergeable(&self, older: usize, newer: usize) -> bool {
        let a = &self.boxes[older];
        let b = &self.boxes[newer];
        if a.charge != b.charge
            || th(a.median_mono_mz()).ppm(th(b.median_mono_mz())) > self.mz_tolerance_ppm
            || a.first_scan() > b.last_scan()
            || b.first_scan() > a.last_scan()
        {
            return false;
        }
        // Compare the monoisotopic m/z per shared scan
        let points = |bx: &FeatureBox| {
            bx.mono_trace()
                .map(|trace| {
                    trace
                        .points
                        .iter()
                        .map(|point| (point.scan_index, point.mz))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default()
        };
        let a_points = points(a);
        let b_points = points(b);
        a_points.iter().all(|(scan, mz_a)| {
            b_points
                .get(scan)
                .map_or(true, |mz_b| th(*mz_a).ppm(th(*mz_b)) <= self.mz_tolerance_ppm)
        })
    }

    /// The older box takes over all entries and trace points of the newer
    /// box, keeping its own on collisions
    fn absorb(&mut self, older: usize, newer: usize) {
        let absorbed = std::mem::replace(&mut self.boxes[newer].entries, BTreeMap::new());
        let absorbed_traces = std::mem::take(&mut self.boxes[newer].traces);
        let keeper = &mut self.boxes[older];
        for (scan, entry) in absorbed {
            keeper.entries.entry(scan).or_insert(entry);
        }
        for trace in absorbed_traces {
            let found = keeper
                .traces
                .iter()
                .position(|own| own.isotope_index == trace.isotope_index);
            let position = found.unwrap_or_else(|| {
                keeper.traces.push(BoxTrace::new(trace.isotope_index));
                keeper.traces.len() - 1
            });
            let target = &mut keeper.traces[position];
            for point in trace.points {
                if !target
                    .points
                    .iter()
                    .any(|own| own.scan_index == point.scan_index)
                {
                    target.points.push(point);
                }
            }
            target.points.sort_by_key(|point| point.scan_index);
        }
        self.boxes[newer].status = BoxStatus::Discarded;
        self.boxes[newer].absorbed_into = Some(older);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(scan_index: usize, mono: f64, charge: u8) -> Candidate {
        Candidate {
            scan_index,
            peak_index: 0,
            mz: mono,
            monoisotopic_mz: mono,
            charge,
            score: 1.0,
            ref_intensity: 100.0,
        }
    }

    fn fill(bx: &mut FeatureBox, scans: std::ops::Range<usize>, mz_val: f64) {
        let mut trace = BoxTrace::new(0);
        for scan in scans {
            bx.entries.insert(
                scan,
                BoxEntry {
                    mz: mz_val,
                    intensity: 100.0,
                    score: 1.0,
                },
            );
            trace.points.push(TracePoint {
                scan_index: scan,
                peak_index: 0,
                mz: mz_val,
                intensity: 100.0,
            });
        }
        bx.traces = vec![trace];
    }

    #[test]
    fn closure_order_is_emission_order() {
        let mut machine = BoxStateMachine::new(10.0);
        let first = machine.open(&seed(0, 500.0, 2));
        let second = machine.open(&seed(0, 800.0, 3));
        fill(machine.get_mut(first), 0..4, 500.0);
        fill(machine.get_mut(second), 0..4, 800.0);
        machine.close(second);
        machine.close(first);
        assert_eq!(machine.closed_boxes(), vec![second, first]);
    }

    #[test]
    fn overlapping_boxes_merge() {
        let mut machine = BoxStateMachine::new(10.0);
        let older = machine.open(&seed(0, 500.0, 2));
        let newer = machine.open(&seed(4, 500.000_1, 2));
        fill(machine.get_mut(older), 0..5, 500.0);
        fill(machine.get_mut(newer), 4..9, 500.000_1);
        machine.close(older);
        machine.close(newer);
        assert_eq!(machine.closed_boxes(), vec![older]);
        assert_eq!(machine.merged(), 1);
        assert!(machine.get(newer).is_absorbed());
        // The older box now spans both ranges
        assert_eq!(machine.get(older).first_scan(), 0);
        assert_eq!(machine.get(older).last_scan(), 8);
        assert_eq!(machine.get(older).mono_trace().unwrap().points.len(), 9);
    }

    #[test]
    fn distinct_charges_do_not_merge() {
        let mut machine = BoxStateMachine::new(10.0);
        let older = machine.open(&seed(0, 500.0, 2));
        let newer = machine.open(&seed(4, 500.0, 3));
        fill(machine.get_mut(older), 0..5, 500.0);
        fill(machine.get_mut(newer), 4..9, 500.0);
        machine.close(older);
        machine.close(newer);
        assert_eq!(machine.closed_boxes(), vec![older, newer]);
        assert_eq!(machine.merged(), 0);
    }

    #[test]
    fn disjoint_rt_ranges_do_not_merge() {
        let mut machine = BoxStateMachine::new(10.0);
        let older = machine.open(&seed(0, 500.0, 2));
        let newer = machine.open(&seed(6, 500.0, 2));
        fill(machine.get_mut(older), 0..4, 500.0);
        fill(machine.get_mut(newer), 6..9, 500.0);
        machine.close(older);
        machine.close(newer);
        assert_eq!(machine.closed_boxes(), vec![older, newer]);
    }

    #[test]
    fn distant_mz_does_not_merge() {
        let mut machine = BoxStateMachine::new(10.0);
        let older = machine.open(&seed(0, 500.0, 2));
        let newer = machine.open(&seed(2, 500.25, 2));
        fill(machine.get_mut(older), 0..5, 500.0);
        fill(machine.get_mut(newer), 2..7, 500.25);
        machine.close(older);
        machine.close(newer);
        assert_eq!(machine.closed_boxes(), vec![older, newer]);
    }
}
