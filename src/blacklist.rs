//! The grow-only set of peaks already claimed by a feature

use serde::{Deserialize, Serialize};

use crate::map_index::MapIndex;

/// Marks input peaks as used, one bit per peak over the whole map. The set
/// only ever grows: a peak once claimed by a box stays claimed, even when
/// that box is discarded later.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Blacklist {
    /// The bit offset of the first peak of every scan
    offsets: Vec<usize>,
    /// The packed bits
    bits: Vec<u64>,
    /// The number of marked peaks
    used: usize,
}

impl Blacklist {
    /// Create an empty blacklist covering every peak of the given map
    pub fn new(map: &MapIndex) -> Self {
        let mut offsets = Vec::with_capacity(map.num_scans() + 1);
        let mut total = 0;
        for scan in map.scans() {
            offsets.push(total);
            total += scan.len();
        }
        offsets.push(total);
        Self {
            offsets,
            bits: vec![0; (total + 63) / 64],
            used: 0,
        }
    }

    /// Check if the given peak is marked as used
    pub fn contains(&self, scan_index: usize, peak_index: usize) -> bool {
        let bit = self.offsets[scan_index] + peak_index;
        debug_assert!(bit < self.offsets[scan_index + 1]);
        self.bits[bit / 64] & (1 << (bit % 64)) != 0
    }

    /// Mark the given peak as used, returns whether it was newly marked
    pub fn mark(&mut self, scan_index: usize, peak_index: usize) -> bool {
        let bit = self.offsets[scan_index] + peak_index;
        debug_assert!(bit < self.offsets[scan_index + 1]);
        let mask = 1 << (bit % 64);
        let newly = self.bits[bit / 64] & mask == 0;
        self.bits[bit / 64] |= mask;
        self.used += usize::from(newly);
        newly
    }

    /// The number of peaks marked as used
    pub const fn len(&self) -> usize {
        self.used
    }

    /// Check if no peak is marked yet
    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }
}
