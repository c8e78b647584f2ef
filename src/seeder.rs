//! The seeder: hands out candidate points in order of decreasing weight

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::blacklist::Blacklist;
use crate::scorer::Candidate;

/// One entry in the seed priority queue, ordered by descending
/// `ref_intensity * score` with a stable tie break on (scan, peak)
#[derive(Debug)]
struct SeedEntry {
    priority: OrderedFloat<f64>,
    candidate: Candidate,
}

impl SeedEntry {
    fn new(candidate: Candidate) -> Self {
        Self {
            priority: OrderedFloat(f64::from(candidate.ref_intensity) * f64::from(candidate.score)),
            candidate,
        }
    }
}

impl PartialEq for SeedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SeedEntry {}

impl PartialOrd for SeedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // A max-heap pops the highest priority first; on equal priority the
        // lower (scan, peak) pair has to win, hence the reversed index order
        self.priority.cmp(&other.priority).then_with(|| {
            (other.candidate.scan_index, other.candidate.peak_index)
                .cmp(&(self.candidate.scan_index, self.candidate.peak_index))
        })
    }
}

/// Orders candidate points by decreasing `ref_intensity * score` and hands
/// out the next one whose underlying peak is still unclaimed. The priority
/// structure is built once, popping is lazy.
#[derive(Debug)]
pub struct Seeder {
    heap: BinaryHeap<SeedEntry>,
}

impl Seeder {
    /// Create a new seeder over the given candidates, dropping everything
    /// below the intensity floor
    pub fn new(candidates: Vec<Candidate>, min_intensity: f32) -> Self {
        Self {
            heap: candidates
                .into_iter()
                .filter(|candidate| candidate.ref_intensity >= min_intensity)
                .map(SeedEntry::new)
                .collect(),
        }
    }

    /// The next unclaimed seed, `None` once exhausted
    pub fn next(&mut self, blacklist: &Blacklist) -> Option<Candidate> {
        while let Some(entry) = self.heap.pop() {
            if !blacklist.contains(entry.candidate.scan_index, entry.candidate.peak_index) {
                return Some(entry.candidate);
            }
        }
        None
    }

    /// The number of candidates left in the queue, including ones that may
    /// have been claimed since
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if the queue ran out
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
