//! The averagine isotope model: predicted isotope envelopes for peptides of unknown composition

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, Discrete};

use crate::system::f64::*;

/// The mass of a proton in Da
pub const PROTON_MASS: f64 = 1.007_276_466_621;

/// The spacing between two adjacent isotope peaks of an averagine peptide in Da
pub const AVERAGINE_SPACING: f64 = 1.000_495;

/// The monoisotopic mass of one averagine unit in Da
const AVERAGINE_MASS: f64 = 111.125_4;
/// The elemental composition of one averagine unit
const AVERAGINE_C: f64 = 4.938_4;
const AVERAGINE_H: f64 = 7.758_3;
const AVERAGINE_N: f64 = 1.357_7;
const AVERAGINE_O: f64 = 1.477_3;
const AVERAGINE_S: f64 = 0.041_7;

/// The monoisotopic masses of the averagine elements in Da
const MASS_H: f64 = 1.007_825_032;
const MASS_C: f64 = 12.0;
const MASS_N: f64 = 14.003_074_005;
const MASS_O: f64 = 15.994_914_620;
const MASS_S: f64 = 31.972_071_174;

/// The heavy isotopes of the averagine elements as (nominal mass offset, natural abundance)
const ISOTOPES_H: &[(usize, f64)] = &[(1, 0.000_115)];
const ISOTOPES_C: &[(usize, f64)] = &[(1, 0.010_7)];
const ISOTOPES_N: &[(usize, f64)] = &[(1, 0.003_64)];
const ISOTOPES_O: &[(usize, f64)] = &[(1, 0.000_38), (2, 0.002_05)];
const ISOTOPES_S: &[(usize, f64)] = &[(1, 0.007_5), (2, 0.042_5), (4, 0.000_1)];

/// The cumulative weight at which the envelope is truncated
const CUMULATIVE_CUTOFF: f64 = 0.995;
/// Hard cap on the number of isotope peaks in an envelope
const MAX_PEAKS: usize = 32;

/// A predicted isotope envelope. The first weight belongs to the
/// monoisotopic peak, every consecutive weight to a peak one averagine
/// spacing further. The weights sum to one.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct IsotopePattern {
    weights: Vec<f64>,
}

impl IsotopePattern {
    /// Predict the envelope for a peptide of the given monoisotopic mass.
    /// The averagine composition is scaled to the mass, rounded to whole
    /// atoms with hydrogen absorbing the remainder, and the aggregated
    /// distribution is built by binomial convolution per heavy isotope.
    pub fn averagine(mass: Mass) -> Self {
        let units = (mass.value / AVERAGINE_MASS).max(0.0);
        let carbon = (units * AVERAGINE_C).round().max(0.0);
        let nitrogen = (units * AVERAGINE_N).round().max(0.0);
        let oxygen = (units * AVERAGINE_O).round().max(0.0);
        let sulfur = (units * AVERAGINE_S).round().max(0.0);
        let heavy_mass =
            carbon * MASS_C + nitrogen * MASS_N + oxygen * MASS_O + sulfur * MASS_S;
        let hydrogen = ((mass.value - heavy_mass) / MASS_H).round().max(0.0);

        let mut weights = vec![1.0];
        for (count, isotopes) in [
            (hydrogen as u64, ISOTOPES_H),
            (carbon as u64, ISOTOPES_C),
            (nitrogen as u64, ISOTOPES_N),
            (oxygen as u64, ISOTOPES_O),
            (sulfur as u64, ISOTOPES_S),
        ] {
            if count == 0 {
                continue;
            }
            for (offset, abundance) in isotopes {
                // The parameters are constants in range, this cannot fail
                let binomial = Binomial::new(*abundance, count).unwrap();
                let mut distribution = vec![0.0; MAX_PEAKS];
                let mut cumulative = 0.0;
                for draws in 0..=count {
                    let index = draws as usize * offset;
                    if index >= MAX_PEAKS {
                        break;
                    }
                    let chance = binomial.pmf(draws);
                    distribution[index] = chance;
                    cumulative += chance;
                    if cumulative > 1.0 - 1e-9 {
                        break;
                    }
                }
                weights = convolve(&weights, &distribution);
            }
        }

        // Truncate at the cumulative cutoff and renormalise
        let mut cumulative = 0.0;
        let mut keep = weights.len();
        for (index, weight) in weights.iter().enumerate() {
            cumulative += weight;
            if cumulative >= CUMULATIVE_CUTOFF {
                keep = index + 1;
                break;
            }
        }
        weights.truncate(keep.max(1));
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            for weight in &mut weights {
                *weight /= total;
            }
        }
        Self { weights }
    }

    /// The number of peaks in this envelope
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Check if this envelope is empty, never true for averagine envelopes
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// The weight of the peak at the given isotope index, zero beyond the envelope
    pub fn weight(&self, index: usize) -> f64 {
        self.weights.get(index).copied().unwrap_or(0.0)
    }

    /// All weights, monoisotopic first
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Discrete convolution of the two weight series, truncated to the peak cap
fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut result = vec![0.0; (a.len() + b.len() - 1).min(MAX_PEAKS)];
    for (i, x) in a.iter().enumerate() {
        if *x == 0.0 {
            continue;
        }
        for (j, y) in b.iter().enumerate() {
            if i + j >= result.len() {
                break;
            }
            result[i + j] += x * y;
        }
    }
    result
}

/// A write-through cache of predicted envelopes keyed by the monoisotopic
/// mass rounded to 0.1 Da. Safe to read from multiple threads; writes to the
/// same key are idempotent as the model is pure.
#[derive(Debug, Default)]
pub struct PatternCache {
    inner: RwLock<HashMap<u64, Arc<IsotopePattern>>>,
}

impl PatternCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The envelope for the given monoisotopic mass
    ///
    /// # Panics
    /// If the lock was poisoned, which can only happen when another thread
    /// panicked inside the model itself.
    pub fn get(&self, mass: Mass) -> Arc<IsotopePattern> {
        let key = (mass.value.max(0.0) * 10.0).round() as u64;
        if let Some(pattern) = self.inner.read().unwrap().get(&key) {
            return pattern.clone();
        }
        let pattern = Arc::new(IsotopePattern::averagine(da((key as f64) / 10.0)));
        self.inner
            .write()
            .unwrap()
            .entry(key)
            .or_insert(pattern)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilodalton_envelope() {
        let pattern = IsotopePattern::averagine(da(1000.0));
        assert!(pattern.len() >= 3);
        assert!((pattern.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // For a 1 kDa peptide the monoisotopic peak dominates
        assert!(pattern.weight(0) > 0.4 && pattern.weight(0) < 0.7);
        assert!(pattern.weight(0) > pattern.weight(1));
        assert!(pattern.weight(1) > pattern.weight(2));
    }

    #[test]
    fn heavy_envelope_shifts_its_apex() {
        let pattern = IsotopePattern::averagine(da(3000.0));
        // Beyond roughly 1800 Da the first isotope overtakes the monoisotopic peak
        assert!(pattern.weight(1) > pattern.weight(0));
        assert!(pattern.len() > 4);
    }

    #[test]
    fn tiny_mass_still_has_a_peak() {
        let pattern = IsotopePattern::averagine(da(10.0));
        assert!(!pattern.is_empty());
        assert!((pattern.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cache_returns_the_same_pattern() {
        let cache = PatternCache::new();
        let a = cache.get(da(1000.02));
        let b = cache.get(da(1000.04));
        // Both round to the same 0.1 Da key
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get(da(1000.3));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
