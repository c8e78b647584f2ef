//! The isotope wavelet: the convolution kernel derived from the averagine envelope

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::averagine::{IsotopePattern, PatternCache, AVERAGINE_SPACING, PROTON_MASS};
use crate::helper_functions::linear_interpolation;
use crate::system::f64::*;

/// The width of the reference mass buckets the kernels are cached under, in Da
const MASS_BUCKET: f64 = 50.0;

/// The lowest reference mass a kernel is built for, to keep tiny m/z values
/// from producing degenerate envelopes
const MIN_REFERENCE_MASS: f64 = 50.0;

/// A tabulated isotope wavelet for one charge state and one reference mass.
/// The kernel is a cosine with the isotope peak spacing of the charge state,
/// shaped by the averagine envelope at the reference mass, normalised to zero
/// mean and unit L2 norm.
#[derive(Clone, Debug)]
pub struct IsotopeWavelet {
    charge: u8,
    step: f64,
    half_support: f64,
    table: Vec<f64>,
}

impl IsotopeWavelet {
    /// Tabulate the kernel for the given envelope and charge with the given step
    pub fn new(pattern: &IsotopePattern, charge: u8, step: f64) -> Self {
        let spacing = AVERAGINE_SPACING / f64::from(charge);
        let half_support = spacing * (pattern.len() as f64 + 2.0);
        let len = (2.0 * half_support / step).ceil() as usize + 1;
        let mut table = (0..len)
            .map(|index| {
                let x = (index as f64).mul_add(step, -half_support);
                (std::f64::consts::TAU * x / spacing).cos() * envelope(pattern, x, spacing)
            })
            .collect::<Vec<_>>();

        let mean = table.iter().sum::<f64>() / table.len() as f64;
        for value in &mut table {
            *value -= mean;
        }
        let norm = (table.iter().map(|value| value * value).sum::<f64>() * step).sqrt();
        if norm > 0.0 {
            for value in &mut table {
                *value /= norm;
            }
        }

        Self {
            charge,
            step,
            half_support,
            table,
        }
    }

    /// The charge state this kernel was built for
    pub const fn charge(&self) -> u8 {
        self.charge
    }

    /// Half of the m/z support of this kernel
    pub const fn half_support(&self) -> f64 {
        self.half_support
    }

    /// Evaluate the kernel at the given m/z offset, zero outside the support
    pub fn value(&self, offset: f64) -> f64 {
        if offset.abs() >= self.half_support {
            return 0.0;
        }
        let position = (offset + self.half_support) / self.step;
        let index = position.floor() as usize;
        if index + 1 >= self.table.len() {
            return *self.table.last().unwrap_or(&0.0);
        }
        let fraction = position - position.floor();
        self.table[index].mul_add(1.0 - fraction, self.table[index + 1] * fraction)
    }
}

/// The averagine envelope interpolated over continuous m/z offsets: linear
/// between the isotope peaks, ramping to zero half a spacing before the
/// monoisotopic peak and half a spacing after the last one
fn envelope(pattern: &IsotopePattern, x: f64, spacing: f64) -> f64 {
    let last = (pattern.len() - 1) as f64 * spacing;
    if x < -0.5 * spacing || x > last + 0.5 * spacing {
        0.0
    } else if x < 0.0 {
        linear_interpolation(-0.5 * spacing, 0.0, 0.0, pattern.weight(0), x)
    } else if x > last {
        linear_interpolation(last, pattern.weight(pattern.len() - 1), last + 0.5 * spacing, 0.0, x)
    } else {
        let index = (x / spacing).floor() as usize;
        linear_interpolation(
            index as f64 * spacing,
            pattern.weight(index),
            (index + 1) as f64 * spacing,
            pattern.weight(index + 1),
            x,
        )
    }
}

/// A cache of tabulated kernels per (charge, reference mass bucket), so the
/// envelope tracks the mass region of every response position without
/// retabulating per peak
#[derive(Debug)]
pub struct WaveletBank {
    step: f64,
    patterns: Arc<PatternCache>,
    kernels: RwLock<HashMap<(u8, u64), Arc<IsotopeWavelet>>>,
}

impl WaveletBank {
    /// Create a new bank with the given tabulation step (a quarter of the
    /// map's minimal m/z spacing) over the given envelope cache
    pub fn new(step: f64, patterns: Arc<PatternCache>) -> Self {
        Self {
            step,
            patterns,
            kernels: RwLock::new(HashMap::new()),
        }
    }

    /// The tabulation step of the kernels in this bank
    pub const fn step(&self) -> f64 {
        self.step
    }

    /// The kernel for the given charge state at the given m/z position
    ///
    /// # Panics
    /// If the lock was poisoned, which can only happen when another thread
    /// panicked inside the model itself.
    pub fn kernel(&self, charge: u8, mz_value: f64) -> Arc<IsotopeWavelet> {
        let mass = ((mz_value - PROTON_MASS) * f64::from(charge)).max(MIN_REFERENCE_MASS);
        let bucket = (mass / MASS_BUCKET).floor() as u64;
        if let Some(kernel) = self.kernels.read().unwrap().get(&(charge, bucket)) {
            return kernel.clone();
        }
        let reference = (bucket as f64 + 0.5) * MASS_BUCKET;
        let pattern = self.patterns.get(da(reference));
        let kernel = Arc::new(IsotopeWavelet::new(&pattern, charge, self.step));
        self.kernels
            .write()
            .unwrap()
            .entry((charge, bucket))
            .or_insert(kernel)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(charge: u8) -> IsotopeWavelet {
        let pattern = IsotopePattern::averagine(da(1000.0));
        IsotopeWavelet::new(&pattern, charge, 0.001)
    }

    #[test]
    fn normalisation() {
        let kernel = kernel(2);
        let sum: f64 = kernel.table.iter().sum();
        assert!((sum / kernel.table.len() as f64).abs() < 1e-9);
        let l2: f64 = kernel.table.iter().map(|v| v * v).sum::<f64>() * kernel.step;
        assert!((l2 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn support() {
        let kernel = kernel(2);
        assert!(kernel.value(kernel.half_support() + 0.1).abs() < f64::EPSILON);
        assert!(kernel.value(-kernel.half_support() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn peaks_align_with_the_isotope_spacing() {
        let kernel = kernel(2);
        let spacing = AVERAGINE_SPACING / 2.0;
        // Positive lobes at the isotope positions, negative in between
        assert!(kernel.value(0.0) > 0.0);
        assert!(kernel.value(spacing) > 0.0);
        assert!(kernel.value(spacing / 2.0) < 0.0);
    }

    #[test]
    fn higher_charge_narrows_the_kernel() {
        assert!(kernel(3).half_support() < kernel(1).half_support());
    }

    #[test]
    fn bank_caches_per_bucket() {
        let bank = WaveletBank::new(0.001, Arc::new(PatternCache::new()));
        let a = bank.kernel(2, 500.25);
        let b = bank.kernel(2, 500.30);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &bank.kernel(3, 500.25)));
    }
}
