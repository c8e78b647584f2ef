//! Handle the configuration of the feature finder

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Context, CustomError};
use crate::fitter::ElutionModel;

/// All recognised configuration keys, used for validation and suggestions
const KNOWN_KEYS: &[&str] = &[
    "min_charge",
    "max_charge",
    "mz_tolerance_ppm",
    "rt_interleave",
    "min_rt_votes",
    "min_mono_length",
    "isotope_correlation_threshold",
    "score_threshold",
    "check_ppm",
    "high_res",
    "q_min",
    "trace_model",
    "cutoff_amplitude_factor",
    "seed_min_intensity",
    "seed_signal_to_noise",
    "hull_points",
];

/// The configuration of a feature finding run, validated once on entry.
/// All options have sensible defaults; use the builder style methods or set
/// the fields directly.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The lowest charge hypothesis tested
    pub min_charge: u8,
    /// The highest charge hypothesis tested
    pub max_charge: u8,
    /// The relative peak match tolerance during envelope matching and trace extension
    pub mz_tolerance_ppm: f64,
    /// The number of consecutive missing scans tolerated in the monoisotopic trace
    pub rt_interleave: u32,
    /// The minimal number of scans a feature has to span
    pub min_rt_votes: u32,
    /// The minimal number of points in the monoisotopic trace
    pub min_mono_length: u32,
    /// The minimal correlation between the observed intensities and the predicted envelope
    pub isotope_correlation_threshold: f32,
    /// The absolute floor on the wavelet response
    pub score_threshold: f32,
    /// Check candidates against the peptide mass rule
    pub check_ppm: bool,
    /// Use the grid resampled high resolution transform path
    pub high_res: bool,
    /// The minimal fit quality for a feature to be emitted
    pub q_min: f32,
    /// The elution profile model
    pub trace_model: ElutionModel,
    /// When set, prune wavelet responses below `mean + factor * sd` of the
    /// scan's positive responses
    pub cutoff_amplitude_factor: Option<f32>,
    /// The absolute intensity floor for seeds
    pub seed_min_intensity: f32,
    /// The minimal signal to noise ratio for seeds, against a median noise
    /// estimate over a sliding m/z window; zero disables the filter
    pub seed_signal_to_noise: f32,
    /// Attach convex hulls to the emitted features
    pub hull_points: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_charge: 1,
            max_charge: 4,
            mz_tolerance_ppm: 10.0,
            rt_interleave: 2,
            min_rt_votes: 3,
            min_mono_length: 3,
            isotope_correlation_threshold: 0.6,
            score_threshold: 0.0,
            check_ppm: false,
            high_res: false,
            q_min: 0.5,
            trace_model: ElutionModel::Emg,
            cutoff_amplitude_factor: None,
            seed_min_intensity: 0.0,
            seed_signal_to_noise: 0.0,
            hull_points: true,
        }
    }
}

/// Builder style methods
impl Config {
    /// Set both ends of the tested charge range
    #[must_use]
    pub const fn charge_range(mut self, min: u8, max: u8) -> Self {
        self.min_charge = min;
        self.max_charge = max;
        self
    }

    /// Set the relative peak match tolerance
    #[must_use]
    pub const fn mz_tolerance_ppm(mut self, value: f64) -> Self {
        self.mz_tolerance_ppm = value;
        self
    }

    /// Set the number of tolerated consecutive gaps
    #[must_use]
    pub const fn rt_interleave(mut self, value: u32) -> Self {
        self.rt_interleave = value;
        self
    }

    /// Set the minimal number of scans a feature has to span
    #[must_use]
    pub const fn min_rt_votes(mut self, value: u32) -> Self {
        self.min_rt_votes = value;
        self
    }

    /// Set the minimal length of the monoisotopic trace
    #[must_use]
    pub const fn min_mono_length(mut self, value: u32) -> Self {
        self.min_mono_length = value;
        self
    }

    /// Set the minimal envelope correlation
    #[must_use]
    pub const fn isotope_correlation_threshold(mut self, value: f32) -> Self {
        self.isotope_correlation_threshold = value;
        self
    }

    /// Set the absolute wavelet response floor
    #[must_use]
    pub const fn score_threshold(mut self, value: f32) -> Self {
        self.score_threshold = value;
        self
    }

    /// Enable or disable the peptide mass rule check
    #[must_use]
    pub const fn check_ppm(mut self, value: bool) -> Self {
        self.check_ppm = value;
        self
    }

    /// Enable or disable the high resolution transform path
    #[must_use]
    pub const fn high_res(mut self, value: bool) -> Self {
        self.high_res = value;
        self
    }

    /// Set the minimal fit quality for emission
    #[must_use]
    pub const fn q_min(mut self, value: f32) -> Self {
        self.q_min = value;
        self
    }

    /// Set the elution profile model
    #[must_use]
    pub const fn trace_model(mut self, value: ElutionModel) -> Self {
        self.trace_model = value;
        self
    }

    /// Set the amplitude cutoff factor
    #[must_use]
    pub const fn cutoff_amplitude_factor(mut self, value: Option<f32>) -> Self {
        self.cutoff_amplitude_factor = value;
        self
    }

    /// Set the absolute intensity floor for seeds
    #[must_use]
    pub const fn seed_min_intensity(mut self, value: f32) -> Self {
        self.seed_min_intensity = value;
        self
    }

    /// Set the minimal signal to noise ratio for seeds
    #[must_use]
    pub const fn seed_signal_to_noise(mut self, value: f32) -> Self {
        self.seed_signal_to_noise = value;
        self
    }

    /// Enable or disable convex hulls on the emitted features
    #[must_use]
    pub const fn hull_points(mut self, value: bool) -> Self {
        self.hull_points = value;
        self
    }
}

impl Config {
    /// Validate this configuration. No work is performed on an invalid
    /// configuration, the first violated rule is reported.
    ///
    /// # Errors
    /// A [`CustomError`] naming the offending parameter and the violated rule.
    pub fn validate(&self) -> Result<(), CustomError> {
        if self.min_charge == 0 {
            return Err(CustomError::error(
                "Invalid charge range",
                "The minimal charge has to be at least one",
                Context::parameter("min_charge", self.min_charge),
            ));
        }
        if self.min_charge > self.max_charge {
            return Err(CustomError::error(
                "Invalid charge range",
                "The minimal charge has to be at most the maximal charge",
                Context::parameter("max_charge", self.max_charge),
            ));
        }
        if !self.mz_tolerance_ppm.is_finite() || self.mz_tolerance_ppm < 0.0 {
            return Err(CustomError::error(
                "Invalid tolerance",
                "The m/z tolerance has to be a finite non negative number",
                Context::parameter("mz_tolerance_ppm", self.mz_tolerance_ppm),
            ));
        }
        if !self.isotope_correlation_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.isotope_correlation_threshold)
        {
            return Err(CustomError::error(
                "Invalid threshold",
                "The envelope correlation threshold has to be a correlation, between minus one and one",
                Context::parameter(
                    "isotope_correlation_threshold",
                    self.isotope_correlation_threshold,
                ),
            ));
        }
        if !self.score_threshold.is_finite() || self.score_threshold < 0.0 {
            return Err(CustomError::error(
                "Invalid threshold",
                "The score threshold has to be a finite non negative number",
                Context::parameter("score_threshold", self.score_threshold),
            ));
        }
        if !self.q_min.is_finite() || !(0.0..=1.0).contains(&self.q_min) {
            return Err(CustomError::error(
                "Invalid threshold",
                "The minimal fit quality has to lie between zero and one",
                Context::parameter("q_min", self.q_min),
            ));
        }
        if let Some(factor) = self.cutoff_amplitude_factor {
            if !factor.is_finite() || factor < 0.0 {
                return Err(CustomError::error(
                    "Invalid threshold",
                    "The amplitude cutoff factor has to be a finite non negative number",
                    Context::parameter("cutoff_amplitude_factor", factor),
                ));
            }
        }
        if !self.seed_min_intensity.is_finite() || self.seed_min_intensity < 0.0 {
            return Err(CustomError::error(
                "Invalid threshold",
                "The seed intensity floor has to be a finite non negative number",
                Context::parameter("seed_min_intensity", self.seed_min_intensity),
            ));
        }
        if !self.seed_signal_to_noise.is_finite() || self.seed_signal_to_noise < 0.0 {
            return Err(CustomError::error(
                "Invalid threshold",
                "The seed signal to noise floor has to be a finite non negative number",
                Context::parameter("seed_signal_to_noise", self.seed_signal_to_noise),
            ));
        }
        Ok(())
    }

    /// Build a configuration from string key value pairs, as handed over by
    /// parameter files or command lines. Unknown keys are rejected, there
    /// are no implicit defaults for unrecognised parameters. The resulting
    /// configuration is validated.
    ///
    /// # Errors
    /// A [`CustomError`] for the first unknown key, unparsable value, or
    /// violated validation rule.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, CustomError> {
        let mut config = Self::default();
        for (key, value) in pairs {
            match key {
                "min_charge" => config.min_charge = parse(key, value)?,
                "max_charge" => config.max_charge = parse(key, value)?,
                "mz_tolerance_ppm" => config.mz_tolerance_ppm = parse(key, value)?,
                "rt_interleave" => config.rt_interleave = parse(key, value)?,
                "min_rt_votes" => config.min_rt_votes = parse(key, value)?,
                "min_mono_length" => config.min_mono_length = parse(key, value)?,
                "isotope_correlation_threshold" => {
                    config.isotope_correlation_threshold = parse(key, value)?;
                }
                "score_threshold" => config.score_threshold = parse(key, value)?,
                "check_ppm" => config.check_ppm = parse(key, value)?,
                "high_res" => config.high_res = parse(key, value)?,
                "q_min" => config.q_min = parse(key, value)?,
                "trace_model" => {
                    config.trace_model = match value.to_ascii_lowercase().as_str() {
                        "gauss" | "gaussian" => ElutionModel::Gauss,
                        "emg" => ElutionModel::Emg,
                        _ => {
                            return Err(CustomError::error(
                                "Invalid value",
                                "The elution model has to be 'gauss' or 'emg'",
                                Context::parameter(key, value),
                            ))
                        }
                    };
                }
                "cutoff_amplitude_factor" => {
                    config.cutoff_amplitude_factor = if value.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        Some(parse(key, value)?)
                    };
                }
                "seed_min_intensity" => config.seed_min_intensity = parse(key, value)?,
                "seed_signal_to_noise" => config.seed_signal_to_noise = parse(key, value)?,
                "hull_points" => config.hull_points = parse(key, value)?,
                _ => {
                    return Err(CustomError::error(
                        "Unknown parameter",
                        "This parameter is not recognised",
                        Context::parameter(key, value),
                    )
                    .with_suggestions(
                        KNOWN_KEYS
                            .iter()
                            .filter(|known| {
                                known
                                    .split('_')
                                    .any(|part| key.split('_').any(|given| part == given))
                            })
                            .copied(),
                    ))
                }
            }
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parse a single value, reporting the key on failure
fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CustomError> {
    value.parse().map_err(|_| {
        CustomError::error(
            "Invalid value",
            format!(
                "This value cannot be parsed as a {}",
                std::any::type_name::<T>()
            ),
            Context::parameter(key, value),
        )
    })
}

/// An external cancellation signal, checked at every scan boundary and every
/// box closure. Cheap to clone and safe to trip from any thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new token in the not cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token, every run holding it returns at its next check
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    /// Check if the token was tripped
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

/// The phase a progress report belongs to
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum Phase {
    /// The per scan wavelet transform and scoring
    Transform,
    /// The per box trace fitting
    Fit,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Transform => "transform",
                Self::Fit => "fit",
            }
        )
    }
}

/// A purely observational progress callback as `(phase, done, total)`
pub type ProgressCallback = Box<dyn Fn(Phase, usize, usize) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_charge, 1);
        assert_eq!(config.max_charge, 4);
        assert!((config.mz_tolerance_ppm - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.rt_interleave, 2);
        assert_eq!(config.min_rt_votes, 3);
        assert_eq!(config.trace_model, ElutionModel::Emg);
        assert!(!config.check_ppm);
        assert!(!config.high_res);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(Config::default().charge_range(0, 4).validate().is_err());
        assert!(Config::default().charge_range(3, 2).validate().is_err());
        assert!(Config::default().mz_tolerance_ppm(-1.0).validate().is_err());
        assert!(Config::default().mz_tolerance_ppm(f64::NAN).validate().is_err());
        assert!(Config::default()
            .isotope_correlation_threshold(1.5)
            .validate()
            .is_err());
        assert!(Config::default().q_min(2.0).validate().is_err());
        assert!(Config::default()
            .cutoff_amplitude_factor(Some(-1.0))
            .validate()
            .is_err());
    }

    #[test]
    fn pairs_round_trip() {
        let config = Config::from_pairs([
            ("min_charge", "2"),
            ("max_charge", "3"),
            ("trace_model", "gauss"),
            ("check_ppm", "true"),
            ("mz_tolerance_ppm", "5.5"),
        ])
        .unwrap();
        assert_eq!(config.min_charge, 2);
        assert_eq!(config.max_charge, 3);
        assert_eq!(config.trace_model, ElutionModel::Gauss);
        assert!(config.check_ppm);
        assert!((config.mz_tolerance_ppm - 5.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Config::from_pairs([("min_chrage", "2")]).unwrap_err();
        assert_eq!(error.short_description(), "Unknown parameter");
        // The suggestion machinery points at the similar known key
        assert!(format!("{error}").contains("min_charge"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_pairs([("min_charge", "two")]).is_err());
        assert!(Config::from_pairs([("trace_model", "bigauss")]).is_err());
        // Validation runs over the parsed result as well
        assert!(Config::from_pairs([("min_charge", "4"), ("max_charge", "2")]).is_err());
    }
}
