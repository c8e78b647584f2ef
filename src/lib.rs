#![doc = include_str!("../README.md")]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::wildcard_imports,
    clippy::module_name_repetitions,
    clippy::suboptimal_flops,
    clippy::too_many_lines
)]


mod averagine;
mod blacklist;
mod boxes;
mod config;
pub mod error;
mod extender;
mod feature;
mod finder;
mod fitter;
mod helper_functions;
mod map_index;
mod noise;
mod scorer;
mod seeder;
pub mod spectrum;
pub mod system;
mod transform;
mod wavelet;

pub use crate::averagine::{IsotopePattern, PatternCache, AVERAGINE_SPACING, PROTON_MASS};
pub use crate::blacklist::Blacklist;
pub use crate::boxes::{BoxEntry, BoxStateMachine, BoxStatus, BoxTrace, FeatureBox, TracePoint};
pub use crate::config::{CancelToken, Config, Phase, ProgressCallback};
pub use crate::extender::FeatureExtender;
pub use crate::feature::{Feature, HullSlice, IsotopeTrace, Statistics};
pub use crate::finder::FeatureFinder;
pub use crate::fitter::{ElutionFit, ElutionModel, FitError, TraceFitter};
pub use crate::map_index::MapIndex;
pub use crate::noise::{NoiseEstimator, DEFAULT_NOISE_WINDOW};
pub use crate::scorer::{Candidate, ChargeScorer};
pub use crate::seeder::Seeder;
pub use crate::spectrum::{CentroidPeak, Scan, ScanReader, ScanSlice, SpectrumView};
pub use crate::transform::{TransformMode, WaveletSample, WaveletTransform};
pub use crate::wavelet::{IsotopeWavelet, WaveletBank};

#[macro_use]
extern crate uom;
