//! Frequency estimators
//!
//! Every estimator turns a [`Buffer`] and a sample rate into a frequency in
//! Hz. The set is closed: [`EstimationStrategy`] names each variant and builds
//! the matching instance, and each estimator declares the transform it needs.

use std::fmt;
use std::str::FromStr;

use crate::buffer::Buffer;
use crate::error::BufferError;
use crate::transform::TransformKind;

pub mod hps;
pub mod location;
pub mod yin;

pub use hps::HpsEstimator;
pub use location::{LocationEstimator, PeakRefinement};
pub use yin::YinEstimator;

pub trait Estimator: Send {
    fn transform_kind(&self) -> TransformKind;

    fn estimate_frequency(&self, sample_rate: f32, buffer: &Buffer) -> Result<f32, BufferError>;
}

/// Maps a (possibly fractional) spectrum bin to Hz for a half spectrum of
/// `buffer_count` bins.
pub fn bin_to_frequency(location: f32, sample_rate: f32, buffer_count: usize) -> f32 {
    location * sample_rate / (buffer_count as f32 * 2.0)
}

/// Index of the largest element. Ties resolve to the first occurrence.
pub fn max_index(elements: &[f32]) -> Result<usize, BufferError> {
    if elements.is_empty() {
        return Err(BufferError::EmptyBuffer);
    }

    let mut best: Option<(usize, f32)> = None;
    for (i, &value) in elements.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if value <= max => {}
            _ => best = Some((i, value)),
        }
    }

    best.map(|(i, _)| i).ok_or(BufferError::UnresolvablePeak)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimationStrategy {
    MaxValue,
    Quadratic,
    Barycentric,
    QuinnsFirst,
    QuinnsSecond,
    Jains,
    Hps,
    Yin,
}

impl EstimationStrategy {
    pub const ALL: [EstimationStrategy; 8] = [
        EstimationStrategy::MaxValue,
        EstimationStrategy::Quadratic,
        EstimationStrategy::Barycentric,
        EstimationStrategy::QuinnsFirst,
        EstimationStrategy::QuinnsSecond,
        EstimationStrategy::Jains,
        EstimationStrategy::Hps,
        EstimationStrategy::Yin,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EstimationStrategy::MaxValue => "max-value",
            EstimationStrategy::Quadratic => "quadratic",
            EstimationStrategy::Barycentric => "barycentric",
            EstimationStrategy::QuinnsFirst => "quinns-first",
            EstimationStrategy::QuinnsSecond => "quinns-second",
            EstimationStrategy::Jains => "jains",
            EstimationStrategy::Hps => "hps",
            EstimationStrategy::Yin => "yin",
        }
    }

    /// Builds the estimator with default tuning.
    pub fn estimator(self) -> Box<dyn Estimator> {
        self.estimator_with(hps::DEFAULT_HARMONICS, yin::DEFAULT_THRESHOLD)
    }

    pub fn estimator_with(self, hps_harmonics: usize, yin_threshold: f32) -> Box<dyn Estimator> {
        match self {
            EstimationStrategy::MaxValue => Box::new(LocationEstimator::new(PeakRefinement::MaxValue)),
            EstimationStrategy::Quadratic => {
                Box::new(LocationEstimator::new(PeakRefinement::Quadratic))
            }
            EstimationStrategy::Barycentric => {
                Box::new(LocationEstimator::new(PeakRefinement::Barycentric))
            }
            EstimationStrategy::QuinnsFirst => {
                Box::new(LocationEstimator::new(PeakRefinement::QuinnsFirst))
            }
            EstimationStrategy::QuinnsSecond => {
                Box::new(LocationEstimator::new(PeakRefinement::QuinnsSecond))
            }
            EstimationStrategy::Jains => Box::new(LocationEstimator::new(PeakRefinement::Jains)),
            EstimationStrategy::Hps => Box::new(HpsEstimator::new(hps_harmonics)),
            EstimationStrategy::Yin => Box::new(YinEstimator::new(yin_threshold)),
        }
    }
}

impl Default for EstimationStrategy {
    fn default() -> Self {
        EstimationStrategy::Yin
    }
}

impl fmt::Display for EstimationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = EstimationStrategy::ALL.iter().map(|s| s.name()).collect();
        write!(
            f,
            "unknown estimation strategy '{}', expected one of: {}",
            self.0,
            names.join(", ")
        )
    }
}

impl std::error::Error for UnknownStrategy {}

impl FromStr for EstimationStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        EstimationStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}
