//! Harmonic product spectrum
//!
//! The magnitude spectrum is decimated by 2, 3, ... K and multiplied into
//! itself, so bins whose integer multiples also carry energy stand out. The
//! product only covers the range where every decimated copy has data.

use crate::buffer::Buffer;
use crate::error::BufferError;
use crate::estimation::{bin_to_frequency, max_index, Estimator};
use crate::transform::TransformKind;

pub const DEFAULT_HARMONICS: usize = 5;

pub struct HpsEstimator {
    harmonics: usize,
}

impl HpsEstimator {
    /// `harmonics` is the largest downsample factor; values below 2 are raised to 2.
    pub fn new(harmonics: usize) -> Self {
        Self {
            harmonics: harmonics.max(2),
        }
    }

    pub fn harmonics(&self) -> usize {
        self.harmonics
    }

    pub fn product_spectrum(&self, spectrum: &[f32]) -> Vec<f32> {
        let count = spectrum.len();
        // Indices i with i * K < count.
        let overlap = ((count + self.harmonics - 1) / self.harmonics).max(1).min(count);

        let mut product = spectrum[..overlap].to_vec();
        for factor in 2..=self.harmonics {
            product
                .iter_mut()
                .zip(spectrum.iter().step_by(factor))
                .for_each(|(p, &s)| *p *= s);
        }
        product
    }
}

impl Default for HpsEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_HARMONICS)
    }
}

impl Estimator for HpsEstimator {
    fn transform_kind(&self) -> TransformKind {
        TransformKind::Fft {
            keep_components: false,
        }
    }

    fn estimate_frequency(&self, sample_rate: f32, buffer: &Buffer) -> Result<f32, BufferError> {
        if buffer.is_empty() {
            return Err(BufferError::EmptyBuffer);
        }

        let product = self.product_spectrum(buffer.elements());
        let location = max_index(&product)?;
        Ok(bin_to_frequency(location as f32, sample_rate, buffer.count()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmonic_spectrum(count: usize, fundamental: usize, harmonics: &[usize]) -> Vec<f32> {
        let mut spectrum = vec![0.01; count];
        spectrum[fundamental] = 1.0;
        for &h in harmonics {
            spectrum[fundamental * h] = 1.0;
        }
        spectrum
    }

    #[test]
    fn test_fundamental_wins_with_exact_harmonics() {
        let spectrum = harmonic_spectrum(64, 10, &[2, 3]);
        let estimator = HpsEstimator::new(4);
        let product = estimator.product_spectrum(&spectrum);

        assert_eq!(product.len(), 16);
        assert_eq!(max_index(&product), Ok(10));

        let buffer = Buffer::new(spectrum);
        let frequency = estimator.estimate_frequency(6400.0, &buffer).unwrap();
        assert!((frequency - bin_to_frequency(10.0, 6400.0, 64)).abs() < 1e-3);
    }

    #[test]
    fn test_fundamental_beats_louder_harmonic() {
        let mut spectrum = harmonic_spectrum(128, 12, &[2, 3, 4, 5]);
        // Second harmonic louder than the fundamental still loses.
        spectrum[24] = 3.0;
        let product = HpsEstimator::default().product_spectrum(&spectrum);
        assert_eq!(max_index(&product), Ok(12));
    }

    #[test]
    fn test_short_spectrum_keeps_one_bin() {
        let estimator = HpsEstimator::new(5);
        let product = estimator.product_spectrum(&[0.5, 0.25]);
        assert_eq!(product, vec![0.5 * 0.5 * 0.5 * 0.5 * 0.5]);
        assert_eq!(HpsEstimator::new(0).harmonics(), 2);
    }
}
