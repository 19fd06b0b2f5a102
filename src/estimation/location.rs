//! Peak-location estimators
//!
//! All variants start from the arg-max bin of the magnitude spectrum and
//! refine it with the bins on either side. A refinement that cannot be
//! computed, or that lands outside the spectrum, falls back to the raw bin.

use crate::buffer::Buffer;
use crate::error::BufferError;
use crate::estimation::{bin_to_frequency, max_index, Estimator};
use crate::transform::TransformKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakRefinement {
    MaxValue,
    Quadratic,
    Barycentric,
    Jains,
    QuinnsFirst,
    QuinnsSecond,
}

impl PeakRefinement {
    /// Quinn's estimators work on the unwindowed complex bins, not on magnitudes.
    pub fn needs_components(self) -> bool {
        matches!(self, PeakRefinement::QuinnsFirst | PeakRefinement::QuinnsSecond)
    }
}

pub struct LocationEstimator {
    refinement: PeakRefinement,
}

impl LocationEstimator {
    pub fn new(refinement: PeakRefinement) -> Self {
        Self { refinement }
    }

    pub fn refinement(&self) -> PeakRefinement {
        self.refinement
    }

    /// Fractional bin index of the spectral peak.
    pub fn estimate_location(&self, buffer: &Buffer) -> Result<f32, BufferError> {
        let elements = buffer.elements();
        let index = max_index(elements)?;

        let offset = match self.refinement {
            PeakRefinement::MaxValue => None,
            PeakRefinement::Quadratic => neighbours(elements, index).map(quadratic_offset),
            PeakRefinement::Barycentric => neighbours(elements, index).map(barycentric_offset),
            PeakRefinement::Jains => neighbours(elements, index).map(jains_offset),
            PeakRefinement::QuinnsFirst => quinn_ratios(buffer, index).map(quinns_first_offset),
            PeakRefinement::QuinnsSecond => {
                quinn_ratios(buffer, index).map(quinns_second_offset)
            }
        };

        Ok(sanitize(index, offset, elements.len()))
    }
}

impl Estimator for LocationEstimator {
    fn transform_kind(&self) -> TransformKind {
        TransformKind::Fft {
            keep_components: self.refinement.needs_components(),
        }
    }

    fn estimate_frequency(&self, sample_rate: f32, buffer: &Buffer) -> Result<f32, BufferError> {
        let location = self.estimate_location(buffer)?;
        Ok(bin_to_frequency(location, sample_rate, buffer.count()))
    }
}

/// Applies `offset` to `index` when the result stays inside `[0, count)`.
pub fn sanitize(index: usize, offset: Option<f32>, count: usize) -> f32 {
    let raw = index as f32;
    match offset {
        Some(p) if p.is_finite() => {
            let location = raw + p;
            if location >= 0.0 && location < count as f32 {
                location
            } else {
                raw
            }
        }
        _ => raw,
    }
}

fn neighbours(elements: &[f32], index: usize) -> Option<(f32, f32, f32)> {
    if index == 0 || index + 1 >= elements.len() {
        return None;
    }
    Some((elements[index - 1], elements[index], elements[index + 1]))
}

fn quadratic_offset((left, center, right): (f32, f32, f32)) -> f32 {
    0.5 * (left - right) / (left - 2.0 * center + right)
}

fn barycentric_offset((left, center, right): (f32, f32, f32)) -> f32 {
    (right - left) / (left + center + right)
}

fn jains_offset((left, center, right): (f32, f32, f32)) -> f32 {
    if left > right {
        -left / (center + left)
    } else {
        right / (center + right)
    }
}

/// Real parts of `X[k+1]/X[k]` and `X[k-1]/X[k]`.
fn quinn_ratios(buffer: &Buffer, index: usize) -> Option<(f32, f32)> {
    let (re, im) = match (buffer.real_elements(), buffer.imag_elements()) {
        (Some(re), Some(im)) => (re, im),
        _ => {
            log::debug!("Quinn refinement skipped: buffer has no complex components");
            return None;
        }
    };

    if index == 0 || index + 1 >= re.len() {
        return None;
    }

    let power = re[index] * re[index] + im[index] * im[index];
    if power == 0.0 {
        return None;
    }

    let ap = (re[index + 1] * re[index] + im[index + 1] * im[index]) / power;
    let am = (re[index - 1] * re[index] + im[index - 1] * im[index]) / power;
    Some((ap, am))
}

fn quinns_first_offset((ap, am): (f32, f32)) -> f32 {
    let dp = -ap / (1.0 - ap);
    let dm = am / (1.0 - am);
    if dp > 0.0 && dm > 0.0 {
        dp
    } else {
        dm
    }
}

fn quinns_second_offset((ap, am): (f32, f32)) -> f32 {
    let dp = -ap / (1.0 - ap);
    let dm = am / (1.0 - am);
    (dp + dm) / 2.0 + quinn_tau(dp * dp) - quinn_tau(dm * dm)
}

fn quinn_tau(x: f32) -> f32 {
    let root = (2.0f32 / 3.0).sqrt();
    0.25 * (3.0 * x * x + 6.0 * x + 1.0).ln()
        - 6.0f32.sqrt() / 24.0 * ((x + 1.0 - root) / (x + 1.0 + root)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PeakRefinement; 6] = [
        PeakRefinement::MaxValue,
        PeakRefinement::Quadratic,
        PeakRefinement::Barycentric,
        PeakRefinement::Jains,
        PeakRefinement::QuinnsFirst,
        PeakRefinement::QuinnsSecond,
    ];

    /// Magnitudes with one dominant bin, plus complex components whose
    /// neighbours alternate in sign the way an off-bin tone's DFT does.
    fn peaked_buffer(elements: Vec<f32>, peak: usize) -> Buffer {
        let real = elements
            .iter()
            .enumerate()
            .map(|(i, &v)| if (i as isize - peak as isize) % 2 == 0 { v } else { -v })
            .collect();
        let imag = vec![0.0; elements.len()];
        Buffer::with_components(elements, real, imag)
    }

    #[test]
    fn test_refined_location_stays_near_peak() {
        let spectra = [
            (vec![0.0, 0.1, 0.4, 1.0, 0.7, 0.1, 0.0], 3),
            (vec![0.0, 0.1, 0.8, 1.0, 0.2, 0.1, 0.0], 3),
            (vec![0.2, 0.9, 0.3, 0.1], 1),
        ];

        for (elements, peak) in spectra.iter() {
            let buffer = peaked_buffer(elements.clone(), *peak);
            for refinement in ALL {
                let location = LocationEstimator::new(refinement)
                    .estimate_location(&buffer)
                    .unwrap();
                assert!(
                    (location - *peak as f32).abs() <= 1.0,
                    "{:?} moved peak {} to {}",
                    refinement,
                    peak,
                    location
                );
            }
        }
    }

    #[test]
    fn test_refinement_moves_toward_larger_neighbour() {
        let buffer = peaked_buffer(vec![0.0, 0.1, 0.4, 1.0, 0.7, 0.1, 0.0], 3);
        for refinement in [
            PeakRefinement::Quadratic,
            PeakRefinement::Barycentric,
            PeakRefinement::Jains,
        ] {
            let location = LocationEstimator::new(refinement)
                .estimate_location(&buffer)
                .unwrap();
            assert!(location > 3.0, "{:?} gave {}", refinement, location);
        }
    }

    #[test]
    fn test_refinement_improves_on_off_bin_tones() {
        use crate::transform::Transformer;

        // 8 Hz per bin: 803 Hz sits on bin 100.375, 1010 Hz on bin 126.25.
        let sample_rate = 8192.0;
        for &frequency in &[803.0f32, 1010.0] {
            let samples: Vec<f32> = (0..1024)
                .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin())
                .collect();
            let buffer = Transformer::new(TransformKind::Fft {
                keep_components: true,
            })
            .transform(&samples)
            .unwrap();

            let error = |refinement| {
                let estimate = LocationEstimator::new(refinement)
                    .estimate_frequency(sample_rate, &buffer)
                    .unwrap();
                (estimate - frequency).abs()
            };

            let unrefined = error(PeakRefinement::MaxValue);
            for refinement in ALL {
                let refined = error(refinement);
                assert!(
                    refined <= unrefined + 1e-3,
                    "{:?} is off by {} Hz at {} Hz, the raw bin by {} Hz",
                    refinement,
                    refined,
                    frequency,
                    unrefined
                );
            }
            for refinement in [PeakRefinement::QuinnsFirst, PeakRefinement::QuinnsSecond] {
                assert!(error(refinement) < 0.5, "{:?} at {} Hz", refinement, frequency);
            }
        }
    }

    #[test]
    fn test_max_value_keeps_integer_bin() {
        let buffer = Buffer::new(vec![0.1, 0.3, 0.2]);
        let location = LocationEstimator::new(PeakRefinement::MaxValue)
            .estimate_location(&buffer)
            .unwrap();
        assert_eq!(location, 1.0);
    }

    #[test]
    fn test_quadratic_formula() {
        // Samples of -(x - 0.25)^2 + 4 at x = -1, 0, 1.
        let offset = quadratic_offset((4.0 - 1.5625, 4.0 - 0.0625, 4.0 - 0.5625));
        assert!((offset - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_edge_peaks_are_not_refined() {
        let first = Buffer::new(vec![1.0, 0.5, 0.1]);
        let last = Buffer::new(vec![0.1, 0.5, 1.0]);
        for refinement in ALL {
            let estimator = LocationEstimator::new(refinement);
            assert_eq!(estimator.estimate_location(&first), Ok(0.0));
            assert_eq!(estimator.estimate_location(&last), Ok(2.0));
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(1, Some(0.25), 3), 1.25);
        assert_eq!(sanitize(2, Some(0.5), 3), 2.5);
        assert_eq!(sanitize(2, Some(1.2), 3), 2.0);
        assert_eq!(sanitize(0, Some(-0.3), 3), 0.0);
        assert_eq!(sanitize(1, Some(f32::NAN), 3), 1.0);
        assert_eq!(sanitize(1, None, 3), 1.0);
    }

    #[test]
    fn test_quinn_without_components_uses_raw_bin() {
        let buffer = Buffer::new(vec![0.0, 0.4, 1.0, 0.7, 0.0]);
        for refinement in [PeakRefinement::QuinnsFirst, PeakRefinement::QuinnsSecond] {
            let location = LocationEstimator::new(refinement)
                .estimate_location(&buffer)
                .unwrap();
            assert_eq!(location, 2.0);
        }
    }

    #[test]
    fn test_frequency_uses_bin_mapping() {
        let mut elements = vec![0.0; 2048];
        elements[100] = 1.0;
        let buffer = Buffer::new(elements);
        let frequency = LocationEstimator::new(PeakRefinement::MaxValue)
            .estimate_frequency(44100.0, &buffer)
            .unwrap();
        assert!((frequency - 1076.66).abs() < 0.01);
    }
}
