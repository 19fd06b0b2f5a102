//! Frame transforms
//!
//! Turns a raw audio frame into a [`Buffer`] for an estimator: either a
//! Hann-windowed magnitude spectrum computed with a real FFT, or the raw
//! time-domain samples.

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::BufferError;

/// Which transform an estimator needs. Chosen once per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Fft { keep_components: bool },
    Passthrough,
}

pub enum Transformer {
    Fft(FftTransformer),
    Passthrough,
}

impl Transformer {
    pub fn new(kind: TransformKind) -> Self {
        match kind {
            TransformKind::Fft { keep_components } => {
                Transformer::Fft(FftTransformer::new(keep_components))
            }
            TransformKind::Passthrough => Transformer::Passthrough,
        }
    }

    pub fn kind(&self) -> TransformKind {
        match self {
            Transformer::Fft(fft) => TransformKind::Fft {
                keep_components: fft.keep_components,
            },
            Transformer::Passthrough => TransformKind::Passthrough,
        }
    }

    pub fn transform(&mut self, samples: &[f32]) -> Result<Buffer, BufferError> {
        if samples.is_empty() {
            return Err(BufferError::MissingSamples);
        }

        match self {
            Transformer::Fft(fft) => fft.transform(samples),
            Transformer::Passthrough => Ok(Buffer::new(samples.to_vec())),
        }
    }
}

/// Largest power of two that is not greater than `len`.
pub fn power_of_two_floor(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - len.leading_zeros())
    }
}

/// Forward real FFT with a cached plan and Hann window. The plan is rebuilt
/// only when the frame length changes.
pub struct FftTransformer {
    fft: Option<Arc<dyn RealToComplex<f32>>>,
    window: Vec<f32>,
    keep_components: bool,
}

impl FftTransformer {
    pub fn new(keep_components: bool) -> Self {
        Self {
            fft: None,
            window: Vec::new(),
            keep_components,
        }
    }

    fn prepare(&mut self, size: usize) -> Arc<dyn RealToComplex<f32>> {
        match &self.fft {
            Some(fft) if fft.len() == size => fft.clone(),
            _ => {
                let fft = RealFftPlanner::<f32>::new().plan_fft_forward(size);
                self.window = hann_window(size);
                self.fft = Some(fft.clone());
                fft
            }
        }
    }

    pub fn transform(&mut self, samples: &[f32]) -> Result<Buffer, BufferError> {
        let size = power_of_two_floor(samples.len());
        if size < 2 {
            return Ok(Buffer::new(Vec::new()));
        }

        let fft = self.prepare(size);

        let mut input: Vec<f32> = samples
            .iter()
            .take(size)
            .zip(self.window.iter())
            .map(|(sample, window)| sample * window)
            .collect();

        let spectrum = forward(fft.as_ref(), &mut input)?;

        // Drop the Nyquist bin to keep exactly N/2 bins.
        let bins = &spectrum[..size / 2];
        let scale = 2.0 / size as f32;

        let magnitudes: Vec<f32> = bins
            .iter()
            .map(|complex| (complex.re * complex.re + complex.im * complex.im).sqrt() * scale)
            .collect();

        if !self.keep_components {
            return Ok(Buffer::new(magnitudes));
        }

        // Quinn's estimators are derived for a rectangular window, so the
        // components come from the unwindowed frame.
        let mut raw = samples[..size].to_vec();
        let raw_spectrum = forward(fft.as_ref(), &mut raw)?;
        let raw_bins = &raw_spectrum[..size / 2];
        let real = raw_bins.iter().map(|c| c.re * scale).collect();
        let imag = raw_bins.iter().map(|c| c.im * scale).collect();
        Ok(Buffer::with_components(magnitudes, real, imag))
    }
}

fn forward(
    fft: &dyn RealToComplex<f32>,
    input: &mut [f32],
) -> Result<Vec<Complex<f32>>, BufferError> {
    let len = input.len();
    let mut spectrum = fft.make_output_vec();
    fft.process(input, &mut spectrum).map_err(|err| {
        log::warn!("FFT failed on a {} sample frame: {}", len, err);
        BufferError::MissingSamples
    })?;
    Ok(spectrum)
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos())
        })
        .collect()
}
