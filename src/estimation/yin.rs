//! The YIN estimator, based on *YIN, a fundamental frequency estimator for
//! speech and music* (de Cheveigné & Kawahara, 2002).
//!
//! Works on the raw time-domain frame. Lags run up to just past half the
//! frame, and the window is what is left of the frame after the largest lag:
//!
//! > d(t) = sum_{i=0}^{w-1} (x_i - x_{i+t})^2,  w = N - t_max
//!
//! so any period up to half the frame length can be measured and refined.
//! d(t) is normalised into the cumulative mean normalised difference d'(t),
//! and the first local minimum below an absolute threshold is picked, falling
//! back to the global minimum. The chosen lag is refined with parabolic
//! interpolation.
//!
//! The difference function is computed with an FFT cross-correlation, so the
//! cost is O(N log N) in the frame length.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner, Length};
use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;
use crate::error::BufferError;
use crate::estimation::Estimator;
use crate::transform::TransformKind;

/// The YIN paper uses 0.1; TarsosDSP uses 0.2.
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// Lags computed beyond half the frame, so a period of exactly half the
/// frame still has a neighbour on each side for interpolation.
const LAG_MARGIN: usize = 2;

/// Smallest window the difference function is evaluated over.
const MIN_WINDOW: usize = 3;

/// Forward and inverse plans for one frame length.
#[derive(Clone)]
struct CorrelationPlans {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl CorrelationPlans {
    fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    fn len(&self) -> usize {
        self.forward.len()
    }
}

pub struct YinEstimator {
    threshold: f32,
    plans: Mutex<Option<CorrelationPlans>>,
}

impl YinEstimator {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            plans: Mutex::new(None),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Plans for `size`, rebuilt only when the frame length changes.
    fn plans(&self, size: usize) -> CorrelationPlans {
        let mut cached = self.plans.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match cached.as_ref() {
            Some(plans) if plans.len() == size => plans.clone(),
            _ => {
                let plans = CorrelationPlans::new(size);
                *cached = Some(plans.clone());
                plans
            }
        }
    }

    /// Lag of the first dip below the threshold, walked down to its local
    /// minimum, or the global minimum when nothing dips low enough.
    fn pick_lag(&self, cmnd: &[f32]) -> Option<usize> {
        let len = cmnd.len();

        let mut tau = 2;
        while tau < len {
            if cmnd[tau] < self.threshold {
                while tau + 1 < len && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }

        cmnd.iter()
            .enumerate()
            .skip(1)
            .filter(|(_, v)| v.is_finite())
            .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
                Some((_, min)) if v >= min => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
    }
}

impl Default for YinEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Estimator for YinEstimator {
    fn transform_kind(&self) -> TransformKind {
        TransformKind::Passthrough
    }

    fn estimate_frequency(&self, sample_rate: f32, buffer: &Buffer) -> Result<f32, BufferError> {
        let signal = buffer.elements();
        if signal.is_empty() {
            return Err(BufferError::EmptyBuffer);
        }

        let max_lag = max_lag(signal.len()).ok_or(BufferError::UnresolvablePeak)?;
        let power = square_sum(signal);
        if power == 0.0 || !power.is_finite() {
            return Err(BufferError::UnresolvablePeak);
        }

        let plans = self.plans(signal.len());
        let mut cmnd = correlate_difference(signal, max_lag, &plans);
        cumulative_mean_normalize(&mut cmnd);

        let tau = self.pick_lag(&cmnd).ok_or(BufferError::UnresolvablePeak)?;
        let lag = parabolic_interpolation(&cmnd, tau);

        if lag <= 0.0 || !lag.is_finite() {
            return Err(BufferError::UnresolvablePeak);
        }
        Ok(sample_rate / lag)
    }
}

/// Largest lag searched for a frame of `len` samples, or `None` when the
/// frame is too short to leave a usable window.
pub fn max_lag(len: usize) -> Option<usize> {
    let max_lag = len / 2 + LAG_MARGIN;
    if len < max_lag + MIN_WINDOW {
        None
    } else {
        Some(max_lag)
    }
}

fn square_sum(signal: &[f32]) -> f32 {
    signal.iter().map(|&s| s * s).sum()
}

/// d(t) for t in `0..=max_lag`, over a window of `signal.len() - max_lag`
/// samples.
pub fn difference_function(signal: &[f32], max_lag: usize) -> Vec<f32> {
    correlate_difference(signal, max_lag, &CorrelationPlans::new(signal.len()))
}

fn correlate_difference(signal: &[f32], max_lag: usize, plans: &CorrelationPlans) -> Vec<f32> {
    assert!(
        max_lag < signal.len(),
        "The largest lag must be shorter than the signal"
    );

    let size = signal.len();
    let window = size - max_lag;

    // Cross-correlate the signal with its first `window` samples. Every
    // product x_i * x_{i+t} with i < window and t <= max_lag stays inside
    // the frame, so the circular correlation never wraps.
    let mut full: Vec<Complex<f32>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
    let mut truncated: Vec<Complex<f32>> = (0..size)
        .map(|i| Complex::new(if i < window { signal[i] } else { 0.0 }, 0.0))
        .collect();

    plans.forward.process(&mut full);
    plans.forward.process(&mut truncated);

    // rustfft does not normalise, so scale once for the forward/inverse pair.
    let normalization = 1.0 / size as f32;
    full.iter_mut()
        .zip(truncated.iter())
        .for_each(|(a, b)| *a = *a * b.conj() * normalization);
    plans.inverse.process(&mut full);

    // d(t) = pow_0^w + pow_t^{t+w} - 2 r(t)
    let power = square_sum(&signal[..window]);
    let mut windowed_power = power;
    full[..=max_lag]
        .iter()
        .enumerate()
        .map(|(t, r)| {
            let value = (power + windowed_power - 2.0 * r.re).max(0.0);
            if t + window < size {
                windowed_power = windowed_power - signal[t] * signal[t]
                    + signal[t + window] * signal[t + window];
            }
            value
        })
        .collect()
}

/// d'(0) = 1 and d'(t) = d(t) / [(1/t) sum_{i=1}^t d(i)] otherwise.
pub fn cumulative_mean_normalize(difference: &mut [f32]) {
    if difference.is_empty() {
        return;
    }

    difference[0] = 1.0;
    let mut sum = 0.0;
    for (i, value) in difference.iter_mut().enumerate().skip(1) {
        sum += *value;
        *value = if sum > 0.0 {
            *value * i as f32 / sum
        } else {
            1.0
        };
    }
}

fn parabolic_interpolation(values: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f32;
    }

    let (left, center, right) = (values[tau - 1], values[tau], values[tau + 1]);
    let denominator = 2.0 * (left - 2.0 * center + right);
    if denominator == 0.0 {
        return tau as f32;
    }

    let shift = (left - right) / denominator;
    if shift.is_finite() && shift.abs() < 1.0 {
        tau as f32 + shift
    } else {
        tau as f32
    }
}
