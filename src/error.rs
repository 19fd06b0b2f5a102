//! Error taxonomy for the pitch pipeline
//!
//! Source errors halt the engine. Buffer and range errors are per-frame and
//! travel through the notification channel next to successful estimates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The audio device, stream or file behind a signal source is unusable.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Unsupported sample format")]
    UnsupportedSampleFormat,

    #[error("Failed to read audio file: {0}")]
    File(#[from] hound::Error),

    #[error("Permission to use the audio source was denied")]
    PermissionDenied,

    /// Raised asynchronously by a running stream.
    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Failed to spawn audio thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A frame could not be turned into an estimate.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("Frame carries no sample data")]
    MissingSamples,

    #[error("Buffer is empty")]
    EmptyBuffer,

    #[error("No peak could be resolved in the buffer")]
    UnresolvablePeak,
}

/// A value falls outside the supported musical range.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum RangeError {
    #[error("Frequency {0} Hz is outside the supported range")]
    InvalidFrequency(f64),

    #[error("Wavelength {0} m is outside the supported range")]
    InvalidWavelength(f64),

    #[error("Period {0} s is outside the supported range")]
    InvalidPeriod(f64),

    #[error("Note index {0} is outside the supported range")]
    InvalidIndex(i32),

    #[error("Octave {0} is outside the supported range")]
    InvalidOctave(i32),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Range(#[from] RangeError),
}

impl Error {
    /// Source failures stop the engine; everything else is per-frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Source(_))
    }
}
