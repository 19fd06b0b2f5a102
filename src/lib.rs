//! Real-time pitch estimation
//!
//! Audio frames from a [`SignalSource`](audio::SignalSource) are transformed,
//! run through one of eight interchangeable frequency estimators, mapped onto
//! the musical scale and delivered to a consumer in arrival order.
//!
//! ```no_run
//! use pitch_tracker::{EngineConfig, EstimationStrategy, PitchEngine};
//!
//! let config = EngineConfig {
//!     strategy: EstimationStrategy::Yin,
//!     level_threshold: Some(-50.0),
//!     ..EngineConfig::default()
//! };
//!
//! let mut engine = PitchEngine::new(config, |notification: pitch_tracker::Notification| {
//!     if let Some(pitch) = notification.pitch() {
//!         println!("{:.1} Hz -> {}", pitch.frequency, pitch.note());
//!     }
//! });
//! engine.start().unwrap();
//! ```

pub mod audio;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimation;
pub mod pitch;
pub mod transform;

pub use buffer::Buffer;
pub use config::{EngineConfig, SourceSelection};
pub use engine::{Consumer, FrameSink, Notification, Outcome, PermissionCheck, PitchEngine};
pub use error::{BufferError, Error, RangeError, Result, SourceError};
pub use estimation::{EstimationStrategy, Estimator};
pub use pitch::{Note, Pitch, PitchMapper};
