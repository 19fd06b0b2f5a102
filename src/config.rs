use std::path::PathBuf;

use crate::audio::{FilePlayback, LiveInput, SignalSource};
use crate::estimation::{hps, yin, EstimationStrategy, Estimator};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Where the engine takes its frames from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSelection {
    /// `None` picks the host's default input device.
    Live { device: Option<String> },
    File { path: PathBuf, realtime: bool },
}

impl SourceSelection {
    pub fn build(&self, buffer_size: usize) -> Box<dyn SignalSource> {
        match self {
            SourceSelection::Live { device: None } => Box::new(LiveInput::new(buffer_size)),
            SourceSelection::Live { device: Some(name) } => {
                Box::new(LiveInput::with_device(name.clone(), buffer_size))
            }
            SourceSelection::File { path, realtime } => {
                Box::new(FilePlayback::new(path, buffer_size, *realtime))
            }
        }
    }
}

impl Default for SourceSelection {
    fn default() -> Self {
        SourceSelection::Live { device: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Samples per frame. Powers of two avoid truncation in the FFT.
    pub buffer_size: usize,
    pub strategy: EstimationStrategy,
    /// Minimum frame level in dBFS; `None` analyses every frame.
    pub level_threshold: Option<f32>,
    pub source: SourceSelection,
    /// Largest downsample factor for the harmonic product spectrum.
    pub hps_harmonics: usize,
    /// Absolute threshold on the YIN normalised difference.
    pub yin_threshold: f32,
    /// Pending frame count above which the engine warns about falling behind.
    pub queue_warning: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            strategy: EstimationStrategy::default(),
            level_threshold: None,
            source: SourceSelection::default(),
            hps_harmonics: hps::DEFAULT_HARMONICS,
            yin_threshold: yin::DEFAULT_THRESHOLD,
            queue_warning: 32,
        }
    }
}

impl EngineConfig {
    pub fn estimator(&self) -> Box<dyn Estimator> {
        self.strategy
            .estimator_with(self.hps_harmonics, self.yin_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SourceMode;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.strategy, EstimationStrategy::Yin);
        assert_eq!(config.level_threshold, None);
        assert_eq!(config.source, SourceSelection::Live { device: None });
    }

    #[test]
    fn test_source_modes() {
        let live = SourceSelection::default().build(1024);
        assert_eq!(live.mode(), SourceMode::Record);

        let file = SourceSelection::File {
            path: PathBuf::from("take.wav"),
            realtime: false,
        }
        .build(1024);
        assert_eq!(file.mode(), SourceMode::Playback);
    }
}
