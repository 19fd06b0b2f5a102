//! Signal sources
//!
//! A source delivers fixed-size mono frames to the engine through a
//! [`FrameSink`]. Live capture goes through cpal; playback decodes a WAV file
//! with hound and feeds it from its own thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, Stream, StreamConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::FrameSink;
use crate::error::SourceError;

/// One block of mono samples as captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub samples: Vec<f32>,
    pub sample_rate: f32,
    /// Offset of the first sample from the start of the source.
    pub time: Duration,
}

impl Frame {
    pub fn new(samples: Vec<f32>, sample_rate: f32, time: Duration) -> Self {
        Self {
            samples,
            sample_rate,
            time,
        }
    }

    pub fn level(&self) -> f32 {
        rms_level_db(&self.samples)
    }
}

/// RMS level in dBFS. Silence and empty frames are `-inf`.
pub fn rms_level_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    20.0 * mean_square.sqrt().log10()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Record,
    Playback,
}

pub trait SignalSource {
    fn mode(&self) -> SourceMode;

    /// Begins delivering frames to `sink`. Must fail fast when the device or
    /// file cannot be used.
    fn start(&mut self, sink: FrameSink) -> Result<(), SourceError>;

    /// Stops delivery and releases the sink. Safe to call when not running.
    fn stop(&mut self);
}

/// Mixes interleaved audio down to mono and cuts it into frames.
pub struct FrameAssembler {
    frame_size: usize,
    channels: usize,
    sample_rate: f32,
    pending: Vec<f32>,
    emitted: u64,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, channels: usize, sample_rate: f32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            channels: channels.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_size * 2),
            emitted: 0,
        }
    }

    pub fn push_interleaved(&mut self, data: &[f32], mut emit: impl FnMut(Frame)) {
        let channels = self.channels;
        self.pending.extend(
            data.chunks(channels)
                .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32),
        );

        while self.pending.len() >= self.frame_size {
            let samples: Vec<f32> = self.pending.drain(0..self.frame_size).collect();
            let time = Duration::from_secs_f64(self.emitted as f64 / self.sample_rate as f64);
            self.emitted += self.frame_size as u64;
            emit(Frame::new(samples, self.sample_rate, time));
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Live capture from a cpal input device.
pub struct LiveInput {
    device_name: Option<String>,
    buffer_size: usize,
    stream: Option<Stream>,
}

impl LiveInput {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            device_name: None,
            buffer_size,
            stream: None,
        }
    }

    pub fn with_device(device_name: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            device_name: Some(device_name.into()),
            buffer_size,
            stream: None,
        }
    }

    fn open_device(&self) -> Result<Device, SourceError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_input_device().ok_or(SourceError::NoInputDevice),
            Some(name) => host
                .input_devices()
                .map_err(|e| SourceError::Device(e.to_string()))?
                .find(|device| device.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| SourceError::DeviceNotFound(name.clone())),
        }
    }

    fn create_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut assembler: FrameAssembler,
        sink: FrameSink,
    ) -> Result<Stream, SourceError>
    where
        T: Sample + cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let error_sink = sink.clone();
        let stream = device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data
                        .iter()
                        .map(|&sample| f32::from_sample(sample))
                        .collect();

                    assembler.push_interleaved(&samples, |frame| sink.push(frame));
                },
                move |err| {
                    log::warn!("Audio stream error: {}", err);
                    error_sink.fail(SourceError::Stream(err.to_string()));
                },
                None,
            )
            .map_err(|e| SourceError::Device(e.to_string()))?;

        Ok(stream)
    }
}

impl SignalSource for LiveInput {
    fn mode(&self) -> SourceMode {
        SourceMode::Record
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), SourceError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.open_device()?;
        let config = device
            .default_input_config()
            .map_err(|e| SourceError::Device(e.to_string()))?;
        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        log::info!(
            "Input device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );
        log::debug!("Default input config: {:?}", config);
        log::info!("Actual sample rate: {} Hz", sample_rate);

        let assembler = FrameAssembler::new(self.buffer_size, channels, sample_rate);
        let stream_config: StreamConfig = config.clone().into();

        let stream = match config.sample_format() {
            SampleFormat::I8 => Self::create_stream::<i8>(&device, &stream_config, assembler, sink)?,
            SampleFormat::I16 => Self::create_stream::<i16>(&device, &stream_config, assembler, sink)?,
            SampleFormat::I32 => Self::create_stream::<i32>(&device, &stream_config, assembler, sink)?,
            SampleFormat::I64 => Self::create_stream::<i64>(&device, &stream_config, assembler, sink)?,
            SampleFormat::U8 => Self::create_stream::<u8>(&device, &stream_config, assembler, sink)?,
            SampleFormat::U16 => Self::create_stream::<u16>(&device, &stream_config, assembler, sink)?,
            SampleFormat::U32 => Self::create_stream::<u32>(&device, &stream_config, assembler, sink)?,
            SampleFormat::U64 => Self::create_stream::<u64>(&device, &stream_config, assembler, sink)?,
            SampleFormat::F32 => Self::create_stream::<f32>(&device, &stream_config, assembler, sink)?,
            SampleFormat::F64 => Self::create_stream::<f64>(&device, &stream_config, assembler, sink)?,
            _ => return Err(SourceError::UnsupportedSampleFormat),
        };

        stream
            .play()
            .map_err(|e| SourceError::Device(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                log::debug!("Failed to pause input stream: {}", err);
            }
        }
    }
}

pub fn input_devices() -> Result<Vec<String>, SourceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| SourceError::Device(e.to_string()))?;

    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

pub fn default_input_device_name() -> Result<String, SourceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(SourceError::NoInputDevice)?;
    device.name().map_err(|e| SourceError::Device(e.to_string()))
}

/// Plays a WAV file into the engine.
pub struct FilePlayback {
    path: PathBuf,
    buffer_size: usize,
    realtime: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FilePlayback {
    /// With `realtime` set, frames are paced at the file's sample rate;
    /// otherwise the file is fed as fast as the engine accepts it.
    pub fn new(path: impl AsRef<Path>, buffer_size: usize, realtime: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            buffer_size,
            realtime,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decodes every sample of a WAV file to `f32` in `[-1, 1]`, interleaved.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, hound::WavSpec), SourceError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok((samples, spec))
}

impl SignalSource for FilePlayback {
    fn mode(&self) -> SourceMode {
        SourceMode::Playback
    }

    fn start(&mut self, sink: FrameSink) -> Result<(), SourceError> {
        self.stop();

        let (samples, spec) = read_wav(&self.path)?;
        let sample_rate = spec.sample_rate as f32;
        let channels = spec.channels.max(1) as usize;

        log::info!(
            "Playing {} ({} Hz, {} channels, {} samples)",
            self.path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len() / channels
        );

        let buffer_size = self.buffer_size.max(1);
        let realtime = self.realtime;
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("pitch-playback".into())
            .spawn(move || {
                let mut assembler = FrameAssembler::new(buffer_size, channels, sample_rate);
                let frame_duration = Duration::from_secs_f64(buffer_size as f64 / sample_rate as f64);

                for chunk in samples.chunks(buffer_size * channels) {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    assembler.push_interleaved(chunk, |frame| sink.push(frame));
                    if realtime {
                        thread::sleep(frame_duration);
                    }
                }

                running.store(false, Ordering::Release);
                log::debug!("Playback finished");
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("Playback thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_level() {
        assert_eq!(rms_level_db(&[]), f32::NEG_INFINITY);
        assert_eq!(rms_level_db(&[0.0; 16]), f32::NEG_INFINITY);
        assert!(rms_level_db(&[1.0, -1.0, 1.0, -1.0]).abs() < 1e-6);
        assert!((rms_level_db(&[0.1; 8]) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_assembler_mixes_and_splits() {
        let mut assembler = FrameAssembler::new(4, 2, 8.0);
        let mut frames = Vec::new();

        // Ten stereo pairs: L = i, R = -i + 2 => mono = 1.0
        let data: Vec<f32> = (0..10)
            .flat_map(|i| vec![i as f32, 2.0 - i as f32])
            .collect();
        assembler.push_interleaved(&data, |frame| frames.push(frame));

        assert_eq!(frames.len(), 2);
        assert_eq!(assembler.pending_len(), 2);
        assert!(frames.iter().all(|f| f.samples == vec![1.0; 4]));
        assert_eq!(frames[0].time, Duration::ZERO);
        assert_eq!(frames[1].time, Duration::from_millis(500));
    }

    #[test]
    fn test_read_wav_scales_integers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for sample in [0i16, 16384, -16384, i16::MIN] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, read_spec) = read_wav(&path).unwrap();
        assert_eq!(read_spec.sample_rate, 8000);
        assert_eq!(samples, vec![0.0, 0.5, -0.5, -1.0]);
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let result = read_wav(Path::new("/nonexistent/definitely-missing.wav"));
        assert!(matches!(result, Err(SourceError::File(_))));
    }
}
