//! The pitch engine
//!
//! Frames arrive on the source's capture thread, are gated by level there,
//! and are queued to a single worker thread that transforms, estimates and
//! maps them one at a time. The worker hands every result to a separate
//! delivery thread that calls the consumer. Both hops are FIFO channels, so
//! notifications come out in frame arrival order.
//!
//! The queue is unbounded: frames are never dropped, and when the worker
//! falls behind, latency grows. A warning is logged once the backlog passes
//! [`EngineConfig::queue_warning`].

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{Frame, SignalSource, SourceMode};
use crate::config::EngineConfig;
use crate::error::{Error, SourceError};
use crate::estimation::{EstimationStrategy, Estimator};
use crate::pitch::{validate_frequency, EqualTemperament, Pitch, PitchMapper};
use crate::transform::Transformer;

#[derive(Debug)]
pub enum Outcome {
    Estimate(Pitch),
    Failure(Error),
    /// The frame was below the level threshold and was not analysed.
    ThresholdSkip { level: f32 },
}

#[derive(Debug)]
pub struct Notification {
    /// Arrival order of the frame, counted per engine.
    pub sequence: u64,
    /// Frame time; `None` for source failures.
    pub time: Option<Duration>,
    pub outcome: Outcome,
}

impl Notification {
    pub fn pitch(&self) -> Option<&Pitch> {
        match &self.outcome {
            Outcome::Estimate(pitch) => Some(pitch),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.outcome {
            Outcome::Failure(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self.outcome, Outcome::ThresholdSkip { .. })
    }
}

/// Receives notifications on the engine's delivery thread.
///
/// The engine owns the consumer from construction until it is dropped, at
/// which point every queued notification has been delivered.
pub trait Consumer: Send + 'static {
    fn notify(&mut self, notification: Notification);
}

impl<F> Consumer for F
where
    F: FnMut(Notification) + Send + 'static,
{
    fn notify(&mut self, notification: Notification) {
        self(notification)
    }
}

/// Consulted before a playback source is activated.
pub trait PermissionCheck {
    fn request(&self) -> Result<(), SourceError>;
}

pub struct AlwaysGranted;

impl PermissionCheck for AlwaysGranted {
    fn request(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// An `f32` cell where NaN stands for "unset".
struct AtomicLevel(AtomicU32);

impl AtomicLevel {
    fn new(value: Option<f32>) -> Self {
        Self(AtomicU32::new(value.unwrap_or(f32::NAN).to_bits()))
    }

    fn load(&self) -> Option<f32> {
        let value = f32::from_bits(self.0.load(Ordering::Acquire));
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    fn store(&self, value: Option<f32>) {
        self.0
            .store(value.unwrap_or(f32::NAN).to_bits(), Ordering::Release);
    }
}

/// State written by the owner's lifecycle calls and read by the capture side.
struct Shared {
    active: AtomicBool,
    accepting: AtomicBool,
    sequence: AtomicU64,
    threshold: AtomicLevel,
    last_level: AtomicLevel,
    backlogged: AtomicBool,
}

impl Shared {
    fn new(threshold: Option<f32>) -> Self {
        Self {
            active: AtomicBool::new(false),
            accepting: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            threshold: AtomicLevel::new(threshold),
            last_level: AtomicLevel::new(None),
            backlogged: AtomicBool::new(false),
        }
    }
}

enum Job {
    Analyze { sequence: u64, frame: Frame },
    Skip { sequence: u64, time: Duration, level: f32 },
    Halt { sequence: u64, error: SourceError },
    Shutdown,
}

/// The capture side of the engine, handed to a [`SignalSource`] on start.
#[derive(Clone)]
pub struct FrameSink {
    jobs: Sender<Job>,
    shared: Arc<Shared>,
    queue_warning: usize,
}

impl FrameSink {
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Gates the frame by level and queues it. Frames pushed after the engine
    /// stopped are discarded.
    pub fn push(&self, frame: Frame) {
        if !self.is_accepting() {
            log::trace!("Engine stopped, discarding frame");
            return;
        }

        let sequence = self.shared.sequence.fetch_add(1, Ordering::AcqRel);
        let level = frame.level();
        self.shared.last_level.store(Some(level));

        let job = match self.shared.threshold.load() {
            Some(threshold) if level <= threshold => {
                log::trace!(
                    "Frame {} at {:.1} dB is below the {:.1} dB threshold",
                    sequence,
                    level,
                    threshold
                );
                Job::Skip {
                    sequence,
                    time: frame.time,
                    level,
                }
            }
            _ => Job::Analyze { sequence, frame },
        };

        let backlog = self.jobs.len();
        if self.crossed_backlog(backlog) {
            log::warn!("Pitch worker is {} frames behind", backlog);
        }

        if self.jobs.send(job).is_err() {
            log::debug!("Pipeline closed, frame {} dropped", sequence);
        }
    }

    /// True only when the backlog rises to the warning level; it has to drop
    /// below it again before the next warning.
    fn crossed_backlog(&self, backlog: usize) -> bool {
        if backlog >= self.queue_warning {
            !self.shared.backlogged.swap(true, Ordering::AcqRel)
        } else {
            if self.shared.backlogged.swap(false, Ordering::AcqRel) {
                log::debug!("Pitch worker caught up ({} frames pending)", backlog);
            }
            false
        }
    }

    /// Reports an unrecoverable source failure. Only the first report per
    /// start is delivered; the engine becomes inactive.
    pub fn fail(&self, error: SourceError) {
        if !self.shared.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.active.store(false, Ordering::Release);

        let sequence = self.shared.sequence.fetch_add(1, Ordering::AcqRel);
        log::warn!("Signal source failed: {}", error);
        if self.jobs.send(Job::Halt { sequence, error }).is_err() {
            log::debug!("Pipeline closed before the source failure was delivered");
        }
    }
}

struct Worker {
    transformer: Transformer,
    estimator: Box<dyn Estimator>,
    mapper: Box<dyn PitchMapper>,
}

impl Worker {
    fn analyze(&mut self, frame: &Frame) -> Result<Pitch, Error> {
        let buffer = self.transformer.transform(&frame.samples)?;
        let frequency = self
            .estimator
            .estimate_frequency(frame.sample_rate, &buffer)? as f64;
        validate_frequency(frequency)?;
        Ok(self.mapper.map(frequency)?)
    }

    fn run(mut self, jobs: Receiver<Job>, notifications: Sender<Notification>) {
        for job in jobs.iter() {
            let notification = match job {
                Job::Analyze { sequence, frame } => {
                    let outcome = match self.analyze(&frame) {
                        Ok(pitch) => {
                            log::debug!(
                                "Frame {}: {:.2} Hz ({})",
                                sequence,
                                pitch.frequency,
                                pitch.note()
                            );
                            Outcome::Estimate(pitch)
                        }
                        Err(error) => {
                            log::debug!("Frame {}: {}", sequence, error);
                            Outcome::Failure(error)
                        }
                    };
                    Notification {
                        sequence,
                        time: Some(frame.time),
                        outcome,
                    }
                }
                Job::Skip {
                    sequence,
                    time,
                    level,
                } => Notification {
                    sequence,
                    time: Some(time),
                    outcome: Outcome::ThresholdSkip { level },
                },
                Job::Halt { sequence, error } => Notification {
                    sequence,
                    time: None,
                    outcome: Outcome::Failure(error.into()),
                },
                Job::Shutdown => break,
            };

            if notifications.send(notification).is_err() {
                break;
            }
        }
    }
}

fn deliver(notifications: Receiver<Notification>, mut consumer: Box<dyn Consumer>) {
    for notification in notifications.iter() {
        consumer.notify(notification);
    }
}

struct Pending {
    worker: Worker,
    consumer: Box<dyn Consumer>,
}

struct Stages {
    jobs: Sender<Job>,
    worker: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

type StageBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts both stage threads. The worker and consumer are handed over only
/// once both threads are running, so a failed spawn leaves `pending` intact
/// for the next attempt.
fn spawn_stages<F>(pending: &mut Option<Pending>, mut spawn: F) -> Result<Stages, SourceError>
where
    F: FnMut(&str, StageBody) -> std::io::Result<JoinHandle<()>>,
{
    if pending.is_none() {
        return Err(SourceError::Device(
            "pitch pipeline could not be started".to_string(),
        ));
    }

    let (job_tx, job_rx) = unbounded();
    let (notification_tx, notification_rx) = unbounded();
    let (consumer_tx, consumer_rx) = bounded::<Box<dyn Consumer>>(1);
    let (worker_tx, worker_rx) = bounded::<Worker>(1);

    let delivery = spawn(
        "pitch-delivery",
        Box::new(move || {
            if let Ok(consumer) = consumer_rx.recv() {
                deliver(notification_rx, consumer);
            }
        }),
    )?;
    let worker = spawn(
        "pitch-worker",
        Box::new(move || {
            if let Ok(worker) = worker_rx.recv() {
                worker.run(job_rx, notification_tx);
            }
        }),
    )
    .map_err(|err| {
        // Returning drops `consumer_tx`, which lets the delivery thread exit.
        log::warn!("Failed to spawn the pitch worker: {}", err);
        err
    })?;

    if let Some(Pending { worker: stage, consumer }) = pending.take() {
        if worker_tx.send(stage).is_err() || consumer_tx.send(consumer).is_err() {
            log::warn!("Pitch pipeline thread exited before it was handed its work");
        }
    }

    Ok(Stages {
        jobs: job_tx,
        worker,
        delivery,
    })
}

pub struct PitchEngine {
    buffer_size: usize,
    strategy: EstimationStrategy,
    queue_warning: usize,
    source: Box<dyn SignalSource>,
    permission: Box<dyn PermissionCheck>,
    shared: Arc<Shared>,
    source_running: bool,
    pending: Option<Pending>,
    stages: Option<Stages>,
}

impl PitchEngine {
    pub fn new(config: EngineConfig, consumer: impl Consumer) -> Self {
        let source = config.source.build(config.buffer_size);
        Self::with_source(config, source, consumer)
    }

    pub fn with_source(
        config: EngineConfig,
        source: Box<dyn SignalSource>,
        consumer: impl Consumer,
    ) -> Self {
        let estimator = config.estimator();
        let transformer = Transformer::new(estimator.transform_kind());

        Self {
            buffer_size: config.buffer_size,
            strategy: config.strategy,
            queue_warning: config.queue_warning.max(1),
            source,
            permission: Box::new(AlwaysGranted),
            shared: Arc::new(Shared::new(config.level_threshold)),
            source_running: false,
            pending: Some(Pending {
                worker: Worker {
                    transformer,
                    estimator,
                    mapper: Box::new(EqualTemperament),
                },
                consumer: Box::new(consumer),
            }),
            stages: None,
        }
    }

    /// Replaces the pitch mapper. Has no effect once the engine has started.
    pub fn with_mapper(mut self, mapper: Box<dyn PitchMapper>) -> Self {
        match self.pending.as_mut() {
            Some(pending) => pending.worker.mapper = mapper,
            None => log::warn!("Pitch mapper ignored: engine already started"),
        }
        self
    }

    pub fn with_permission(mut self, permission: Box<dyn PermissionCheck>) -> Self {
        self.permission = permission;
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn strategy(&self) -> EstimationStrategy {
        self.strategy
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn level_threshold(&self) -> Option<f32> {
        self.shared.threshold.load()
    }

    pub fn set_level_threshold(&mut self, threshold: Option<f32>) {
        self.shared.threshold.store(threshold);
    }

    /// Level of the most recent frame in dBFS, if any arrived yet.
    pub fn signal_level(&self) -> Option<f32> {
        self.shared.last_level.load()
    }

    /// Activates the source. A no-op while already active. Playback sources
    /// are activated only after the permission check passes.
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.is_active() {
            log::debug!("Pitch engine already active");
            return Ok(());
        }

        if self.source.mode() == SourceMode::Playback {
            self.permission.request()?;
        }

        if self.source_running {
            // The source failed on its own; release it before restarting.
            self.source.stop();
            self.source_running = false;
        }

        let sink = self.sink()?;

        self.shared.active.store(true, Ordering::Release);
        self.shared.accepting.store(true, Ordering::Release);

        if let Err(error) = self.source.start(sink) {
            self.shared.accepting.store(false, Ordering::Release);
            self.shared.active.store(false, Ordering::Release);
            log::warn!("Failed to start signal source: {}", error);
            return Err(error);
        }
        self.source_running = true;

        log::info!(
            "Pitch engine started: {} estimator, {} samples per frame",
            self.strategy,
            self.buffer_size
        );
        Ok(())
    }

    /// Halts the source. Frames already queued are still analysed and delivered.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }

        self.shared.accepting.store(false, Ordering::Release);
        self.source.stop();
        self.source_running = false;
        self.shared.active.store(false, Ordering::Release);

        log::info!("Pitch engine stopped");
    }

    /// Spawns the worker and delivery threads on first use.
    fn spawn_stages(&mut self) -> Result<Stages, SourceError> {
        spawn_stages(&mut self.pending, |name, body| {
            thread::Builder::new().name(name.into()).spawn(body)
        })
    }

    fn sink(&mut self) -> Result<FrameSink, SourceError> {
        let stages = match self.stages.take() {
            Some(stages) => stages,
            None => self.spawn_stages()?,
        };
        let jobs = stages.jobs.clone();
        self.stages = Some(stages);

        Ok(FrameSink {
            jobs,
            shared: self.shared.clone(),
            queue_warning: self.queue_warning,
        })
    }
}

impl Drop for PitchEngine {
    fn drop(&mut self) {
        self.stop();
        if self.source_running {
            self.source.stop();
        }

        if let Some(stages) = self.stages.take() {
            let _ = stages.jobs.send(Job::Shutdown);
            drop(stages.jobs);
            if stages.worker.join().is_err() {
                log::warn!("Pitch worker panicked");
            }
            if stages.delivery.join().is_err() {
                log::warn!("Notification consumer panicked");
            }
        }
    }
}
