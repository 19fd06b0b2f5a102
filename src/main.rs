//! Command-line entry point
//!
//! Builds an engine from the command line, prints one line per notification
//! and runs until the requested time has elapsed or Enter is pressed.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use pitch_tracker::audio::{default_input_device_name, input_devices};
use pitch_tracker::config::DEFAULT_BUFFER_SIZE;
use pitch_tracker::{EngineConfig, EstimationStrategy, Notification, Outcome, PitchEngine, SourceSelection};

#[derive(Parser, Debug)]
#[command(name = "pitch-tracker", version, about = "Real-time pitch detection")]
struct Args {
    /// Estimation strategy: max-value, quadratic, barycentric, quinns-first,
    /// quinns-second, jains, hps or yin
    #[arg(short, long, default_value_t = EstimationStrategy::Yin)]
    strategy: EstimationStrategy,

    /// Samples per analysed frame
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Skip frames at or below this level (dBFS)
    #[arg(short, long, allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Analyse a WAV file instead of the live input
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Pace file playback in real time
    #[arg(long, requires = "file")]
    realtime: bool,

    /// Input device name (defaults to the system input)
    #[arg(short, long, conflicts_with = "file")]
    device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(long)]
    seconds: Option<f64>,
}

fn print_notification(notification: Notification) {
    let time = notification
        .time
        .map(|t| format!("{:8.3}s", t.as_secs_f64()))
        .unwrap_or_else(|| "       -".to_string());

    match &notification.outcome {
        Outcome::Estimate(pitch) => {
            let offset = pitch.closest_offset();
            let sign = if offset.cents > 0.0 { "+" } else { "" };
            println!(
                "{} {:9.2} Hz  {:<4} {}{:.0} cents",
                time,
                pitch.frequency,
                pitch.note(),
                sign,
                offset.cents
            );
        }
        Outcome::Failure(error) if error.is_fatal() => {
            eprintln!("{} source failed: {}", time, error);
        }
        Outcome::Failure(error) => println!("{} no pitch: {}", time, error),
        Outcome::ThresholdSkip { level } => println!("{} quiet ({:.1} dB)", time, level),
    }
}

fn list_devices() -> Result<()> {
    let default = default_input_device_name().ok();
    for name in input_devices()? {
        let marker = if Some(&name) == default.as_ref() { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    if args.list_devices {
        return list_devices();
    }

    let source = match args.file {
        Some(path) => SourceSelection::File {
            path,
            realtime: args.realtime,
        },
        None => SourceSelection::Live {
            device: args.device,
        },
    };

    let config = EngineConfig {
        buffer_size: args.buffer_size,
        strategy: args.strategy,
        level_threshold: args.threshold,
        source,
        ..EngineConfig::default()
    };

    let mut engine = PitchEngine::new(config, print_notification);
    engine.start()?;

    match args.seconds {
        Some(seconds) => std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0))),
        None => {
            eprintln!("Listening, press Enter to stop");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
        }
    }

    engine.stop();
    Ok(())
}
