//! Event camera frame accumulation CLI.
//!
//! Converts recorded event streams to PNG frame sequences, or replays them
//! as a live source with periodic rendering.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use evframe_core::sink::PngSequenceWriter;
use evframe_core::{
    read_recording, run_session, DisplaySink, FieldOrder, Frame, LiveSource, OfflineConverter,
    PipelineConfig, PipelineError, ReplayCamera, ReplayConfig, Resolution, StopToken,
    StreamRecorder,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

/// Turns event camera recordings into fixed-rate frames.
#[derive(Parser, Debug)]
#[command(name = "evframe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a recording to a numbered PNG sequence.
    Convert(ConvertArgs),
    /// Replay a recording as a live camera and render it periodically.
    Live(LiveArgs),
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Input recording (.csv or .bin)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output directory for frames.
    ///
    /// Defaults to `<input stem>_YYYYMMDD_HHMMSS` next to the input.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Time slices per output frame
    #[arg(long)]
    oversample: Option<u32>,

    /// Column order of CSV input without a header line.
    ///
    /// Format: comma-separated field names (x, y, p, t)
    #[arg(short, long, default_value = "x,y,p,t")]
    format: String,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args, Debug)]
struct LiveArgs {
    /// Input recording (.csv or .bin)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Playback speed relative to real time (0 = as fast as possible)
    #[arg(long, default_value_t = 1.0, value_parser = parse_speed)]
    speed: f64,

    /// Column order of CSV input without a header line.
    ///
    /// Format: comma-separated field names (x, y, p, t)
    #[arg(short, long, default_value = "x,y,p,t")]
    format: String,

    /// Stop after this many seconds of collected events
    #[arg(long, value_name = "N")]
    budget_secs: Option<u64>,

    /// Write every presented frame as a PNG into this directory
    #[arg(long, value_name = "DIR")]
    snapshots: Option<PathBuf>,

    /// Record the delivered stream to a CSV file
    #[arg(long, value_name = "FILE")]
    record: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    match cli.command {
        Command::Convert(args) => convert(args),
        Command::Live(args) => live(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => Ok(PipelineConfig::default()),
    }
}

/// Accepts finite, non-negative playback speeds.
fn parse_speed(text: &str) -> Result<f64, String> {
    let speed: f64 = text.parse().map_err(|e| format!("{}", e))?;
    if speed.is_finite() && speed >= 0.0 {
        Ok(speed)
    } else {
        Err(format!("speed must be a finite number >= 0, got {}", text))
    }
}

fn parse_field_order(format: &str) -> Result<FieldOrder> {
    FieldOrder::from_str(format).context("Invalid field format. Use comma-separated: x,y,p,t")
}

/// `<dir>/<stem>_YYYYMMDD_HHMMSS` for an input path.
fn timestamped_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frames".to_string());
    let name = format!("{}_{}", stem, Local::now().format("%Y%m%d_%H%M%S"));
    input.with_file_name(name)
}

fn convert(args: ConvertArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(fps) = args.fps {
        config = config.with_fps(fps);
    }
    if let Some(oversample) = args.oversample {
        config = config.with_oversample(oversample);
    }

    let field_order = parse_field_order(&args.format)?;

    let start_time = Instant::now();
    let recording = read_recording(&args.input, field_order)
        .map_err(PipelineError::from)
        .with_context(|| format!("Failed to read recording {:?}", args.input))?;
    info!("Loaded {} events from {:?}", recording.len(), args.input);

    let converter = OfflineConverter::new(config);
    let plan = converter
        .prepare(&recording)
        .context("Cannot schedule windows for this recording")?;

    let output = args
        .output
        .unwrap_or_else(|| timestamped_output(&args.input));
    let mut sink = PngSequenceWriter::create(&output, plan.resolution)
        .map_err(PipelineError::SinkOpen)
        .with_context(|| format!("Failed to open output directory {:?}", output))?;

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(plan.scheduler.window_count());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40}] {pos}/{len} windows")?,
        );
        pb
    };

    let summary = converter
        .run(&plan, &recording, &mut sink, |windows| {
            progress.set_position(windows)
        })
        .context("Conversion failed")?;

    let total_duration = start_time.elapsed();
    progress.finish_with_message("Done");

    if !args.quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", output);
        eprintln!("  Events:       {}", recording.len());
        eprintln!("  Sensor:       {}", plan.resolution);
        eprintln!("  Interval:     {} us", plan.scheduler.frame_interval());
        eprintln!("  Windows:      {}", summary.windows);
        eprintln!("  Frames:       {}", summary.frames_written);
        eprintln!("  Empty:        {}", summary.windows_skipped);
        eprintln!("  Out of frame: {}", summary.events_dropped);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}

/// Shows live progress on a spinner and optionally keeps snapshots.
struct ConsoleDisplay {
    spinner: ProgressBar,
    snapshots: Option<PngSequenceWriter>,
    presented: u64,
}

impl DisplaySink for ConsoleDisplay {
    fn present(&mut self, frame: &Frame) {
        self.presented += 1;
        if let Some(writer) = self.snapshots.as_mut() {
            writer.present(frame);
        }
        self.spinner.set_message(format!(
            "{} frames presented, {} pixels lit",
            self.presented,
            frame.lit_pixels()
        ));
        self.spinner.tick();
    }
}

fn live(args: LiveArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(secs) = args.budget_secs {
        let budget_us = i64::try_from(secs.saturating_mul(1_000_000)).unwrap_or(i64::MAX);
        config = config.with_duration_budget(budget_us);
    }

    let field_order = parse_field_order(&args.format)?;
    let recording = read_recording(&args.input, field_order)
        .map_err(PipelineError::from)
        .with_context(|| format!("Failed to read recording {:?}", args.input))?;
    let camera = ReplayCamera::new(recording, ReplayConfig::default().with_speed(args.speed));

    let stop = StopToken::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.stop()).context("Failed to install Ctrl+C handler")?;
    }

    let snapshots = match &args.snapshots {
        Some(dir) => {
            let (resolution, _) =
                Resolution::resolve(camera.width(), camera.height(), config.default_resolution);
            let writer = PngSequenceWriter::create(dir, resolution)
                .map_err(PipelineError::SinkOpen)
                .with_context(|| format!("Failed to open snapshot directory {:?}", dir))?;
            Some(writer)
        }
        None => None,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    let mut display = ConsoleDisplay {
        spinner,
        snapshots,
        presented: 0,
    };

    let recorder = match &args.record {
        Some(path) => Some(
            StreamRecorder::start(&camera, path)
                .with_context(|| format!("Failed to start recording to {:?}", path))?,
        ),
        None => None,
    };

    camera.start().context("Failed to start streaming")?;
    let session = run_session(&camera, &mut display, &config, &stop);
    camera.stop();

    let recorded = match recorder {
        Some(recorder) => Some(recorder.finish(&camera).context("Recording failed")?),
        None => None,
    };
    let summary = session.context("Live session failed")?;
    display.spinner.finish_with_message(format!(
        "Stopped ({:?}) after {} frames",
        summary.collection.reason, summary.render.frames_presented
    ));

    eprintln!();
    eprintln!("Summary:");
    eprintln!("  Input:        {:?}", args.input);
    eprintln!("  Stop reason:  {:?}", summary.collection.reason);
    eprintln!("  Frames:       {}", summary.render.frames_presented);
    eprintln!("  Painted:      {}", summary.render.events_painted);
    eprintln!("  Batches:      {}", summary.collection.batches);
    eprintln!("  Collected:    {}", summary.collection.events);
    eprintln!(
        "  Accumulated:  {:.3}s",
        summary.collection.accumulated as f64 / 1e6
    );
    if camera.batches_dropped() > 0 {
        eprintln!("  Dropped:      {} batches", camera.batches_dropped());
    }
    if let (Some(path), Some(recorded)) = (&args.record, recorded) {
        eprintln!(
            "  Recorded:     {} events to {:?}",
            recorded.events_written, path
        );
    }

    Ok(())
}
