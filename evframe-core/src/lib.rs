//! Event-stream to frame accumulation for event cameras.
//!
//! This crate turns the sparse, irregularly timed output of an event camera
//! into fixed-rate raster frames. It supports two modes:
//!
//! - **Offline**: a recorded span is sliced into fixed-width windows, every
//!   window with events is painted into a frame and handed to a frame sink.
//! - **Live**: a streaming source paints into a shared frame from its delivery
//!   thread while a render loop presents and clears it at a fixed cadence and
//!   a batch collector polls buffered batches until a time budget is spent.
//!
//! # Example
//!
//! ```no_run
//! use evframe_core::{read_recording, FieldOrder, OfflineConverter, PipelineConfig};
//! use evframe_core::sink::PngSequenceWriter;
//!
//! let recording = read_recording("recording.csv", FieldOrder::default()).unwrap();
//! let converter = OfflineConverter::new(PipelineConfig::default());
//! let plan = converter.prepare(&recording).unwrap();
//! let mut sink = PngSequenceWriter::create("frames", plan.resolution).unwrap();
//! let summary = converter.run(&plan, &recording, &mut sink, |_| {}).unwrap();
//!
//! println!("Wrote {} frames", summary.frames_written);
//! ```

pub mod cancel;
pub mod collector;
pub mod config;
pub mod error;
pub mod frame;
pub mod live;
pub mod offline;
pub mod recorder;
pub mod recording;
pub mod replay;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use cancel::StopToken;
pub use collector::{BatchCollector, CollectionSummary, StopReason};
pub use config::{CollectorConfig, ConfigError, PipelineConfig};
pub use error::PipelineError;
pub use frame::{Frame, FrameAccumulator};
pub use live::{run_session, LiveRenderer, RenderSummary, SessionSummary};
pub use offline::{ConversionSummary, OfflineConverter, OfflinePlan};
pub use recorder::{RecorderSummary, StreamRecorder};
pub use recording::{read_recording, FieldOrder, Recording, RecordingError};
pub use replay::{ReplayCamera, ReplayConfig};
pub use scheduler::{WindowError, WindowScheduler};
pub use sink::{DisplaySink, FrameSink, SinkError};
pub use source::{CallbackId, EventCallback, LiveSource, RecordedSource};
pub use types::{Event, EventBatch, Resolution, Rgb, SensorMetadata, TimeWindow, Timestamp};
