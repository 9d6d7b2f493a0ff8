//! Offline conversion of a recording into a frame sequence.
//!
//! The conversion is fully sequential: the scheduler slices the recording span,
//! each non-empty slice is painted into a reused frame and handed to the sink.
//! Slices without events produce no frame.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::frame::Frame;
use crate::scheduler::WindowScheduler;
use crate::sink::FrameSink;
use crate::source::RecordedSource;
use crate::types::{Resolution, Timestamp};
use log::{debug, info, warn};

/// Geometry and slicing resolved from a source before any output is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflinePlan {
    pub resolution: Resolution,
    pub scheduler: WindowScheduler,
}

/// Statistics of a finished conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Windows visited
    pub windows: u64,
    /// Frames handed to the sink
    pub frames_written: u64,
    /// Windows without events
    pub windows_skipped: u64,
    /// Events that landed inside the frame
    pub events_painted: u64,
    /// Events outside the frame geometry
    pub events_dropped: u64,
}

/// Converts recorded sources into frame sequences.
#[derive(Debug, Clone, Default)]
pub struct OfflineConverter {
    config: PipelineConfig,
}

impl OfflineConverter {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolves the frame geometry and time slicing for `source`.
    ///
    /// Missing geometry falls back to the configured default and missing
    /// timestamps are warned about; a span that cannot be sliced is an error.
    pub fn prepare<S: RecordedSource + ?Sized>(&self, source: &S) -> Result<OfflinePlan> {
        let (resolution, substituted) = Resolution::resolve(
            source.width(),
            source.height(),
            self.config.default_resolution,
        );
        if substituted {
            warn!(
                "Invalid resolution detected. Using default {}",
                self.config.default_resolution
            );
        }
        debug!("Resolution: {}", resolution);

        let start = timestamp_or_warn(source.start_timestamp(), "start", 0);
        let end = timestamp_or_warn(source.end_timestamp(), "end", start);

        let scheduler = WindowScheduler::new(start, end, self.config.fps, self.config.oversample)?;
        debug!(
            "Slicing [{}, {}) into {} windows of {}us",
            start,
            end,
            scheduler.window_count(),
            scheduler.frame_interval()
        );

        Ok(OfflinePlan {
            resolution,
            scheduler,
        })
    }

    /// Runs the conversion described by `plan`.
    ///
    /// `progress` is called with the number of windows visited so far.
    pub fn run<S, K, F>(
        &self,
        plan: &OfflinePlan,
        source: &S,
        sink: &mut K,
        mut progress: F,
    ) -> Result<ConversionSummary>
    where
        S: RecordedSource + ?Sized,
        K: FrameSink + ?Sized,
        F: FnMut(u64),
    {
        let accumulator = self.config.accumulator();
        let mut frame = Frame::new(plan.resolution);
        let mut summary = ConversionSummary::default();

        for window in plan.scheduler.windows() {
            summary.windows += 1;

            match source.get_range(window.start, window.duration()) {
                Some(batch) if !batch.is_empty() => {
                    accumulator.clear(&mut frame);
                    let painted = accumulator.paint(&mut frame, &batch);
                    summary.events_painted += painted as u64;
                    summary.events_dropped += (batch.len() - painted) as u64;
                    sink.write_frame(&frame)?;
                    summary.frames_written += 1;
                }
                _ => summary.windows_skipped += 1,
            }

            progress(summary.windows);
        }

        sink.finish()?;
        info!(
            "Wrote {} frames from {} windows ({} empty)",
            summary.frames_written, summary.windows, summary.windows_skipped
        );
        Ok(summary)
    }

    /// Prepares and runs a conversion in one step.
    pub fn convert<S, K>(&self, source: &S, sink: &mut K) -> Result<ConversionSummary>
    where
        S: RecordedSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let plan = self.prepare(source)?;
        self.run(&plan, source, sink, |_| {})
    }
}

fn timestamp_or_warn(value: Option<Timestamp>, which: &str, fallback: Timestamp) -> Timestamp {
    match value {
        Some(timestamp) => {
            debug!("{} timestamp: {}", which, timestamp);
            timestamp
        }
        None => {
            warn!(
                "Failed to get {} timestamp. Recording might lack timestamp metadata",
                which
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::recording::Recording;
    use crate::scheduler::WindowError;
    use crate::sink::{MemorySink, SinkError};
    use crate::types::{Event, EventBatch, Rgb, SensorMetadata};

    fn recording(events: Vec<Event>, width: u16, height: u16) -> Recording {
        Recording::new(events, SensorMetadata { width, height })
    }

    #[test]
    fn test_unknown_geometry_uses_default() {
        let source = recording(vec![Event::new(0, 0, true, 0), Event::new(0, 0, true, 999)], 0, 0);
        let plan = OfflineConverter::default().prepare(&source).unwrap();
        assert_eq!(plan.resolution, Resolution::new(1280, 720));
    }

    #[test]
    fn test_empty_recording_is_invalid_window() {
        let source = recording(Vec::new(), 64, 64);
        let result = OfflineConverter::default().prepare(&source);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidWindow(WindowError::EmptySpan { .. }))
        ));
    }

    #[test]
    fn test_short_recording_is_invalid_window() {
        // Span of 2us cannot hold 300 slices.
        let source = recording(vec![Event::new(0, 0, true, 0), Event::new(0, 0, true, 1)], 8, 8);
        let mut sink = MemorySink::new();
        let result = OfflineConverter::default().convert(&source, &mut sink);
        assert!(matches!(
            result,
            Err(PipelineError::InvalidWindow(WindowError::IntervalTooSmall { .. }))
        ));
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_frames_only_for_active_windows() {
        let source = recording(
            vec![
                Event::new(1, 1, true, 0),
                Event::new(2, 2, false, 150),
                Event::new(3, 3, true, 999),
            ],
            4,
            4,
        );
        let converter = OfflineConverter::new(PipelineConfig::default().with_fps(10).with_oversample(1));
        let mut sink = MemorySink::new();
        let summary = converter.convert(&source, &mut sink).unwrap();

        // [0,100) [100,200) ... [900,1000): three windows hold events.
        assert_eq!(summary.windows, 10);
        assert_eq!(summary.frames_written, 3);
        assert_eq!(summary.windows_skipped, 7);
        assert_eq!(sink.frames.len(), 3);
        assert_eq!(sink.frames[1].pixel(2, 2), Some(Rgb::BLUE));
        assert_eq!(sink.frames[1].lit_pixels(), 1);
    }

    #[test]
    fn test_out_of_range_events_are_counted() {
        let source = recording(
            vec![Event::new(1, 1, true, 0), Event::new(40, 1, true, 5), Event::new(0, 0, true, 99)],
            4,
            4,
        );
        let converter = OfflineConverter::new(PipelineConfig::default().with_fps(1).with_oversample(1));
        let summary = converter.convert(&source, &mut MemorySink::new()).unwrap();
        assert_eq!(summary.events_painted, 2);
        assert_eq!(summary.events_dropped, 1);
    }

    struct EmptySource;

    impl RecordedSource for EmptySource {
        fn width(&self) -> u16 {
            16
        }
        fn height(&self) -> u16 {
            16
        }
        fn start_timestamp(&self) -> Option<Timestamp> {
            Some(0)
        }
        fn end_timestamp(&self) -> Option<Timestamp> {
            Some(1_000_000)
        }
        fn get_range(&self, _start: Timestamp, _duration: Timestamp) -> Option<EventBatch> {
            Some(EventBatch::new())
        }
    }

    #[test]
    fn test_empty_batches_never_reach_sink() {
        let mut sink = MemorySink::new();
        let summary = OfflineConverter::default().convert(&EmptySource, &mut sink).unwrap();
        // 300 slices of 3333us plus a 100us tail
        assert_eq!(summary.windows, 301);
        assert_eq!(summary.windows_skipped, 301);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_sink_errors_abort() {
        let source = recording(vec![Event::new(1, 1, true, 0), Event::new(1, 1, true, 999)], 4, 4);
        let converter = OfflineConverter::new(PipelineConfig::default().with_fps(1).with_oversample(1));
        let mut sink = MemorySink::with_resolution(Resolution::new(8, 8));
        let result = converter.convert(&source, &mut sink);
        assert!(matches!(
            result,
            Err(PipelineError::Sink(SinkError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_progress_reports_every_window() {
        let source = recording(vec![Event::new(0, 0, true, 0), Event::new(0, 0, true, 9_999)], 2, 2);
        let converter = OfflineConverter::new(PipelineConfig::default().with_fps(5).with_oversample(2));
        let plan = converter.prepare(&source).unwrap();
        let mut seen = Vec::new();
        converter
            .run(&plan, &source, &mut MemorySink::new(), |done| seen.push(done))
            .unwrap();
        assert_eq!(seen, (1..=10).collect::<Vec<u64>>());
    }
}
