//! Live visualization of a streaming source.
//!
//! Three contexts take part in a live session:
//!
//! - the source's delivery thread, which runs the paint callback,
//! - the render loop on a dedicated thread, presenting at a fixed cadence,
//! - the batch collector on the calling thread.
//!
//! The live frame is the only shared mutable state. It sits behind one mutex
//! that is held only to paint a slice or to copy-and-clear the frame, never
//! while presenting or sleeping. All loops observe one [`StopToken`].

use crate::cancel::StopToken;
use crate::collector::{BatchCollector, CollectionSummary};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::frame::{Frame, FrameAccumulator};
use crate::sink::DisplaySink;
use crate::source::LiveSource;
use crate::types::Resolution;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Totals of a render loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub frames_presented: u64,
    pub events_painted: u64,
    /// The display asked to close.
    pub cancelled_by_display: bool,
}

/// Totals of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub render: RenderSummary,
    pub collection: CollectionSummary,
}

/// Paints live events into a shared frame and presents it periodically.
///
/// Each presented frame holds only the events delivered since the previous
/// presentation.
#[derive(Debug, Clone)]
pub struct LiveRenderer {
    resolution: Resolution,
    accumulator: FrameAccumulator,
    period: Duration,
}

impl LiveRenderer {
    pub fn new(resolution: Resolution, accumulator: FrameAccumulator, period: Duration) -> Self {
        Self {
            resolution,
            accumulator,
            period,
        }
    }

    /// Runs the render loop until `stop` is raised or the display asks to
    /// close, in which case `stop` is raised for the other loops.
    ///
    /// The paint callback is unregistered before this returns, so no paint
    /// happens afterwards.
    pub fn run<S, D>(&self, source: &S, display: &mut D, stop: &StopToken) -> RenderSummary
    where
        S: LiveSource + ?Sized,
        D: DisplaySink + ?Sized,
    {
        let live = Arc::new(Mutex::new(Frame::new(self.resolution)));
        let painted = Arc::new(AtomicU64::new(0));

        let callback_id = {
            let live = Arc::clone(&live);
            let painted = Arc::clone(&painted);
            let accumulator = self.accumulator;
            source.register_callback(Box::new(move |events| {
                let mut frame = live.lock();
                let n = accumulator.paint(&mut frame, events);
                painted.fetch_add(n as u64, Ordering::Relaxed);
            }))
        };
        debug!("Paint callback registered at {}", self.resolution);

        let mut shown = Frame::new(self.resolution);
        let mut summary = RenderSummary::default();
        let mut next_tick = Instant::now();

        while !stop.is_stopped() {
            {
                let mut frame = live.lock();
                shown.copy_from(&frame);
                frame.clear();
            }
            display.present(&shown);
            summary.frames_presented += 1;

            if display.cancel_requested() {
                info!("Display closed, stopping session");
                summary.cancelled_by_display = true;
                stop.stop();
                break;
            }

            next_tick += self.period;
            let now = Instant::now();
            if next_tick > now {
                stop.wait_timeout(next_tick - now);
            } else {
                // Fell behind; restart the cadence from now.
                next_tick = now;
            }
        }

        if !source.unregister_callback(callback_id) {
            warn!("Paint callback was already removed");
        }
        summary.events_painted = painted.load(Ordering::Relaxed);
        info!(
            "Callback removed and visualization closed after {} frames",
            summary.frames_presented
        );
        summary
    }
}

/// Runs a live session: rendering on a dedicated thread and batch collection
/// on the calling thread, until a budget is reached, the source runs dry, the
/// display closes or `stop` is raised externally.
///
/// Both loops have exited and the paint callback is unregistered when this
/// returns.
pub fn run_session<S, D>(
    source: &S,
    display: &mut D,
    config: &PipelineConfig,
    stop: &StopToken,
) -> Result<SessionSummary>
where
    S: LiveSource + ?Sized,
    D: DisplaySink + Send + ?Sized,
{
    let (resolution, substituted) =
        Resolution::resolve(source.width(), source.height(), config.default_resolution);
    if substituted {
        warn!(
            "Invalid resolution detected. Using default {}",
            config.default_resolution
        );
    }

    let renderer = LiveRenderer::new(resolution, config.accumulator(), config.display_period());
    let mut collector = BatchCollector::new(config.collector.clone());

    thread::scope(|scope| {
        let render_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("live-render".to_string())
            .spawn_scoped(scope, move || renderer.run(source, display, &render_stop))
            .map_err(|err| PipelineError::WorkerSpawn {
                name: "live render",
                source: err,
            })?;

        let collection = collector.run(source, stop);
        // The collector may have ended on its own; make sure rendering ends too.
        stop.stop();

        let render = handle
            .join()
            .map_err(|_| PipelineError::WorkerPanicked("live render"))?;
        Ok(SessionSummary { render, collection })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::{CallbackId, CallbackRegistry, EventCallback};
    use crate::types::{Event, EventBatch, Rgb};
    use std::sync::atomic::AtomicBool;

    /// A source whose events are pushed by the test itself.
    #[derive(Default)]
    struct ManualSource {
        callbacks: CallbackRegistry,
        /// Callback invocations that completed.
        calls: Arc<AtomicU64>,
    }

    impl ManualSource {
        fn push(&self, events: &[Event]) {
            self.callbacks.dispatch(events);
        }
    }

    impl LiveSource for ManualSource {
        fn width(&self) -> u16 {
            8
        }
        fn height(&self) -> u16 {
            8
        }
        fn register_callback(&self, callback: EventCallback) -> CallbackId {
            let calls = Arc::clone(&self.calls);
            self.callbacks.register(Box::new(move |events| {
                callback(events);
                calls.fetch_add(1, Ordering::SeqCst);
            }))
        }
        fn unregister_callback(&self, id: CallbackId) -> bool {
            self.callbacks.unregister(id)
        }
        fn poll_next_batch(&self) -> Option<EventBatch> {
            None
        }
    }

    /// Asks to close after a fixed number of presented frames.
    struct ClosingDisplay {
        remaining: u32,
    }

    impl DisplaySink for ClosingDisplay {
        fn present(&mut self, _frame: &Frame) {
            self.remaining = self.remaining.saturating_sub(1);
        }
        fn cancel_requested(&mut self) -> bool {
            self.remaining == 0
        }
    }

    fn renderer() -> LiveRenderer {
        LiveRenderer::new(
            Resolution::new(8, 8),
            FrameAccumulator::default(),
            Duration::from_millis(10),
        )
    }

    fn wait_for_callback(source: &ManualSource) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while source.callbacks.is_empty() {
            assert!(Instant::now() < deadline, "callback never registered");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_frames_are_cleared_between_presentations() {
        let source = ManualSource::default();
        let stop = StopToken::new();
        let mut display = MemorySink::new();

        let summary = thread::scope(|scope| {
            let handle = scope.spawn(|| renderer().run(&source, &mut display, &stop));
            wait_for_callback(&source);
            source.push(&[Event::new(1, 1, true, 0)]);
            thread::sleep(Duration::from_millis(100));
            source.push(&[Event::new(2, 2, false, 1)]);
            thread::sleep(Duration::from_millis(100));
            stop.stop();
            handle.join().unwrap()
        });

        assert_eq!(summary.events_painted, 2);
        assert_eq!(summary.frames_presented, display.frames.len() as u64);
        let with_first = display
            .frames
            .iter()
            .filter(|f| f.pixel(1, 1) == Some(Rgb::WHITE))
            .count();
        let with_second = display
            .frames
            .iter()
            .filter(|f| f.pixel(2, 2) == Some(Rgb::BLUE))
            .count();
        assert_eq!(with_first, 1);
        assert_eq!(with_second, 1);
        assert!(display.frames.iter().all(|f| f.lit_pixels() <= 1));
    }

    #[test]
    fn test_display_close_stops_session() {
        let source = ManualSource::default();
        let stop = StopToken::new();
        let mut display = ClosingDisplay { remaining: 3 };

        let summary = renderer().run(&source, &mut display, &stop);

        assert!(summary.cancelled_by_display);
        assert_eq!(summary.frames_presented, 3);
        assert!(stop.is_stopped());
        assert!(source.callbacks.is_empty());
    }

    #[test]
    fn test_stopped_renderer_presents_nothing() {
        let source = ManualSource::default();
        let stop = StopToken::new();
        stop.stop();

        let summary = renderer().run(&source, &mut MemorySink::new(), &stop);
        assert_eq!(summary.frames_presented, 0);
        assert!(source.callbacks.is_empty());

        source.push(&[Event::new(0, 0, true, 0)]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_paint_after_run_returns() {
        let source = ManualSource::default();
        let stop = StopToken::new();
        let done = AtomicBool::new(false);
        let mut display = MemorySink::new();

        let (summary, calls_at_return) = thread::scope(|scope| {
            // Delivers continuously, before, during and after teardown.
            let pusher = scope.spawn(|| {
                let mut t = 0;
                while !done.load(Ordering::SeqCst) {
                    source.push(&[Event::new(3, 3, true, t)]);
                    t += 1;
                }
            });
            let render = scope.spawn(|| {
                let summary = renderer().run(&source, &mut display, &stop);
                (summary, source.calls.load(Ordering::SeqCst))
            });

            wait_for_callback(&source);
            thread::sleep(Duration::from_millis(50));
            stop.stop();
            let result = render.join();
            thread::sleep(Duration::from_millis(20));
            done.store(true, Ordering::SeqCst);
            pusher.join().unwrap();
            result.unwrap()
        });

        assert!(source.callbacks.is_empty());
        assert!(calls_at_return > 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_at_return);
        // Every completed invocation painted one event, none afterwards.
        assert_eq!(summary.events_painted, calls_at_return);
    }

    #[test]
    fn test_session_ends_when_display_closes() {
        let source = ManualSource::default();
        let stop = StopToken::new();
        let config = PipelineConfig::default();
        let mut display = ClosingDisplay { remaining: 2 };

        let summary = run_session(&source, &mut display, &config, &stop).unwrap();

        assert!(summary.render.cancelled_by_display);
        assert_eq!(
            summary.collection.reason,
            crate::collector::StopReason::Cancelled
        );
        assert!(source.callbacks.is_empty());
    }
}
