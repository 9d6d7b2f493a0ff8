//! A live camera that replays a recording.
//!
//! The camera streams the recording on its own delivery thread, paced against
//! the wall clock. Each delivery slice is pushed to the registered callbacks
//! and appended to a pending batch; batches are closed by a time or event
//! count budget and queued for polling, the way a device buffers batches for
//! synchronous readers.

use crate::error::{PipelineError, Result};
use crate::recording::Recording;
use crate::source::{CallbackId, CallbackRegistry, EventCallback, LiveSource};
use crate::types::{Event, EventBatch, Timestamp};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest single sleep of the pacing loop, bounding stop latency.
const PACING_STEP: Duration = Duration::from_millis(10);

/// Replay settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// Playback speed relative to real time. 0 delivers as fast as possible.
    pub speed: f64,
    /// Close a batch once it spans this many microseconds.
    pub batch_time_us: Timestamp,
    /// Close a batch once it holds this many events.
    pub batch_events: usize,
    /// Events within this many microseconds are delivered together.
    pub delivery_slice_us: Timestamp,
    /// Closed batches kept for polling; the oldest is dropped when full.
    pub queue_depth: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            batch_time_us: 10_000_000,
            batch_events: 1_000_000,
            delivery_slice_us: 1_000,
            queue_depth: 64,
        }
    }
}

impl ReplayConfig {
    /// Delivers the whole recording without pacing.
    pub fn unpaced() -> Self {
        Self {
            speed: 0.0,
            ..Self::default()
        }
    }

    /// Set playback speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Whether `speed` is usable for pacing.
    pub fn speed_is_valid(&self) -> bool {
        self.speed.is_finite() && self.speed >= 0.0
    }

    /// Set the batch closing budgets.
    pub fn with_batch_limits(mut self, batch_time_us: Timestamp, batch_events: usize) -> Self {
        self.batch_time_us = batch_time_us;
        self.batch_events = batch_events;
        self
    }
}

/// State shared with the delivery thread.
struct Shared {
    callbacks: CallbackRegistry,
    batch_tx: Sender<EventBatch>,
    batch_rx: Receiver<EventBatch>,
    streaming: AtomicBool,
    finished: AtomicBool,
    delivered: AtomicU64,
    dropped_batches: AtomicU64,
}

impl Shared {
    fn push_batch(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let batch = EventBatch::from_sorted(events);
        if let Err(TrySendError::Full(batch)) = self.batch_tx.try_send(batch) {
            // Drop the oldest batch to make room.
            let _ = self.batch_rx.try_recv();
            let dropped = self.dropped_batches.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("Batch queue full, dropped oldest batch ({} so far)", dropped);
            let _ = self.batch_tx.try_send(batch);
        }
    }
}

/// A [`LiveSource`] streaming a recording.
pub struct ReplayCamera {
    recording: Arc<Recording>,
    config: ReplayConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayCamera {
    pub fn new(recording: Recording, config: ReplayConfig) -> Self {
        let (batch_tx, batch_rx) = crossbeam_channel::bounded(config.queue_depth.max(1));
        Self {
            recording: Arc::new(recording),
            config,
            shared: Arc::new(Shared {
                callbacks: CallbackRegistry::new(),
                batch_tx,
                batch_rx,
                streaming: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                dropped_batches: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts streaming. Does nothing if already streaming.
    pub fn start(&self) -> Result<()> {
        if !self.config.speed_is_valid() {
            return Err(PipelineError::InvalidReplaySpeed(self.config.speed));
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        self.shared.finished.store(false, Ordering::SeqCst);
        self.shared.streaming.store(true, Ordering::SeqCst);

        let recording = Arc::clone(&self.recording);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name("replay-delivery".to_string())
            .spawn(move || deliver(&recording, &config, &shared))
            .map_err(|source| {
                self.shared.streaming.store(false, Ordering::SeqCst);
                PipelineError::WorkerSpawn {
                    name: "replay delivery",
                    source,
                }
            })?;
        *worker = Some(handle);

        info!(
            "Streaming started: {} events at {}x speed",
            self.recording.len(),
            self.config.speed
        );
        Ok(())
    }

    /// Stops streaming and waits for the delivery thread to exit.
    ///
    /// No callback runs after this returns.
    pub fn stop(&self) {
        self.shared.streaming.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Replay delivery thread panicked");
            }
            info!("Streaming stopped after {} events", self.events_delivered());
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
            && !self.shared.finished.load(Ordering::SeqCst)
    }

    /// Events handed to callbacks so far.
    pub fn events_delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.shared.callbacks.len()
    }

    /// Batches discarded because nobody polled them in time.
    pub fn batches_dropped(&self) -> u64 {
        self.shared.dropped_batches.load(Ordering::Relaxed)
    }
}

impl Drop for ReplayCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LiveSource for ReplayCamera {
    fn width(&self) -> u16 {
        self.recording.metadata.width
    }

    fn height(&self) -> u16 {
        self.recording.metadata.height
    }

    fn register_callback(&self, callback: EventCallback) -> CallbackId {
        self.shared.callbacks.register(callback)
    }

    fn unregister_callback(&self, id: CallbackId) -> bool {
        self.shared.callbacks.unregister(id)
    }

    fn poll_next_batch(&self) -> Option<EventBatch> {
        self.shared.batch_rx.try_recv().ok()
    }

    fn is_exhausted(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst) && self.shared.batch_rx.is_empty()
    }
}

/// Marks delivery finished when dropped, even if the delivery thread unwinds.
struct FinishOnDrop<'a>(&'a Shared);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::SeqCst);
    }
}

/// Delivery thread body.
fn deliver(recording: &Recording, config: &ReplayConfig, shared: &Shared) {
    let _finish = FinishOnDrop(shared);
    let events = recording.events();
    let origin = events.first().map(|e| e.timestamp).unwrap_or_default();
    let clock = Instant::now();
    let slice_width = config.delivery_slice_us.max(1);
    let mut pending: Vec<Event> = Vec::new();
    let mut next = 0;

    while next < events.len() {
        let slice_start = events[next].timestamp;
        if !pace(shared, clock, slice_start.saturating_sub(origin), config.speed) {
            break;
        }

        let slice_end = slice_start.saturating_add(slice_width);
        let end = next + events[next..].partition_point(|e| e.timestamp < slice_end);
        let slice = &events[next..end];

        shared.callbacks.dispatch(slice);
        shared
            .delivered
            .fetch_add(slice.len() as u64, Ordering::Relaxed);

        pending.extend_from_slice(slice);
        close_full_batches(&mut pending, config, shared);
        next = end;
    }

    shared.push_batch(pending);
    debug!("Replay delivery finished");
}

/// Waits until `offset` of recording time has elapsed at `speed`.
///
/// Returns `false` if streaming was stopped while waiting, or if the due time
/// is beyond what the clock can represent.
fn pace(shared: &Shared, clock: Instant, offset: Timestamp, speed: f64) -> bool {
    if speed > 0.0 && offset > 0 {
        let due = Duration::try_from_secs_f64(offset as f64 / 1e6 / speed)
            .ok()
            .and_then(|delay| clock.checked_add(delay));
        let Some(due) = due else {
            warn!(
                "Replay offset {} us is unreachable at {}x speed, ending delivery",
                offset, speed
            );
            return false;
        };
        loop {
            if !shared.streaming.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                break;
            }
            thread::sleep((due - now).min(PACING_STEP));
        }
    }
    shared.streaming.load(Ordering::SeqCst)
}

fn close_full_batches(pending: &mut Vec<Event>, config: &ReplayConfig, shared: &Shared) {
    let max_events = config.batch_events.max(1);
    while pending.len() >= max_events {
        let rest = pending.split_off(max_events);
        shared.push_batch(std::mem::replace(pending, rest));
    }
    let span = match (pending.first(), pending.last()) {
        (Some(first), Some(last)) => last.timestamp - first.timestamp,
        _ => return,
    };
    if span >= config.batch_time_us {
        shared.push_batch(std::mem::take(pending));
    }
}
