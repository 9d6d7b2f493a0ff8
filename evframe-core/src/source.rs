//! Event sources consumed by the accumulation pipeline.
//!
//! A [`RecordedSource`] answers pull queries over a finite, known time range.
//! A [`LiveSource`] pushes event slices to registered callbacks on its own
//! delivery thread and buffers batches for non-blocking polling.

use crate::types::{Event, EventBatch, Timestamp};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A finite recording that can be queried by time range.
pub trait RecordedSource {
    /// Sensor width, 0 if unknown.
    fn width(&self) -> u16;

    /// Sensor height, 0 if unknown.
    fn height(&self) -> u16;

    /// First timestamp of the recording, if known.
    fn start_timestamp(&self) -> Option<Timestamp>;

    /// Exclusive end timestamp of the recording, if known.
    fn end_timestamp(&self) -> Option<Timestamp>;

    /// Returns the events with timestamps in `[start, start + duration)`.
    ///
    /// `None` for an invalid or out-of-range query.
    fn get_range(&self, start: Timestamp, duration: Timestamp) -> Option<EventBatch>;
}

/// Callback invoked with each slice of delivered events.
pub type EventCallback = Box<dyn Fn(&[Event]) + Send + Sync>;

/// Handle identifying a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// A device streaming events as they happen.
pub trait LiveSource: Send + Sync {
    /// Sensor width, 0 if unknown.
    fn width(&self) -> u16;

    /// Sensor height, 0 if unknown.
    fn height(&self) -> u16;

    /// Registers a callback to be invoked on the delivery thread.
    fn register_callback(&self, callback: EventCallback) -> CallbackId;

    /// Removes a callback.
    ///
    /// Once this returns, the callback is not running and will not run again.
    /// Returns `false` if the handle was unknown.
    fn unregister_callback(&self, id: CallbackId) -> bool;

    /// Returns the next buffered batch without blocking.
    fn poll_next_batch(&self) -> Option<EventBatch>;

    /// Whether the source will never produce another batch.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Thread-safe registry of event callbacks.
///
/// Dispatch holds a read lock for the duration of the invocation and
/// unregistration takes the write lock, so a removed callback can never be
/// mid-call once [`CallbackRegistry::unregister`] returns. A callback must not
/// register or unregister callbacks on the registry that invokes it.
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(CallbackId, EventCallback)>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: EventCallback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, callback));
        id
    }

    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    /// Invokes every registered callback with `events`.
    pub fn dispatch(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read();
        for (_, callback) in callbacks.iter() {
            callback(events);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_dispatch_reaches_all_callbacks() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            registry.register(Box::new(move |events| {
                seen.fetch_add(events.len(), Ordering::SeqCst);
            }));
        }
        registry.dispatch(&[Event::new(0, 0, true, 0), Event::new(1, 1, false, 1)]);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unregistered_callback_is_not_called() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = registry.register(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(&[Event::new(0, 0, true, 0)]);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.dispatch(&[Event::new(0, 0, true, 1)]);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_waits_for_in_flight_dispatch() {
        for _ in 0..50 {
            let registry = CallbackRegistry::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let in_call = Arc::new(AtomicBool::new(false));
            let id = {
                let calls = Arc::clone(&calls);
                let in_call = Arc::clone(&in_call);
                registry.register(Box::new(move |_| {
                    in_call.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(200));
                    calls.fetch_add(1, Ordering::SeqCst);
                    in_call.store(false, Ordering::SeqCst);
                }))
            };
            let done = AtomicBool::new(false);

            let (removed, mid_call, after, later) = std::thread::scope(|scope| {
                scope.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        registry.dispatch(&[Event::new(0, 0, true, 0)]);
                    }
                });
                while calls.load(Ordering::SeqCst) == 0 {
                    std::thread::yield_now();
                }

                let removed = registry.unregister(id);
                let mid_call = in_call.load(Ordering::SeqCst);
                let after = calls.load(Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                let later = calls.load(Ordering::SeqCst);
                done.store(true, Ordering::SeqCst);
                (removed, mid_call, after, later)
            });

            assert!(removed);
            assert!(!mid_call);
            assert_eq!(later, after);
        }
    }

    #[test]
    fn test_empty_slices_are_not_dispatched() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        registry.register(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        registry.dispatch(&[]);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
