//! Core types for event streams and their raster frames.
//!
//! Events are the pixel-level brightness changes produced by an event camera.
//! Batches group them in timestamp order, windows select a time slice of a
//! stream, and resolutions describe the sensor geometry frames are built at.

use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Timestamp in microseconds.
pub type Timestamp = i64;

/// A single Change Detection event.
///
/// Each event carries the pixel coordinates, the polarity of the brightness
/// change and its timestamp in microseconds. Events are immutable once
/// produced by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Event {
    /// X coordinate of the pixel
    pub x: u16,
    /// Y coordinate of the pixel
    pub y: u16,
    /// `true` = ON (increase in brightness), `false` = OFF (decrease)
    pub polarity: bool,
    /// Timestamp in microseconds
    pub timestamp: Timestamp,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(x: u16, y: u16, polarity: bool, timestamp: Timestamp) -> Self {
        Self {
            x,
            y,
            polarity,
            timestamp,
        }
    }
}

/// A timestamp-ordered group of events retrieved in one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    events: Vec<Event>,
}

impl EventBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps events that are already in non-decreasing timestamp order.
    pub fn from_sorted(events: Vec<Event>) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Self { events }
    }

    /// Event with the smallest timestamp.
    pub fn front(&self) -> Option<&Event> {
        self.events.first()
    }

    /// Event with the largest timestamp.
    pub fn back(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Time spanned by the batch, `back - front`; zero for fewer than two events.
    pub fn duration(&self) -> Timestamp {
        match (self.front(), self.back()) {
            (Some(front), Some(back)) => back.timestamp.saturating_sub(front.timestamp),
            _ => 0,
        }
    }

    /// Consumes the batch and returns its events.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl Deref for EventBatch {
    type Target = [Event];

    fn deref(&self) -> &[Event] {
        &self.events
    }
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Width of the window; never negative.
    pub fn duration(&self) -> Timestamp {
        self.end.saturating_sub(self.start).max(0)
    }

    #[inline]
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// Frame geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

impl Default for Resolution {
    fn default() -> Self {
        // Gen4 sensor geometry
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Resolution {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Resolves a reported geometry, where 0 means "unknown".
    ///
    /// Returns the fallback and `true` when either dimension is unknown, so
    /// the caller can warn about the substitution.
    pub fn resolve(width: u16, height: u16, fallback: Resolution) -> (Self, bool) {
        if width == 0 || height == 0 {
            (fallback, true)
        } else {
            (Self { width, height }, false)
        }
    }

    /// Number of pixels in a frame of this geometry.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An RGB pixel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLACK: Rgb = Rgb([0, 0, 0]);
    pub const WHITE: Rgb = Rgb([255, 255, 255]);
    pub const BLUE: Rgb = Rgb([0, 0, 255]);
}

/// Sensor metadata reported by a recording, 0 meaning unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorMetadata {
    /// Sensor width in pixels
    pub width: u16,
    /// Sensor height in pixels
    pub height: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_front_back_duration() {
        let batch = EventBatch::from_sorted(vec![
            Event::new(0, 0, true, 100),
            Event::new(1, 1, false, 150),
            Event::new(2, 2, true, 400),
        ]);
        assert_eq!(batch.front().map(|e| e.timestamp), Some(100));
        assert_eq!(batch.back().map(|e| e.timestamp), Some(400));
        assert_eq!(batch.duration(), 300);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_empty_batch_has_zero_duration() {
        let batch = EventBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.duration(), 0);
        assert!(batch.front().is_none());
    }

    #[test]
    fn test_window_is_half_open() {
        let window = TimeWindow::new(10, 20);
        assert!(window.contains(10));
        assert!(window.contains(19));
        assert!(!window.contains(20));
        assert_eq!(window.duration(), 10);
        assert_eq!(TimeWindow::new(20, 10).duration(), 0);
    }

    #[test]
    fn test_extreme_window_duration_saturates() {
        let window = TimeWindow::new(Timestamp::MIN, Timestamp::MAX);
        assert_eq!(window.duration(), Timestamp::MAX);
        assert_eq!(TimeWindow::new(Timestamp::MAX, Timestamp::MIN).duration(), 0);

        let batch = EventBatch::from_sorted(vec![
            Event::new(0, 0, true, Timestamp::MIN),
            Event::new(0, 0, true, Timestamp::MAX),
        ]);
        assert_eq!(batch.duration(), Timestamp::MAX);
    }

    #[test]
    fn test_resolution_fallback() {
        let fallback = Resolution::default();
        assert_eq!(
            Resolution::resolve(640, 480, fallback),
            (Resolution::new(640, 480), false)
        );
        assert_eq!(Resolution::resolve(0, 480, fallback), (fallback, true));
        assert_eq!(Resolution::resolve(640, 0, fallback), (fallback, true));
        assert_eq!(fallback.to_string(), "1280x720");
    }
}
