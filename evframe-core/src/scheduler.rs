//! Time-slice scheduling for offline conversion.
//!
//! A known recording span `[start, end)` is divided into `fps * oversample`
//! consecutive windows of equal width. The last window is clipped to `end`
//! when the span does not divide evenly, so the windows always cover the span
//! exactly once.

use crate::types::{TimeWindow, Timestamp};
use thiserror::Error;

/// Errors raised when a span cannot be divided into valid windows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("Empty time span: start {start} is not before end {end}")]
    EmptySpan { start: Timestamp, end: Timestamp },

    #[error("Time span [{start}, {end}) is too wide to represent")]
    SpanOverflow { start: Timestamp, end: Timestamp },

    #[error("Frame rate and oversampling factor must be non-zero")]
    ZeroRate,

    #[error("Frame rate {fps} x oversampling {oversample} overflows")]
    RateOverflow { fps: u32, oversample: u32 },

    #[error("Span of {span}us is too short for {slices} slices")]
    IntervalTooSmall { span: Timestamp, slices: i64 },
}

/// Divides a known time span into fixed-width slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowScheduler {
    start: Timestamp,
    end: Timestamp,
    interval: Timestamp,
}

impl WindowScheduler {
    /// Creates a scheduler for `[start, end)` at `fps` output frames per second
    /// with `oversample` slices per displayed frame.
    ///
    /// The slice width is `(end - start) / (fps * oversample)`, truncated.
    /// Fails when that width is not positive.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        fps: u32,
        oversample: u32,
    ) -> Result<Self, WindowError> {
        if fps == 0 || oversample == 0 {
            return Err(WindowError::ZeroRate);
        }
        let slices = (fps as i64)
            .checked_mul(oversample as i64)
            .ok_or(WindowError::RateOverflow { fps, oversample })?;

        let span = end
            .checked_sub(start)
            .ok_or(WindowError::SpanOverflow { start, end })?;
        if span <= 0 {
            return Err(WindowError::EmptySpan { start, end });
        }

        let interval = span / slices;
        if interval <= 0 {
            return Err(WindowError::IntervalTooSmall { span, slices });
        }

        Ok(Self {
            start,
            end,
            interval,
        })
    }

    /// Width of each slice in microseconds.
    pub fn frame_interval(&self) -> Timestamp {
        self.interval
    }

    /// The full span covered by the windows.
    pub fn span(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    /// Number of windows the span is divided into.
    pub fn window_count(&self) -> u64 {
        slices_in(self.end - self.start, self.interval) as u64
    }

    /// Returns a fresh iterator over the windows, starting at `start`.
    pub fn windows(&self) -> Windows {
        Windows {
            next_start: self.start,
            end: self.end,
            interval: self.interval,
        }
    }
}

impl IntoIterator for &WindowScheduler {
    type Item = TimeWindow;
    type IntoIter = Windows;

    fn into_iter(self) -> Windows {
        self.windows()
    }
}

/// Lazy iterator over consecutive half-open windows.
#[derive(Debug, Clone)]
pub struct Windows {
    next_start: Timestamp,
    end: Timestamp,
    interval: Timestamp,
}

impl Iterator for Windows {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.next_start >= self.end {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.interval).min(self.end);
        self.next_start = end;
        Some(TimeWindow::new(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next_start).max(0);
        let n = slices_in(remaining, self.interval) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Windows {}

/// Number of `interval`-wide slices needed to cover `span`, rounding up.
#[inline]
fn slices_in(span: Timestamp, interval: Timestamp) -> Timestamp {
    span / interval + Timestamp::from(span % interval != 0)
}
