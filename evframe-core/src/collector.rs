//! Batch collection from a live source.
//!
//! The collector polls the source for buffered batches, independent of
//! rendering, and keeps running totals of collected time and events. It stops
//! the session once a budget is reached.

use crate::cancel::StopToken;
use crate::config::CollectorConfig;
use crate::source::LiveSource;
use crate::types::{EventBatch, Timestamp};
use log::{debug, info};

/// Why a collection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Summed batch durations reached the budget.
    DurationBudget,
    /// Collected event count reached the budget.
    EventBudget,
    /// The source has nothing more to deliver.
    SourceExhausted,
    /// Another context raised the stop signal.
    Cancelled,
}

/// Totals of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSummary {
    pub batches: u64,
    pub events: u64,
    /// Sum of `back - front` over all collected batches, in microseconds.
    pub accumulated: Timestamp,
    pub reason: StopReason,
}

/// Polls batches from a live source until a budget is spent.
#[derive(Debug, Clone)]
pub struct BatchCollector {
    config: CollectorConfig,
    batches: u64,
    events: u64,
    accumulated: Timestamp,
}

impl BatchCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            batches: 0,
            events: 0,
            accumulated: 0,
        }
    }

    /// Summed duration of the batches collected so far.
    pub fn accumulated(&self) -> Timestamp {
        self.accumulated
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Fetches the next buffered batch without blocking and records it.
    ///
    /// Returns `None` when no non-empty batch is ready.
    pub fn poll<S: LiveSource + ?Sized>(&mut self, source: &S) -> Option<EventBatch> {
        let batch = source.poll_next_batch().filter(|b| !b.is_empty())?;
        self.record(&batch);
        Some(batch)
    }

    fn record(&mut self, batch: &EventBatch) {
        let batch_time = batch.duration();
        self.batches += 1;
        self.events += batch.len() as u64;
        self.accumulated += batch_time;
        info!(
            "Batch time: {:.3} seconds, accumulated time: {:.3} seconds",
            batch_time as f64 / 1e6,
            self.accumulated as f64 / 1e6
        );
        debug!("Batch of {} events, {} total", batch.len(), self.events);
    }

    /// The budget that has been reached, if any.
    pub fn budget_reached(&self) -> Option<StopReason> {
        if self.accumulated >= self.config.duration_budget_us {
            return Some(StopReason::DurationBudget);
        }
        match self.config.event_budget {
            Some(limit) if self.events >= limit => Some(StopReason::EventBudget),
            _ => None,
        }
    }

    /// Collects batches until a budget is reached, the source runs dry or
    /// `stop` is raised.
    ///
    /// Reaching a budget or exhausting the source raises `stop` so that every
    /// other loop sharing the token winds down too.
    pub fn run<S: LiveSource + ?Sized>(
        &mut self,
        source: &S,
        stop: &StopToken,
    ) -> CollectionSummary {
        let reason = loop {
            if stop.is_stopped() {
                break StopReason::Cancelled;
            }

            if self.poll(source).is_none() {
                if source.is_exhausted() {
                    break StopReason::SourceExhausted;
                }
                stop.wait_timeout(self.config.backoff());
            }

            if let Some(reason) = self.budget_reached() {
                break reason;
            }
        };

        if reason != StopReason::Cancelled {
            stop.stop();
        }
        info!(
            "Collection finished ({:?}): {} batches, {} events, {:.3} seconds",
            reason,
            self.batches,
            self.events,
            self.accumulated as f64 / 1e6
        );

        CollectionSummary {
            batches: self.batches,
            events: self.events,
            accumulated: self.accumulated,
            reason,
        }
    }
}
