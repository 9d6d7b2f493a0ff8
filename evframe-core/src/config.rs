//! Pipeline configuration.
//!
//! Every field has a default, so a TOML file only needs to name the values it
//! changes:
//!
//! ```toml
//! fps = 60
//! color_off = [255, 0, 0]
//!
//! [collector]
//! duration_budget_us = 5000000
//! ```

use crate::frame::FrameAccumulator;
use crate::types::{Resolution, Rgb, Timestamp};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for the live batch collection loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Stop once the summed batch durations reach this many microseconds.
    pub duration_budget_us: Timestamp,
    /// Stop once this many events have been collected.
    pub event_budget: Option<u64>,
    /// Sleep between polls that returned nothing.
    pub backoff_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            duration_budget_us: 10_000_000,
            event_budget: None,
            backoff_ms: 100,
        }
    }
}

impl CollectorConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Settings shared by the offline and live pipelines.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Output frame rate of offline conversion.
    pub fps: u32,
    /// Time slices per displayed frame.
    pub oversample: u32,
    pub color_on: Rgb,
    pub color_off: Rgb,
    /// Geometry used when the source reports none.
    pub default_resolution: Resolution,
    /// Live display refresh rate.
    pub display_hz: u32,
    pub collector: CollectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            oversample: 10,
            color_on: Rgb::WHITE,
            color_off: Rgb::BLUE,
            default_resolution: Resolution::default(),
            display_hz: 30,
            collector: CollectorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Set output frame rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set time slices per displayed frame.
    pub fn with_oversample(mut self, oversample: u32) -> Self {
        self.oversample = oversample;
        self
    }

    /// Set the live collection budget.
    pub fn with_duration_budget(mut self, budget_us: Timestamp) -> Self {
        self.collector.duration_budget_us = budget_us;
        self
    }

    pub fn accumulator(&self) -> FrameAccumulator {
        FrameAccumulator::new(self.color_on, self.color_off)
    }

    /// Interval between two live display refreshes.
    pub fn display_period(&self) -> Duration {
        Duration::from_secs(1) / self.display_hz.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.fps, 30);
        assert_eq!(config.oversample, 10);
        assert_eq!(config.default_resolution, Resolution::new(1280, 720));
        assert_eq!(config.collector.duration_budget_us, 10_000_000);
        assert_eq!(config.collector.backoff(), Duration::from_millis(100));
        assert_eq!(config.display_period(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            fps = 60
            color_off = [255, 0, 0]

            [default_resolution]
            width = 640
            height = 480

            [collector]
            event_budget = 1000000
            "#,
        )
        .unwrap();
        assert_eq!(config.fps, 60);
        assert_eq!(config.oversample, 10);
        assert_eq!(config.color_off, Rgb([255, 0, 0]));
        assert_eq!(config.color_on, Rgb::WHITE);
        assert_eq!(config.default_resolution, Resolution::new(640, 480));
        assert_eq!(config.collector.event_budget, Some(1_000_000));
        assert_eq!(config.collector.backoff_ms, 100);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            PipelineConfig::from_toml_str("fps = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_display_rate_does_not_divide_by_zero() {
        let config = PipelineConfig {
            display_hz: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(config.display_period(), Duration::from_secs(1));
    }
}
