//! Top-level pipeline errors.

use crate::config::ConfigError;
use crate::recording::RecordingError;
use crate::scheduler::WindowError;
use crate::sink::SinkError;
use thiserror::Error;

/// Fatal conditions surfaced to the caller of a pipeline.
///
/// Missing metadata is not an error: it is logged and replaced by defaults.
/// Empty windows are not errors either.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Event source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invalid frame window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("Failed to open sink: {0}")]
    SinkOpen(#[source] SinkError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Recording error: {0}")]
    Recording(#[source] RecordingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid replay speed {0}: must be finite and non-negative")]
    InvalidReplaySpeed(f64),

    #[error("Failed to spawn {name} thread: {source}")]
    WorkerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}

impl From<RecordingError> for PipelineError {
    fn from(err: RecordingError) -> Self {
        match err {
            RecordingError::NotFound(path) => {
                Self::SourceUnavailable(format!("no recording at {}", path.display()))
            }
            other => Self::Recording(other),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
