//! Recording a live stream to disk.
//!
//! The recorder subscribes to a live source and hands each delivered slice to
//! a writer thread over a bounded channel, so slow disks never stall the
//! delivery thread. Slices that do not fit in the channel are dropped and
//! counted.

use crate::error::{PipelineError, Result};
use crate::recording::{CsvEventWriter, FieldOrder, RecordingError};
use crate::source::{CallbackId, LiveSource};
use crate::types::{Event, SensorMetadata};
use crossbeam_channel::TrySendError;
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Slices buffered between the delivery thread and the writer.
const CHANNEL_DEPTH: usize = 1024;

/// Totals of a finished recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderSummary {
    pub events_written: u64,
    pub slices_dropped: u64,
}

/// Writes every event delivered by a live source to a CSV file.
pub struct StreamRecorder {
    path: PathBuf,
    callback_id: CallbackId,
    writer: JoinHandle<std::result::Result<u64, RecordingError>>,
    dropped: Arc<AtomicU64>,
}

impl StreamRecorder {
    /// Creates `path` and starts recording events from `source`.
    pub fn start<S, P>(source: &S, path: P) -> Result<Self>
    where
        S: LiveSource + ?Sized,
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(RecordingError::from)?;
        let metadata = SensorMetadata {
            width: source.width(),
            height: source.height(),
        };

        let (tx, rx) = crossbeam_channel::bounded::<Vec<Event>>(CHANNEL_DEPTH);
        let writer = thread::Builder::new()
            .name("stream-recorder".to_string())
            .spawn(move || -> std::result::Result<u64, RecordingError> {
                let mut writer = CsvEventWriter::new(file, FieldOrder::default());
                writer.write_header(&metadata)?;
                let mut written = 0u64;
                for slice in rx {
                    writer.write_events(&slice)?;
                    written += slice.len() as u64;
                }
                writer.flush()?;
                Ok(written)
            })
            .map_err(|err| PipelineError::WorkerSpawn {
                name: "stream recorder",
                source: err,
            })?;

        let dropped = Arc::new(AtomicU64::new(0));
        let callback_id = {
            let dropped = Arc::clone(&dropped);
            source.register_callback(Box::new(move |events| {
                if let Err(TrySendError::Full(_)) = tx.try_send(events.to_vec()) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }))
        };

        info!("Recording started: {}", path.display());
        Ok(Self {
            path,
            callback_id,
            writer,
            dropped,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops recording and waits for the file to be written.
    ///
    /// Unregistering the callback drops the channel's sender, which lets the
    /// writer drain the remaining slices and exit.
    pub fn finish<S: LiveSource + ?Sized>(self, source: &S) -> Result<RecorderSummary> {
        source.unregister_callback(self.callback_id);
        let events_written = self
            .writer
            .join()
            .map_err(|_| PipelineError::WorkerPanicked("stream recorder"))??;
        let slices_dropped = self.dropped.load(Ordering::Relaxed);
        if slices_dropped > 0 {
            warn!("Recorder dropped {} slices", slices_dropped);
        }
        info!(
            "Recording stopped: {} events written to {}",
            events_written,
            self.path.display()
        );
        Ok(RecorderSummary {
            events_written,
            slices_dropped,
        })
    }
}
