//! Frame consumers: encoders for offline output and displays for live output.

use crate::frame::Frame;
use crate::types::Resolution;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while writing frames.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame is {actual}, sink was opened for {expected}")]
    DimensionMismatch {
        expected: Resolution,
        actual: Resolution,
    },
}

/// Receives completed frames in order, e.g. a video encoder.
pub trait FrameSink {
    /// Appends a frame. Fails if the frame geometry differs from the geometry
    /// the sink was opened with.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Flushes and closes the output.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Shows frames as they are produced. Presenting is best effort.
pub trait DisplaySink {
    fn present(&mut self, frame: &Frame);

    /// Whether the user asked to close the display.
    fn cancel_requested(&mut self) -> bool {
        false
    }
}

/// Writes each frame as a numbered PNG file in a directory.
#[derive(Debug)]
pub struct PngSequenceWriter {
    dir: PathBuf,
    resolution: Resolution,
    written: u64,
}

impl PngSequenceWriter {
    /// Opens the output directory, creating it if needed.
    pub fn create<P: AsRef<Path>>(dir: P, resolution: Resolution) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            resolution,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// Path of the n-th frame.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }
}

impl FrameSink for PngSequenceWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.resolution() != self.resolution {
            return Err(SinkError::DimensionMismatch {
                expected: self.resolution,
                actual: frame.resolution(),
            });
        }
        let path = self.frame_path(self.written);
        frame.to_rgb_image().save(&path)?;
        self.written += 1;
        Ok(())
    }
}

impl DisplaySink for PngSequenceWriter {
    fn present(&mut self, frame: &Frame) {
        if let Err(e) = self.write_frame(frame) {
            log::warn!("Dropping snapshot: {}", e);
        }
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    resolution: Option<Resolution>,
    pub frames: Vec<Frame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that only accepts frames of `resolution`.
    pub fn with_resolution(resolution: Resolution) -> Self {
        Self {
            resolution: Some(resolution),
            frames: Vec::new(),
        }
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if let Some(expected) = self.resolution {
            if frame.resolution() != expected {
                return Err(SinkError::DimensionMismatch {
                    expected,
                    actual: frame.resolution(),
                });
            }
        }
        self.frames.push(frame.clone());
        Ok(())
    }
}

impl DisplaySink for MemorySink {
    fn present(&mut self, frame: &Frame) {
        self.frames.push(frame.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameAccumulator;
    use crate::types::Event;

    #[test]
    fn test_png_writer_numbers_frames() {
        let dir = tempfile::tempdir().unwrap();
        let resolution = Resolution::new(4, 3);
        let mut writer = PngSequenceWriter::create(dir.path().join("out"), resolution).unwrap();

        let mut frame = Frame::new(resolution);
        FrameAccumulator::default().paint(&mut frame, &[Event::new(1, 2, true, 0)]);
        writer.write_frame(&frame).unwrap();
        writer.write_frame(&frame).unwrap();

        assert_eq!(writer.frames_written(), 2);
        let first = writer.frame_path(0);
        assert!(first.ends_with("frame_000000.png"));
        let image = image::open(&first).unwrap().to_rgb8();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(1, 2).0, [255, 255, 255]);
        assert!(writer.frame_path(1).exists());
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = PngSequenceWriter::create(dir.path(), Resolution::new(4, 3)).unwrap();
        let result = writer.write_frame(&Frame::new(Resolution::new(3, 4)));
        assert!(matches!(result, Err(SinkError::DimensionMismatch { .. })));
        assert_eq!(writer.frames_written(), 0);

        let mut memory = MemorySink::with_resolution(Resolution::new(4, 3));
        assert!(memory.write_frame(&Frame::new(Resolution::new(2, 2))).is_err());
        assert!(memory.frames.is_empty());
    }

    #[test]
    fn test_unwritable_directory_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let result = PngSequenceWriter::create(blocker.join("frames"), Resolution::default());
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
