//! Raster frames and the accumulator that paints events into them.

use crate::types::{Event, Resolution, Rgb};
use image::RgbImage;

/// A fixed-size RGB raster, initialized to black.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    resolution: Resolution,
    pixels: Vec<Rgb>,
}

impl Frame {
    /// Creates an all-black frame.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            pixels: vec![Rgb::BLACK; resolution.pixel_count()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> u16 {
        self.resolution.width
    }

    pub fn height(&self) -> u16 {
        self.resolution.height
    }

    #[inline]
    fn index(&self, x: u16, y: u16) -> Option<usize> {
        if x < self.resolution.width && y < self.resolution.height {
            Some(y as usize * self.resolution.width as usize + x as usize)
        } else {
            None
        }
    }

    /// Returns the pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u16, y: u16) -> Option<Rgb> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    /// Sets the pixel at `(x, y)`. Returns `false` and writes nothing when
    /// the coordinate lies outside the frame.
    #[inline]
    pub fn set_pixel(&mut self, x: u16, y: u16, color: Rgb) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.pixels[i] = color;
                true
            }
            None => false,
        }
    }

    /// Resets every pixel to black.
    pub fn clear(&mut self) {
        self.pixels.fill(Rgb::BLACK);
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|p| *p == Rgb::BLACK)
    }

    /// Number of non-black pixels.
    pub fn lit_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| **p != Rgb::BLACK).count()
    }

    /// Copies another frame's contents into this one.
    ///
    /// Reuses the existing buffer when the geometries match.
    pub fn copy_from(&mut self, other: &Frame) {
        self.resolution = other.resolution;
        self.pixels.clone_from(&other.pixels);
    }

    /// Raw pixel data in row-major order.
    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    /// Converts the frame into an image buffer for encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        let raw: Vec<u8> = self.pixels.iter().flat_map(|p| p.0).collect();
        // Length always matches width * height * 3.
        RgbImage::from_raw(self.width() as u32, self.height() as u32, raw)
            .unwrap_or_else(|| RgbImage::new(self.width() as u32, self.height() as u32))
    }
}

/// Paints events into frames by polarity.
///
/// When several events in one batch hit the same pixel, the one painted last
/// determines the color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAccumulator {
    pub color_on: Rgb,
    pub color_off: Rgb,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self {
            color_on: Rgb::WHITE,
            color_off: Rgb::BLUE,
        }
    }
}

impl FrameAccumulator {
    pub fn new(color_on: Rgb, color_off: Rgb) -> Self {
        Self {
            color_on,
            color_off,
        }
    }

    /// Color used for an event of the given polarity.
    #[inline]
    pub fn color_for(&self, polarity: bool) -> Rgb {
        if polarity {
            self.color_on
        } else {
            self.color_off
        }
    }

    /// Paints `events` into `frame` in iteration order.
    ///
    /// Events outside the frame are dropped. Returns the number of events
    /// that landed inside the frame.
    pub fn paint(&self, frame: &mut Frame, events: &[Event]) -> usize {
        let mut painted = 0;
        for event in events {
            if frame.set_pixel(event.x, event.y, self.color_for(event.polarity)) {
                painted += 1;
            }
        }
        painted
    }

    /// Resets `frame` to black.
    pub fn clear(&self, frame: &mut Frame) {
        frame.clear();
    }
}
