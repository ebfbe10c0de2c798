//! Frame data structures for captured video content

use image::RgbImage;
use std::time::Instant;

/// A captured video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB8 pixel data
    pub image: RgbImage,
    /// Timestamp when the frame was read from the device
    pub timestamp: Instant,
    /// Position in the capture stream, assigned by the frame source
    pub sequence: u64,
}

impl Frame {
    /// Wrap a freshly read image
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    /// Build a frame from packed RGB24 bytes
    ///
    /// Returns `None` when the buffer length does not match `width * height * 3`.
    pub fn from_rgb24(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// True when the frame holds no pixels
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}
