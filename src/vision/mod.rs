//! Vision/OCR Layer
//!
//! Text recognition over captured frames. The overlay only depends on the
//! [`TextRecognizer`] trait; the production engine is PaddleOCR running on
//! ONNX Runtime.

pub mod models;
pub mod ocr;
pub mod postprocess;
pub mod preprocess;

use anyhow::Result;
use image::RgbImage;

pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::{PaddleOcr, PaddleOcrConfig};

/// Integer pixel coordinate (x, y)
pub type Point = (i32, i32);

/// One recognized text region
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Corners ordered top-left, top-right, bottom-right, bottom-left
    pub quad: [Point; 4],
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Detection {
    pub fn new(quad: [Point; 4], text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }

    /// Build a detection from an axis-aligned box
    pub fn from_bounds(
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
        text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self::new([(x0, y0), (x1, y0), (x1, y1), (x0, y1)], text, confidence)
    }

    pub fn top_left(&self) -> Point {
        self.quad[0]
    }

    pub fn bottom_right(&self) -> Point {
        self.quad[2]
    }
}

/// Synchronous text recognition over a single image
pub trait TextRecognizer: Send {
    /// Detect and read every text region in `image`, in reading order
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

impl<R: TextRecognizer + ?Sized> TextRecognizer for Box<R> {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        (**self).recognize(image)
    }
}

#[cfg(test)]
pub mod testing {
    //! Recognizer doubles for tests

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Returns a fixed list of detections and records the sizes it was shown
    #[derive(Default)]
    pub struct FakeRecognizer {
        pub detections: Vec<Detection>,
        /// Calls from this index on fail
        pub fail_from_call: Option<usize>,
        pub seen_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FakeRecognizer {
        pub fn returning(detections: Vec<Detection>) -> Self {
            Self {
                detections,
                ..Default::default()
            }
        }

        /// Succeed `n` times, then fail
        pub fn failing_after(mut self, n: usize) -> Self {
            self.fail_from_call = Some(n);
            self
        }
    }

    impl TextRecognizer for FakeRecognizer {
        fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
            let call = {
                let mut seen = self.seen_sizes.lock();
                seen.push(image.dimensions());
                seen.len() - 1
            };
            if self.fail_from_call.is_some_and(|n| call >= n) {
                anyhow::bail!("recognizer unavailable");
            }
            Ok(self.detections.clone())
        }
    }

    /// The detection used across end-to-end tests
    pub fn plate_detection() -> Detection {
        Detection::new([(10, 10), (100, 10), (100, 40), (10, 40)], "ABC123", 0.95)
    }
}
