//! Annotation Layer
//!
//! Turns the latest captured frame into an encoded image with every
//! recognized plate outlined and labelled. The most recent list of plate
//! texts is kept in a [`DetectedTexts`] handle other threads can read.

pub mod codec;
pub mod draw;

use ab_glyph::FontVec;
use image::{imageops, imageops::FilterType, RgbImage};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::capture::FrameReader;
use crate::config::AppConfig;
use crate::error::OverlayError;
use crate::vision::TextRecognizer;

pub use draw::{BoxRegion, BoxStyle};

/// Producer configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Frames are resized to this width before recognition
    pub processing_width: u32,
    /// Box and label style
    pub style: BoxStyle,
    /// TrueType font for labels
    pub font_path: Option<PathBuf>,
    /// JPEG quality (1 - 100)
    pub jpeg_quality: u8,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            processing_width: 640,
            style: BoxStyle::default(),
            font_path: None,
            jpeg_quality: 90,
        }
    }
}

impl From<&AppConfig> for ProducerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            processing_width: config.vision.processing_width,
            style: config.overlay.box_style(),
            font_path: config.overlay.font_path.clone(),
            jpeg_quality: config.overlay.jpeg_quality,
        }
    }
}

/// One annotated, encoded frame
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    /// JPEG bytes
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Recognized strings, in recognition order
    pub texts: Vec<String>,
    /// Box drawn for each recognized string
    pub boxes: Vec<BoxRegion>,
    /// Sequence number of the captured frame this was built from
    pub source_sequence: u64,
}

/// Shared, read-only view of the most recently recognized texts
///
/// Each update swaps in a new list; readers never see a partial one.
#[derive(Debug, Clone, Default)]
pub struct DetectedTexts {
    latest: Arc<RwLock<Arc<Vec<String>>>>,
}

impl DetectedTexts {
    /// Snapshot of the current list
    pub fn snapshot(&self) -> Arc<Vec<String>> {
        self.latest.read().clone()
    }

    /// Copy of the current list
    pub fn get(&self) -> Vec<String> {
        self.snapshot().as_ref().clone()
    }

    fn replace(&self, texts: Vec<String>) -> Arc<Vec<String>> {
        std::mem::replace(&mut *self.latest.write(), Arc::new(texts))
    }
}

/// Produces annotated frames from a frame source on demand
pub struct AnnotatedFrameProducer<R> {
    reader: FrameReader,
    recognizer: R,
    config: ProducerConfig,
    font: Option<FontVec>,
    texts: DetectedTexts,
}

impl<R: TextRecognizer> AnnotatedFrameProducer<R> {
    /// Create a new producer reading frames through `reader`
    pub fn new(reader: FrameReader, recognizer: R, config: ProducerConfig) -> Self {
        let font = draw::load_label_font(config.font_path.as_deref());
        Self {
            reader,
            recognizer,
            config,
            font,
            texts: DetectedTexts::default(),
        }
    }

    /// Recognize, annotate and encode the latest frame
    pub fn next_annotated_frame(&mut self) -> Result<AnnotatedFrame, OverlayError> {
        let frame = self.reader.current().ok_or(OverlayError::NoFrameAvailable)?;
        if frame.is_empty() {
            return Err(OverlayError::NoFrameAvailable);
        }

        let start = Instant::now();
        let mut image = resize_to_width(&frame.image, self.config.processing_width).into_owned();

        let detections = self
            .recognizer
            .recognize(&image)
            .map_err(OverlayError::RecognitionFailed)?;

        let boxes: Vec<BoxRegion> = detections
            .iter()
            .map(|d| draw::draw_detection(&mut image, d, &self.config.style, self.font.as_ref()))
            .collect();
        let texts: Vec<String> = detections.into_iter().map(|d| d.text).collect();

        let previous = self.texts.replace(texts.clone());
        if !texts.is_empty() && *previous != texts {
            info!("Plates in view: {}", texts.join(", "));
        }

        let jpeg = codec::encode_jpeg(&image, self.config.jpeg_quality)
            .map_err(OverlayError::FrameEncodingError)?;

        debug!(
            "Annotated frame {} ({} texts, {} bytes) in {:?}, captured {:?} ago",
            frame.sequence,
            texts.len(),
            jpeg.len(),
            start.elapsed(),
            frame.timestamp.elapsed()
        );

        Ok(AnnotatedFrame {
            jpeg,
            width: image.width(),
            height: image.height(),
            texts,
            boxes,
            source_sequence: frame.sequence,
        })
    }

    /// Texts recognized in the most recent successful call
    pub fn detected_texts(&self) -> Vec<String> {
        self.texts.get()
    }

    /// Handle onto the recognized texts for other threads
    pub fn texts_handle(&self) -> DetectedTexts {
        self.texts.clone()
    }
}

/// Resize to `width` keeping the aspect ratio; `width == 0` disables resizing
pub fn resize_to_width(image: &RgbImage, width: u32) -> Cow<'_, RgbImage> {
    let (w, h) = image.dimensions();
    if width == 0 || w == width || w == 0 {
        return Cow::Borrowed(image);
    }
    let height = ((h as f64 * width as f64 / w as f64).round() as u32).max(1);
    Cow::Owned(imageops::resize(image, width, height, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::{synthetic_frame, FakeBackend};
    use crate::capture::{Frame, FrameSource, LatestFrame};
    use crate::vision::testing::{plate_detection, FakeRecognizer};
    use crate::vision::Detection;

    fn reader_with(image: RgbImage) -> FrameReader {
        let cell = Arc::new(LatestFrame::default());
        cell.store(Arc::new(Frame::new(image)));
        FrameReader::new(cell)
    }

    #[test]
    fn test_end_to_end_single_plate() {
        let backend = FakeBackend::new(640, 480);
        let source = FrameSource::open(&backend, "0", 640, 480).unwrap();
        let recognizer = FakeRecognizer::returning(vec![plate_detection()]);

        let mut producer =
            AnnotatedFrameProducer::new(source.reader(), recognizer, ProducerConfig::default());
        let annotated = producer.next_annotated_frame().unwrap();

        let decoded = codec::decode(&annotated.jpeg).unwrap();
        assert_eq!(decoded.width(), 640);
        assert_eq!((annotated.width, annotated.height), (640, 480));
        assert_eq!(annotated.texts, vec!["ABC123"]);
        assert_eq!(producer.detected_texts(), vec!["ABC123"]);
        assert_eq!(annotated.boxes[0], BoxRegion { x: 10, y: 10, width: 91, height: 31 });
    }

    #[test]
    fn test_counts_match_detections() {
        let detections = vec![
            Detection::from_bounds(10, 10, 100, 40, "ABC123", 0.9),
            Detection::from_bounds(200, 10, 300, 40, "XYZ789", 0.8),
            Detection::from_bounds(10, 200, 120, 240, "KL55", 0.7),
        ];
        let recognizer = FakeRecognizer::returning(detections);
        let seen = recognizer.seen_sizes.clone();

        let mut producer = AnnotatedFrameProducer::new(
            reader_with(synthetic_frame(640, 480)),
            recognizer,
            ProducerConfig::default(),
        );
        let annotated = producer.next_annotated_frame().unwrap();

        assert_eq!(annotated.texts, vec!["ABC123", "XYZ789", "KL55"]);
        assert_eq!(annotated.boxes.len(), 3);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_low_confidence_reading_is_drawn_with_default_settings() {
        let recognizer =
            FakeRecognizer::returning(vec![Detection::from_bounds(10, 10, 100, 40, "AB12", 0.05)]);
        let mut producer = AnnotatedFrameProducer::new(
            reader_with(synthetic_frame(640, 480)),
            recognizer,
            ProducerConfig::from(&AppConfig::default()),
        );
        let annotated = producer.next_annotated_frame().unwrap();

        assert_eq!(annotated.texts, vec!["AB12"]);
        assert_eq!(annotated.boxes.len(), 1);
    }

    #[test]
    fn test_no_detections() {
        let mut producer = AnnotatedFrameProducer::new(
            reader_with(synthetic_frame(640, 480)),
            FakeRecognizer::returning(Vec::new()),
            ProducerConfig::default(),
        );
        let annotated = producer.next_annotated_frame().unwrap();

        assert!(annotated.texts.is_empty());
        assert!(annotated.boxes.is_empty());
        assert!(!annotated.jpeg.is_empty());
    }

    #[test]
    fn test_resizes_before_recognition() {
        let recognizer = FakeRecognizer::returning(vec![plate_detection()]);
        let seen = recognizer.seen_sizes.clone();

        let mut producer = AnnotatedFrameProducer::new(
            reader_with(synthetic_frame(1280, 720)),
            recognizer,
            ProducerConfig::default(),
        );
        let annotated = producer.next_annotated_frame().unwrap();

        assert_eq!(seen.lock().as_slice(), &[(640, 360)]);
        assert_eq!((annotated.width, annotated.height), (640, 360));
        assert_eq!(codec::decode(&annotated.jpeg).unwrap().dimensions(), (640, 360));
    }

    #[test]
    fn test_no_frame_available() {
        let reader = FrameReader::new(Arc::new(LatestFrame::default()));
        let mut producer = AnnotatedFrameProducer::new(
            reader,
            FakeRecognizer::default(),
            ProducerConfig::default(),
        );

        assert!(matches!(
            producer.next_annotated_frame(),
            Err(OverlayError::NoFrameAvailable)
        ));
    }

    #[test]
    fn test_empty_frame_is_not_available() {
        let recognizer = FakeRecognizer::default();
        let seen = recognizer.seen_sizes.clone();
        let mut producer = AnnotatedFrameProducer::new(
            reader_with(RgbImage::new(0, 0)),
            recognizer,
            ProducerConfig::default(),
        );

        assert!(matches!(
            producer.next_annotated_frame(),
            Err(OverlayError::NoFrameAvailable)
        ));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_recognition_failure_keeps_previous_texts() {
        let recognizer = FakeRecognizer::returning(vec![plate_detection()]).failing_after(1);
        let mut producer = AnnotatedFrameProducer::new(
            reader_with(synthetic_frame(640, 480)),
            recognizer,
            ProducerConfig::default(),
        );

        producer.next_annotated_frame().unwrap();
        let err = producer.next_annotated_frame().unwrap_err();

        assert!(matches!(err, OverlayError::RecognitionFailed(_)));
        assert_eq!(producer.detected_texts(), vec!["ABC123"]);
    }

    #[test]
    fn test_texts_replaced_wholesale() {
        let cell = Arc::new(LatestFrame::default());
        cell.store(Arc::new(Frame::new(synthetic_frame(640, 480))));
        let mut first = AnnotatedFrameProducer::new(
            FrameReader::new(cell.clone()),
            FakeRecognizer::returning(vec![plate_detection()]),
            ProducerConfig::default(),
        );
        first.next_annotated_frame().unwrap();
        let handle = first.texts_handle();
        let before = handle.snapshot();

        first.recognizer.detections = vec![Detection::from_bounds(1, 1, 50, 20, "NEW1", 0.9)];
        first.next_annotated_frame().unwrap();

        assert_eq!(*before, vec!["ABC123"]);
        assert_eq!(handle.get(), vec!["NEW1"]);
    }

    #[test]
    fn test_texts_handle_readable_from_other_thread() {
        let mut producer = AnnotatedFrameProducer::new(
            reader_with(synthetic_frame(640, 480)),
            FakeRecognizer::returning(vec![plate_detection()]),
            ProducerConfig::default(),
        );
        let handle = producer.texts_handle();
        producer.next_annotated_frame().unwrap();

        let texts = std::thread::spawn(move || handle.get()).join().unwrap();
        assert_eq!(texts, vec!["ABC123"]);
    }

    #[test]
    fn test_resize_to_width() {
        let image = RgbImage::new(640, 480);
        assert!(matches!(resize_to_width(&image, 640), Cow::Borrowed(_)));
        assert!(matches!(resize_to_width(&image, 0), Cow::Borrowed(_)));
        assert_eq!(resize_to_width(&image, 320).dimensions(), (320, 240));
        assert_eq!(resize_to_width(&RgbImage::new(1000, 1), 10).dimensions(), (10, 1));
    }

    #[test]
    fn test_producer_config_from_app_config() {
        let mut app = AppConfig::default();
        app.vision.processing_width = 800;
        app.overlay.jpeg_quality = 70;

        let config = ProducerConfig::from(&app);
        assert_eq!(config.processing_width, 800);
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.style.color, [0, 255, 0]);
    }
}
