//! PaddleOCR engine
//!
//! Two ONNX models: DBNet finds text regions, CRNN reads each region. Output
//! decoding lives in [`postprocess`](super::postprocess).

use anyhow::{Context, Result};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info};

use super::models::{ModelManager, ModelType, OnnxSession};
use super::postprocess::{
    boxes_from_probability_map, ctc_greedy_decode, parse_dictionary, DbParams, TextBox,
};
use super::preprocess::{
    crop_region, into_shape_and_data, preprocess_for_detection, preprocess_for_recognition,
    PreprocessConfig,
};
use super::{Detection, TextRecognizer};

/// Languages the bundled recognition model can read
pub const SUPPORTED_LANGUAGES: &[&str] = &["en"];

/// OCR engine configuration
#[derive(Debug, Clone)]
pub struct PaddleOcrConfig {
    /// Recognition languages
    pub languages: Vec<String>,
    /// Register the CUDA execution provider when available
    pub use_gpu: bool,
    /// Drop readings below this confidence (0.0 - 1.0); 0.0 keeps every reading
    pub min_confidence: f32,
    /// Probability map decoding
    pub db: DbParams,
    /// Tensor preparation
    pub preprocess: PreprocessConfig,
}

impl Default for PaddleOcrConfig {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string()],
            use_gpu: true,
            min_confidence: 0.0,
            db: DbParams::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// Reject language sets the models cannot read
pub fn validate_languages(languages: &[String]) -> Result<()> {
    if languages.is_empty() {
        anyhow::bail!("No OCR language configured");
    }
    for language in languages {
        if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
            anyhow::bail!(
                "Unsupported OCR language {:?} (supported: {:?})",
                language,
                SUPPORTED_LANGUAGES
            );
        }
    }
    Ok(())
}

/// OCR engine using PaddleOCR via ONNX Runtime
pub struct PaddleOcr {
    detector: OnnxSession,
    recognizer: OnnxSession,
    dictionary: Vec<String>,
    config: PaddleOcrConfig,
}

impl PaddleOcr {
    /// Load the models, downloading them first if needed
    pub fn new(models: &ModelManager, config: PaddleOcrConfig) -> Result<Self> {
        validate_languages(&config.languages)?;
        info!("Initializing PaddleOCR ({:?}, gpu: {})", config.languages, config.use_gpu);

        let det_path = models.ensure_model(ModelType::Detection)?;
        let rec_path = models.ensure_model(ModelType::Recognition)?;
        let dict_path = models.ensure_model(ModelType::Dictionary)?;

        let dictionary = std::fs::read_to_string(&dict_path)
            .with_context(|| format!("Failed to read dictionary {:?}", dict_path))?;
        let dictionary = parse_dictionary(&dictionary);

        let detector = OnnxSession::new(&det_path, config.use_gpu)?;
        let recognizer = OnnxSession::new(&rec_path, config.use_gpu)?;

        info!("PaddleOCR initialized ({} symbols)", dictionary.len());
        Ok(Self {
            detector,
            recognizer,
            dictionary,
            config,
        })
    }

    /// Find text regions, in source image coordinates
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<TextBox>> {
        let input = preprocess_for_detection(image, &self.config.preprocess);
        let (shape, data) = into_shape_and_data(input.tensor);

        let (out_shape, probs) = self
            .detector
            .run(shape, data)
            .context("Text detection failed")?;

        // [1, 1, H, W]
        let (map_h, map_w) = match out_shape.as_slice() {
            [.., h, w] => (*h as usize, *w as usize),
            _ => anyhow::bail!("Unexpected detection output shape {:?}", out_shape),
        };

        let (img_w, img_h) = image.dimensions();
        Ok(boxes_from_probability_map(&probs, map_w, map_h, &self.config.db)
            .into_iter()
            .map(|b| b.rescale(input.scale_x, input.scale_y))
            .map(|b| TextBox {
                x1: b.x1.min(img_w as f32),
                y1: b.y1.min(img_h as f32),
                ..b
            })
            .collect())
    }

    /// Read the text inside one crop
    fn read(&mut self, crop: &RgbImage) -> Result<(String, f32)> {
        let tensor = preprocess_for_recognition(crop, &self.config.preprocess);
        let (shape, data) = into_shape_and_data(tensor);

        let (out_shape, probs) = self
            .recognizer
            .run(shape, data)
            .context("Text recognition failed")?;

        // [1, T, C]
        let (steps, classes) = match out_shape.as_slice() {
            [.., t, c] if *c > 0 => (*t as usize, *c as usize),
            _ => anyhow::bail!("Unexpected recognition output shape {:?}", out_shape),
        };

        Ok(ctc_greedy_decode(&probs, steps, classes, &self.dictionary))
    }
}

/// Whether a recognized string is reported
fn keep_reading(text: &str, confidence: f32, min_confidence: f32) -> bool {
    !text.is_empty() && confidence >= min_confidence
}

impl TextRecognizer for PaddleOcr {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let start = Instant::now();
        let boxes = self.detect(image)?;

        let mut detections = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let (x0, y0) = (text_box.x0.floor() as u32, text_box.y0.floor() as u32);
            let (x1, y1) = (text_box.x1.ceil() as u32, text_box.y1.ceil() as u32);

            let Some(crop) = crop_region(image, x0, y0, x1, y1) else {
                continue;
            };

            let (text, confidence) = self.read(&crop)?;
            let text = text.trim().to_string();
            if !keep_reading(&text, confidence, self.config.min_confidence) {
                continue;
            }

            detections.push(Detection::from_bounds(
                x0 as i32, y0 as i32, x1 as i32, y1 as i32, text, confidence,
            ));
        }

        debug!(
            "PaddleOCR found {} text regions in {:?}",
            detections.len(),
            start.elapsed()
        );
        Ok(detections)
    }
}
