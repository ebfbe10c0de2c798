//! Image preprocessing for OCR models
//!
//! Handles resizing, normalization, and tensor conversion for PaddleOCR models.
//! PaddleOCR models are trained on BGR input, so tensors are built with the
//! channel planes in B, G, R order.

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side for the detection model input (multiple of 32 after rounding)
    pub det_limit_side: u32,
    /// Target height for the recognition model
    pub rec_target_height: u32,
    /// Maximum width for the recognition model
    pub rec_max_width: u32,
    /// Detection mean values [R, G, B]
    pub det_mean: [f32; 3],
    /// Detection std values [R, G, B]
    pub det_std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_limit_side: 960,
            rec_target_height: 48,
            rec_max_width: 640,
            // ImageNet statistics for the DBNet detector
            det_mean: [0.485, 0.456, 0.406],
            det_std: [0.229, 0.224, 0.225],
        }
    }
}

/// Detection model input plus the scale from source pixels to tensor pixels
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Convert an RGB image to a normalized NCHW tensor (batch size 1, BGR planes)
pub fn to_bgr_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            // RGB channel c lands in plane 2 - c
            tensor[[0, 2 - c, y, x]] = (value - mean[c]) / std[c];
        }
    }

    tensor
}

/// Round a dimension to the nearest multiple of 32, at least 32
fn round_to_32(value: f32) -> u32 {
    (((value / 32.0).round() as u32) * 32).max(32)
}

/// Size the detection model input so the longest side fits `limit_side`
pub fn detection_size(width: u32, height: u32, limit_side: u32) -> (u32, u32) {
    let longest = width.max(height) as f32;
    let ratio = if longest > limit_side as f32 {
        limit_side as f32 / longest
    } else {
        1.0
    };
    (
        round_to_32(width as f32 * ratio),
        round_to_32(height as f32 * ratio),
    )
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &RgbImage, config: &PreprocessConfig) -> DetectionInput {
    let (w, h) = image.dimensions();
    let (target_w, target_h) = detection_size(w, h, config.det_limit_side);

    let resized = imageops::resize(image, target_w, target_h, FilterType::Triangle);
    let tensor = to_bgr_nchw(&resized, &config.det_mean, &config.det_std);

    DetectionInput {
        tensor,
        scale_x: target_w as f32 / w as f32,
        scale_y: target_h as f32 / h as f32,
    }
}

/// Width for a recognition crop resized to `target_height`
pub fn recognition_width(width: u32, height: u32, target_height: u32, max_width: u32) -> u32 {
    if height == 0 {
        return 1;
    }
    let scaled = (target_height as f32 * width as f32 / height as f32).ceil() as u32;
    scaled.clamp(1, max_width)
}

/// Full preprocessing pipeline for recognition of a single text crop
pub fn preprocess_for_recognition(crop: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let target_w = recognition_width(w, h, config.rec_target_height, config.rec_max_width);
    let resized = imageops::resize(crop, target_w, config.rec_target_height, FilterType::Triangle);

    // Maps [0, 255] -> [-1, 1]
    to_bgr_nchw(&resized, &[0.5, 0.5, 0.5], &[0.5, 0.5, 0.5])
}

/// Crop an axis-aligned region, clamped to the image
pub fn crop_region(image: &RgbImage, x0: u32, y0: u32, x1: u32, y1: u32) -> Option<RgbImage> {
    let (w, h) = image.dimensions();
    let x0 = x0.min(w);
    let y0 = y0.min(h);
    let x1 = x1.min(w);
    let y1 = y1.min(h);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Flatten a standard-layout tensor into its shape and data
pub fn into_shape_and_data(tensor: Array4<f32>) -> ([usize; 4], Vec<f32>) {
    let (n, c, h, w) = tensor.dim();
    let data = tensor.as_standard_layout().iter().copied().collect();
    ([n, c, h, w], data)
}
