//! JPEG encoding of annotated frames

use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};

/// Encode an RGB image as JPEG (`quality` 1-100)
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(bytes)
}

/// Decode any supported image format to RGB
pub fn decode(bytes: &[u8]) -> ImageResult<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
