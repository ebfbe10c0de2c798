//! Box and label drawing onto frames

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::vision::Detection;

/// Fonts tried when no label font is configured
const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Visual style of detection boxes and labels
#[derive(Debug, Clone)]
pub struct BoxStyle {
    /// Box and label color [R, G, B]
    pub color: [u8; 3],
    /// Box outline thickness in pixels
    pub thickness: u32,
    /// Gap between the label and the top of its box
    pub label_offset: i32,
    /// Label glyph height in pixels
    pub font_scale: f32,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
            label_offset: 10,
            font_scale: 20.0,
        }
    }
}

/// Pixel region a detection box was drawn at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Load the label font from `configured`, falling back to system fonts
///
/// Returns `None` (with one warning) when nothing usable is found; boxes are
/// then drawn without labels.
pub fn load_label_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates = configured
        .map(Path::to_path_buf)
        .into_iter()
        .chain(SYSTEM_FONT_PATHS.iter().map(PathBuf::from));

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                debug!("Using label font {:?}", path);
                return Some(font);
            }
            Err(e) => warn!("Ignoring unreadable font {:?}: {}", path, e),
        }
    }

    warn!("No label font found, plate text will not be drawn on frames");
    None
}

/// Draw one detection's box and label, returning the region outlined
pub fn draw_detection(
    image: &mut RgbImage,
    detection: &Detection,
    style: &BoxStyle,
    font: Option<&FontVec>,
) -> BoxRegion {
    let region = box_region(image, detection);
    let color = Rgb(style.color);

    // Outline grows inward so the box never leaves the region
    for i in 0..style.thickness.max(1) {
        let (w, h) = (
            region.width.saturating_sub(2 * i),
            region.height.saturating_sub(2 * i),
        );
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((region.x + i) as i32, (region.y + i) as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, color);
    }

    if let Some(font) = font {
        if !detection.text.is_empty() {
            let scale = PxScale::from(style.font_scale);
            let (_, text_h) = text_size(scale, font, &detection.text);
            let y = (region.y as i32 - style.label_offset - text_h as i32).max(0);
            draw_text_mut(image, color, region.x as i32, y, scale, font, &detection.text);
        }
    }

    region
}

/// Normalize a detection's corners and clamp them to the image
fn box_region(image: &RgbImage, detection: &Detection) -> BoxRegion {
    let (w, h) = image.dimensions();
    let max_x = w.saturating_sub(1) as i32;
    let max_y = h.saturating_sub(1) as i32;

    let (a, b) = (detection.top_left(), detection.bottom_right());
    let x0 = a.0.min(b.0).clamp(0, max_x) as u32;
    let x1 = a.0.max(b.0).clamp(0, max_x) as u32;
    let y0 = a.1.min(b.1).clamp(0, max_y) as u32;
    let y1 = a.1.max(b.1).clamp(0, max_y) as u32;

    BoxRegion {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    }
}
