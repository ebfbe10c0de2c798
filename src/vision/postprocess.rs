//! Model output decoding
//!
//! Turns the DBNet probability map into text boxes and the CRNN class
//! probabilities into strings.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;

/// Boxes whose tops differ by less than this are treated as one text line
const SAME_LINE_TOLERANCE: f32 = 10.0;

/// Parameters for probability map decoding
#[derive(Debug, Clone)]
pub struct DbParams {
    /// Pixel probability above which a pixel counts as text
    pub threshold: f32,
    /// Minimum mean probability for a region to be kept
    pub box_threshold: f32,
    /// How far regions are grown back out (DBNet shrinks text regions)
    pub unclip_ratio: f32,
    /// Minimum side length in map pixels
    pub min_size: f32,
    /// Upper bound on regions considered per map
    pub max_candidates: usize,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_size: 3.0,
            max_candidates: 1000,
        }
    }
}

/// Axis-aligned text box with its detection score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub score: f32,
}

impl TextBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Map from tensor coordinates back to source image coordinates
    pub fn rescale(&self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x0: self.x0 / scale_x,
            y0: self.y0 / scale_y,
            x1: self.x1 / scale_x,
            y1: self.y1 / scale_y,
            score: self.score,
        }
    }

    /// Grow the box by `area * ratio / perimeter` on every side
    fn unclip(&self, ratio: f32) -> Self {
        let (w, h) = (self.width(), self.height());
        let perimeter = 2.0 * (w + h);
        let distance = if perimeter > 0.0 {
            w * h * ratio / perimeter
        } else {
            0.0
        };
        Self {
            x0: self.x0 - distance,
            y0: self.y0 - distance,
            x1: self.x1 + distance,
            y1: self.y1 + distance,
            score: self.score,
        }
    }

    fn clamp_to(&self, width: f32, height: f32) -> Self {
        Self {
            x0: self.x0.clamp(0.0, width),
            y0: self.y0.clamp(0.0, height),
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            score: self.score,
        }
    }
}

#[derive(Debug)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    score_sum: f32,
    pixels: u32,
}

/// Extract text boxes from a `height` x `width` probability map
///
/// Boxes are in map coordinates and returned in reading order.
pub fn boxes_from_probability_map(
    map: &[f32],
    width: usize,
    height: usize,
    params: &DbParams,
) -> Vec<TextBox> {
    if width == 0 || height == 0 || map.len() < width * height {
        return Vec::new();
    }

    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let p = map[y as usize * width + x as usize];
        if p > params.threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let p = map[y as usize * width + x as usize];
        let region = regions.entry(label).or_insert(Region {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            score_sum: 0.0,
            pixels: 0,
        });
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
        region.score_sum += p;
        region.pixels += 1;
    }

    let mut boxes: Vec<TextBox> = regions
        .values()
        .take(params.max_candidates)
        .filter_map(|region| {
            let text_box = TextBox {
                x0: region.min_x as f32,
                y0: region.min_y as f32,
                x1: (region.max_x + 1) as f32,
                y1: (region.max_y + 1) as f32,
                score: region.score_sum / region.pixels as f32,
            };
            if text_box.width().min(text_box.height()) < params.min_size {
                return None;
            }
            if text_box.score < params.box_threshold {
                return None;
            }
            let grown = text_box
                .unclip(params.unclip_ratio)
                .clamp_to(width as f32, height as f32);
            if grown.width().min(grown.height()) < params.min_size + 2.0 {
                return None;
            }
            Some(grown)
        })
        .collect();

    sort_reading_order(&mut boxes);
    boxes
}

/// Sort boxes top-to-bottom, left-to-right within a line
pub fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| {
        a.y0.partial_cmp(&b.y0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.x0.partial_cmp(&b.x0).unwrap_or(std::cmp::Ordering::Equal))
    });

    // Boxes on the same line may have slightly different tops
    for i in 0..boxes.len() {
        let mut j = i;
        while j > 0
            && (boxes[j].y0 - boxes[j - 1].y0).abs() < SAME_LINE_TOLERANCE
            && boxes[j].x0 < boxes[j - 1].x0
        {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Greedy CTC decoding of a `steps` x `classes` probability matrix
///
/// Class 0 is the CTC blank. Class `i` maps to `dictionary[i - 1]`; the class
/// just past the dictionary is a space. Returns the text and the mean
/// probability of the kept characters.
pub fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    dictionary: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut score_sum = 0.0;
    let mut kept = 0usize;
    let mut previous = 0usize;

    for step in probs.chunks_exact(classes).take(steps) {
        let (index, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        if index != 0 && index != previous {
            match dictionary.get(index - 1) {
                Some(symbol) => text.push_str(symbol),
                None => text.push(' '),
            }
            score_sum += prob;
            kept += 1;
        }
        previous = index;
    }

    let confidence = if kept > 0 { score_sum / kept as f32 } else { 0.0 };
    (text, confidence)
}

/// Parse a character dictionary with one symbol per line
pub fn parse_dictionary(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary() -> Vec<String> {
        parse_dictionary("A\nB\nC\n1\n2\n3\n")
    }

    fn one_hot(classes: usize, sequence: &[usize]) -> Vec<f32> {
        let mut probs = vec![0.0; classes * sequence.len()];
        for (step, &class) in sequence.iter().enumerate() {
            probs[step * classes + class] = 0.9;
            // spread the rest so the argmax is unambiguous
            for other in 0..classes {
                if other != class {
                    probs[step * classes + other] = 0.1 / (classes - 1) as f32;
                }
            }
        }
        probs
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dict = dictionary();
        let classes = dict.len() + 2;
        // A A _ B C C _ C 1
        let probs = one_hot(classes, &[1, 1, 0, 2, 3, 3, 0, 3, 4]);
        let (text, confidence) = ctc_greedy_decode(&probs, 9, classes, &dict);

        assert_eq!(text, "ABCC1");
        assert!((confidence - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_ctc_space_class() {
        let dict = dictionary();
        let classes = dict.len() + 2;
        let probs = one_hot(classes, &[1, classes - 1, 2]);
        let (text, _) = ctc_greedy_decode(&probs, 3, classes, &dict);
        assert_eq!(text, "A B");
    }

    #[test]
    fn test_ctc_all_blank() {
        let dict = dictionary();
        let classes = dict.len() + 2;
        let probs = one_hot(classes, &[0, 0, 0]);
        assert_eq!(ctc_greedy_decode(&probs, 3, classes, &dict), (String::new(), 0.0));
    }

    #[test]
    fn test_parse_dictionary_strips_line_endings() {
        let dict = parse_dictionary("a\r\nb\r\n\r\nc");
        assert_eq!(dict, vec!["a", "b", "c"]);
    }

    fn map_with_rects(
        width: usize,
        height: usize,
        rects: &[(usize, usize, usize, usize, f32)],
    ) -> Vec<f32> {
        let mut map = vec![0.0; width * height];
        for &(x0, y0, x1, y1, p) in rects {
            for y in y0..y1 {
                for x in x0..x1 {
                    map[y * width + x] = p;
                }
            }
        }
        map
    }

    #[test]
    fn test_boxes_from_map_finds_separate_regions() {
        let map = map_with_rects(
            100,
            60,
            &[
                (60, 10, 90, 20, 0.9),
                (5, 12, 40, 22, 0.9),
                (10, 40, 50, 50, 0.8),
            ],
        );
        let boxes = boxes_from_probability_map(&map, 100, 60, &DbParams::default());

        assert_eq!(boxes.len(), 3);
        // First line, left box first even though its top is lower
        assert!(boxes[0].x0 < boxes[1].x0);
        assert!(boxes[2].y0 > boxes[0].y0);
        // Grown out from the raw region
        assert!(boxes[0].x0 < 5.0);
        assert!(boxes[0].x1 > 40.0);
    }

    #[test]
    fn test_boxes_from_map_rejects_low_scores_and_specks() {
        let map = map_with_rects(80, 40, &[(5, 5, 40, 15, 0.45), (60, 20, 62, 22, 0.95)]);
        let boxes = boxes_from_probability_map(&map, 80, 40, &DbParams::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_boxes_clamped_to_map() {
        let map = map_with_rects(50, 20, &[(0, 0, 50, 10, 0.9)]);
        let boxes = boxes_from_probability_map(&map, 50, 20, &DbParams::default());
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].x0, 0.0);
        assert_eq!(boxes[0].y0, 0.0);
        assert_eq!(boxes[0].x1, 50.0);
    }

    #[test]
    fn test_empty_map() {
        assert!(boxes_from_probability_map(&[], 0, 0, &DbParams::default()).is_empty());
        assert!(boxes_from_probability_map(&[0.0; 10], 5, 5, &DbParams::default()).is_empty());
    }

    #[test]
    fn test_rescale() {
        let b = TextBox { x0: 10.0, y0: 20.0, x1: 30.0, y1: 40.0, score: 0.7 };
        let r = b.rescale(0.5, 2.0);
        assert_eq!((r.x0, r.y0, r.x1, r.y1), (20.0, 10.0, 60.0, 20.0));
    }
}
