//! OCR collaborator used for scanned PDFs.

#[cfg(feature = "native")]
mod pure_engine;

#[cfg(feature = "native")]
pub use pure_engine::PureOcrEngine;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::OcrError;

/// Vertical distance (pixels) under which two boxes belong to one line.
const LINE_TOLERANCE: f32 = 15.0;

/// Separator placed between boxes of one visual line. Two spaces keep the
/// boxes apart as columns for the line/column extraction pass.
const COLUMN_SEPARATOR: &str = "  ";

/// Trait for OCR engines.
pub trait OcrEngine {
    /// Recognize the text of one page image as plain text.
    fn recognize(&self, image: &DynamicImage, language: &str) -> Result<String, OcrError>;
}

/// A detected text box with its coordinates and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBox {
    /// Bounding box coordinates (x1, y1, x2, y2, x3, y3, x4, y4) for quadrilateral.
    pub bbox: [f32; 8],

    /// Recognized text content.
    pub text: String,

    /// Recognition confidence score (0.0 - 1.0).
    pub confidence: f32,
}

impl TextBox {
    /// Get the axis-aligned bounding rectangle.
    pub fn rect(&self) -> (f32, f32, f32, f32) {
        let xs = [self.bbox[0], self.bbox[2], self.bbox[4], self.bbox[6]];
        let ys = [self.bbox[1], self.bbox[3], self.bbox[5], self.bbox[7]];

        let min_x = xs.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_x = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let min_y = ys.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_y = ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        (min_x, min_y, max_x, max_y)
    }
}

/// Arrange recognized boxes into text lines, top to bottom and left to right.
///
/// Boxes whose top edges are within [`LINE_TOLERANCE`] of the line's first box
/// share a line and are joined by a column separator.
pub fn boxes_to_text(boxes: &[TextBox]) -> String {
    let mut sorted: Vec<&TextBox> = boxes.iter().filter(|b| !b.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| {
        let (_, ay, _, _) = a.rect();
        let (_, by, _, _) = b.rect();
        ay.partial_cmp(&by).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut lines: Vec<Vec<&TextBox>> = Vec::new();
    let mut current_y = f32::NEG_INFINITY;

    for text_box in sorted {
        let (_, y, _, _) = text_box.rect();
        match lines.last_mut() {
            Some(line) if (y - current_y).abs() < LINE_TOLERANCE => line.push(text_box),
            _ => {
                lines.push(vec![text_box]);
                current_y = y;
            }
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| {
                let (ax, _, _, _) = a.rect();
                let (bx, _, _, _) = b.rect();
                ax.partial_cmp(&bx).unwrap_or(std::cmp::Ordering::Equal)
            });
            line.iter()
                .map(|b| b.text.trim())
                .collect::<Vec<_>>()
                .join(COLUMN_SEPARATOR)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_box(x: f32, y: f32, text: &str) -> TextBox {
        TextBox {
            bbox: [x, y, x + 50.0, y, x + 50.0, y + 10.0, x, y + 10.0],
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_boxes_grouped_into_lines() {
        let boxes = vec![
            text_box(300.0, 102.0, "Адрес разгрузки"),
            text_box(10.0, 100.0, "Адрес загрузки"),
            text_box(10.0, 140.0, "г. Москва"),
            text_box(300.0, 138.0, "г. Казань"),
            text_box(10.0, 180.0, "   "),
        ];

        assert_eq!(
            boxes_to_text(&boxes),
            "Адрес загрузки  Адрес разгрузки\nг. Москва  г. Казань"
        );
    }

    #[test]
    fn test_no_boxes() {
        assert_eq!(boxes_to_text(&[]), "");
    }
}
