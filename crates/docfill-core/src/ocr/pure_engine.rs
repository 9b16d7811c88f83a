//! Pure Rust OCR engine wrapper using `pure-onnx-ocr`.

use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::DocfillConfig;

use super::{boxes_to_text, OcrEngine, TextBox};

/// OCR engine backed by `pure-onnx-ocr` (pure Rust, no external ONNX Runtime).
///
/// The recognition model and dictionary fix the script the engine can read,
/// so an engine is built for exactly one language hint.
pub struct PureOcrEngine {
    engine: pure_onnx_ocr::engine::OcrEngine,
    language: String,
    keep_unknown: bool,
}

impl PureOcrEngine {
    /// Create an engine from the model files named in the configuration.
    pub fn from_config(config: &DocfillConfig) -> Result<Self, OcrError> {
        let det_path = config.model_path(&config.ocr.detection_model);
        let rec_path = config.model_path(&config.ocr.recognition_model);
        let dict_path = config.model_path(&config.ocr.dictionary);

        for path in [&det_path, &rec_path, &dict_path] {
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }

        let engine = pure_onnx_ocr::engine::OcrEngineBuilder::new()
            .det_model_path(&det_path)
            .rec_model_path(&rec_path)
            .dictionary_path(&dict_path)
            .build()
            .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))?;

        info!(
            "Loaded pure-onnx-ocr engine from {} for language {}",
            config.ocr.model_dir.display(),
            config.ocr.language
        );

        Ok(Self {
            engine,
            language: config.ocr.language.clone(),
            keep_unknown: config.ocr.keep_unknown,
        })
    }

    /// Language hint this engine was built for.
    pub fn language(&self) -> &str {
        &self.language
    }

    fn detect_boxes(&self, image: &DynamicImage) -> Result<Vec<TextBox>, OcrError> {
        let results = self
            .engine
            .run_from_image(image)
            .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

        debug!("pure-onnx-ocr returned {} text regions", results.len());

        Ok(results
            .iter()
            .map(|r| {
                let text = if self.keep_unknown {
                    r.text.clone()
                } else {
                    r.text.replace("[UNK]", " ")
                };
                TextBox {
                    bbox: polygon_to_bbox(&r.bounding_box),
                    text,
                    confidence: r.confidence,
                }
            })
            .collect())
    }
}

impl OcrEngine for PureOcrEngine {
    fn recognize(&self, image: &DynamicImage, language: &str) -> Result<String, OcrError> {
        if language != self.language {
            return Err(OcrError::UnsupportedLanguage(language.to_string()));
        }

        let start = Instant::now();
        let (width, height) = image.dimensions();
        info!("Processing image: {}x{}", width, height);

        let boxes = self.detect_boxes(image)?;
        let text = boxes_to_text(&boxes);

        info!(
            "OCR complete: {} text boxes in {}ms",
            boxes.len(),
            start.elapsed().as_millis()
        );
        Ok(text)
    }
}

/// Convert a `Polygon<f64>` to our `[f32; 8]` bbox format.
///
/// Extracts the first 4 exterior points (quadrilateral) as
/// `[x1, y1, x2, y2, x3, y3, x4, y4]`.
fn polygon_to_bbox(polygon: &pure_onnx_ocr::Polygon<f64>) -> [f32; 8] {
    let mut bbox = [0.0f32; 8];
    for (i, coord) in polygon.exterior().coords().take(4).enumerate() {
        bbox[i * 2] = coord.x as f32;
        bbox[i * 2 + 1] = coord.y as f32;
    }
    bbox
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_models_fail_to_load() {
        let mut config = DocfillConfig::default();
        config.ocr.model_dir = std::path::PathBuf::from("/nonexistent/docfill-models");
        let err = PureOcrEngine::from_config(&config).err().unwrap();
        assert!(matches!(err, OcrError::ModelLoad(_)));
    }
}
