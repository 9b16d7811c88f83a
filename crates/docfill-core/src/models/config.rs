//! Configuration structures for the fill pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for docfill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocfillConfig {
    /// OCR configuration.
    pub ocr: OcrConfig,

    /// PDF processing configuration.
    pub pdf: PdfConfig,

    /// Output configuration.
    pub output: OutputConfig,
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Directory containing model files.
    pub model_dir: PathBuf,

    /// Text detection model file name.
    pub detection_model: String,

    /// Text recognition model file name.
    pub recognition_model: String,

    /// Character dictionary file name.
    pub dictionary: String,

    /// Language hint handed to the OCR engine.
    pub language: String,

    /// Keep `[UNK]` markers in recognized text instead of blanking them.
    pub keep_unknown: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detection_model: "det.onnx".to_string(),
            recognition_model: "cyrillic_rec.onnx".to_string(),
            dictionary: "cyrillic_dict.txt".to_string(),
            language: "rus".to_string(),
            keep_unknown: false,
        }
    }
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Minimum trimmed text-layer length to treat a PDF as text-based.
    pub min_text_length: usize,

    /// Maximum pages to process (0 = unlimited).
    pub max_pages: usize,

    /// Resolution pdfium renders pages at before OCR.
    pub render_dpi: u32,

    /// Directory holding the pdfium shared library; the system library
    /// is used when unset. Only read by builds with the `pdfium` feature.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            min_text_length: 1,
            max_pages: 0,
            render_dpi: 200,
            pdfium_library: None,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Make every sheet of a workbook output visible.
    pub reveal_hidden_sheets: bool,

    /// Replace an existing destination file.
    pub overwrite: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reveal_hidden_sheets: true,
            overwrite: true,
        }
    }
}

impl DocfillConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Get full path to a model file.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.ocr.model_dir.join(model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DocfillConfig =
            serde_json::from_str(r#"{"ocr": {"language": "rus+eng"}}"#).unwrap();
        assert_eq!(config.ocr.language, "rus+eng");
        assert_eq!(config.ocr.detection_model, "det.onnx");
        assert!(config.output.reveal_hidden_sheets);
        assert_eq!(config.pdf.min_text_length, 1);
    }

    #[test]
    fn test_model_path() {
        let config = DocfillConfig::default();
        assert_eq!(
            config.model_path("det.onnx"),
            PathBuf::from("models").join("det.onnx")
        );
    }
}
