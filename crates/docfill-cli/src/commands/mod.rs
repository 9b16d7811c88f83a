//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod convert;
pub mod extract;
pub mod fill;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use docfill_core::pipeline::extension_of;
use docfill_core::{DocfillConfig, DocfillError, PureOcrEngine};

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docfill")
        .join("config.json")
}

/// Configuration from `--config`, else the default file when it exists,
/// else built-in defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<DocfillConfig> {
    if let Some(path) = config_path {
        return DocfillConfig::from_file(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path, e));
    }

    let path = default_config_path();
    if path.exists() {
        debug!("Using config file {}", path.display());
        return Ok(DocfillConfig::from_file(&path)?);
    }
    Ok(DocfillConfig::default())
}

/// OCR engine for PDF sources. Other sources never need one.
///
/// Missing models are not fatal here: a PDF with a text layer still works,
/// and a scanned one fails later with a clear error.
pub fn ocr_engine_for(source: &Path, config: &DocfillConfig) -> Option<PureOcrEngine> {
    if extension_of(source) != "pdf" {
        return None;
    }
    match PureOcrEngine::from_config(config) {
        Ok(engine) => Some(engine),
        Err(e) => {
            warn!("OCR disabled: {}", e);
            None
        }
    }
}

/// Turn a core error into a message the user can act on.
pub fn explain(err: DocfillError) -> anyhow::Error {
    match err {
        DocfillError::OutputLocked { path } => anyhow::anyhow!(
            "Cannot write {}: the file is locked.\n\n\
             Close it in the program that has it open and run the command again.",
            path.display()
        ),
        DocfillError::OcrUnavailable(e) => anyhow::anyhow!(
            "The PDF has no text layer and OCR is unavailable ({}).\n\n\
             Point ocr.model_dir in the config at the OCR model files.",
            e
        ),
        other => other.into(),
    }
}
