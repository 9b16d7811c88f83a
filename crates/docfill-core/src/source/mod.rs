//! Text acquisition: turn a source buffer into something extraction can read.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::docx::{WordBody, WordDocument};
use crate::error::{DocfillError, OcrError, Result};
use crate::models::config::DocfillConfig;
use crate::ocr::OcrEngine;
use crate::pdf::{PdfExtractor, PdfProcessor};

/// Formats a source document can come in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Word,
    Pdf,
}

impl SourceKind {
    /// Detect the kind from a file extension (case-insensitive, dot optional).
    pub fn from_extension(extension: &str) -> Result<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "docx" => Ok(Self::Word),
            "pdf" => Ok(Self::Pdf),
            other => Err(DocfillError::UnsupportedInputFormat(other.to_string())),
        }
    }
}

/// An acquired source: a structured body or flat text.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDocument {
    Word(WordBody),
    Text(String),
}

impl SourceDocument {
    /// Plain text of the source.
    pub fn text(&self) -> String {
        match self {
            Self::Word(body) => body.to_text(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Reads source documents, falling back to OCR for scanned PDFs.
pub struct SourceReader<'a> {
    config: &'a DocfillConfig,
    ocr: Option<&'a dyn OcrEngine>,
}

impl<'a> SourceReader<'a> {
    /// Reader without OCR: scanned PDFs fail with `OcrUnavailable`.
    pub fn new(config: &'a DocfillConfig) -> Self {
        Self { config, ocr: None }
    }

    /// Attach an OCR engine for scanned PDFs.
    pub fn with_ocr(mut self, ocr: &'a dyn OcrEngine) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Read a source buffer of the given extension.
    pub fn read(&self, data: &[u8], extension: &str) -> Result<SourceDocument> {
        match SourceKind::from_extension(extension)? {
            SourceKind::Word => {
                let document = WordDocument::from_bytes(data)?;
                let body = document.body();
                info!(
                    "Read word source: {} paragraphs, {} tables",
                    body.paragraphs.len(),
                    body.tables.len()
                );
                Ok(SourceDocument::Word(body))
            }
            SourceKind::Pdf => {
                let mut processor = PdfExtractor::from_config(&self.config.pdf);
                let text = self.read_pdf(&mut processor, data)?;
                Ok(SourceDocument::Text(text))
            }
        }
    }

    /// Text of a PDF: its text layer, or OCR of every page when the layer
    /// is empty.
    pub fn read_pdf(&self, processor: &mut dyn PdfProcessor, data: &[u8]) -> Result<String> {
        let start = Instant::now();
        processor.load(data)?;

        let pages = self.page_limit(processor.page_count());
        let page_texts = processor.extract_page_texts()?;

        let mut text = String::new();
        for page_text in page_texts.iter().take(pages as usize) {
            if !page_text.is_empty() {
                text.push_str(page_text);
                text.push('\n');
            }
        }

        if text.trim().chars().count() >= self.config.pdf.min_text_length.max(1) {
            info!(
                "PDF text layer: {} pages, {} characters in {}ms",
                pages,
                text.len(),
                start.elapsed().as_millis()
            );
            return Ok(text);
        }

        warn!("PDF has no usable text layer, running OCR on {} pages", pages);
        let ocr = self.ocr.ok_or(OcrError::NotConfigured)?;
        let language = &self.config.ocr.language;

        let mut recognized = Vec::with_capacity(pages as usize);
        for page in 1..=pages {
            let image = processor.render_page(page)?;
            debug!("OCR page {} ({}x{})", page, image.width(), image.height());
            recognized.push(ocr.recognize(&image, language)?);
        }

        info!(
            "OCR finished: {} pages in {}ms",
            pages,
            start.elapsed().as_millis()
        );
        Ok(recognized.join("\n"))
    }

    fn page_limit(&self, page_count: u32) -> u32 {
        match self.config.pdf.max_pages {
            0 => page_count,
            max => page_count.min(max as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use image::{DynamicImage, GenericImageView};

    use crate::docx::fixtures::{docx, paragraph};
    use crate::error::PdfError;

    /// PDF stand-in whose pages carry fixed text layers. Page `n` renders as
    /// an image `n` pixels wide so OCR calls can be traced back to pages.
    struct FakePdf {
        texts: Vec<String>,
    }

    impl PdfProcessor for FakePdf {
        fn load(&mut self, _data: &[u8]) -> crate::pdf::Result<()> {
            Ok(())
        }

        fn page_count(&self) -> u32 {
            self.texts.len() as u32
        }

        fn extract_page_texts(&self) -> crate::pdf::Result<Vec<String>> {
            Ok(self.texts.clone())
        }

        fn render_page(&self, page: u32) -> crate::pdf::Result<DynamicImage> {
            if page == 0 || page > self.page_count() {
                return Err(PdfError::InvalidPage(page));
            }
            Ok(DynamicImage::new_luma8(page, 1))
        }
    }

    struct RecordingOcr {
        calls: RefCell<Vec<(u32, String)>>,
    }

    impl OcrEngine for RecordingOcr {
        fn recognize(&self, image: &DynamicImage, language: &str) -> std::result::Result<String, OcrError> {
            let page = image.dimensions().0;
            self.calls.borrow_mut().push((page, language.to_string()));
            Ok(format!("страница {}", page))
        }
    }

    fn recording_ocr() -> RecordingOcr {
        RecordingOcr {
            calls: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_text_layer_is_used_when_present() {
        let config = DocfillConfig::default();
        let ocr = recording_ocr();
        let mut pdf = FakePdf {
            texts: vec!["первая".to_string(), String::new(), "третья".to_string()],
        };

        let text = SourceReader::new(&config)
            .with_ocr(&ocr)
            .read_pdf(&mut pdf, b"")
            .unwrap();

        assert_eq!(text, "первая\nтретья\n");
        assert!(ocr.calls.borrow().is_empty());
    }

    #[test]
    fn test_scanned_pdf_runs_ocr_once_per_page_in_order() {
        let config = DocfillConfig::default();
        let ocr = recording_ocr();
        let mut pdf = FakePdf {
            texts: vec![" ".to_string(), "\n".to_string(), String::new()],
        };

        let text = SourceReader::new(&config)
            .with_ocr(&ocr)
            .read_pdf(&mut pdf, b"")
            .unwrap();

        assert_eq!(text, "страница 1\nстраница 2\nстраница 3");
        let calls = ocr.calls.borrow();
        assert_eq!(
            *calls,
            vec![
                (1, "rus".to_string()),
                (2, "rus".to_string()),
                (3, "rus".to_string())
            ]
        );
    }

    #[test]
    fn test_scanned_pdf_without_ocr() {
        let config = DocfillConfig::default();
        let mut pdf = FakePdf {
            texts: vec![String::new()],
        };
        let err = SourceReader::new(&config).read_pdf(&mut pdf, b"").unwrap_err();
        assert!(matches!(err, DocfillError::OcrUnavailable(OcrError::NotConfigured)));
    }

    #[test]
    fn test_max_pages_limits_ocr() {
        let mut config = DocfillConfig::default();
        config.pdf.max_pages = 2;
        let ocr = recording_ocr();
        let mut pdf = FakePdf {
            texts: vec![String::new(); 5],
        };

        SourceReader::new(&config)
            .with_ocr(&ocr)
            .read_pdf(&mut pdf, b"")
            .unwrap();
        assert_eq!(ocr.calls.borrow().len(), 2);
    }

    #[test]
    fn test_read_word_source() {
        let config = DocfillConfig::default();
        let bytes = docx(&paragraph(&["Договор-заявка № 1"]));
        let source = SourceReader::new(&config).read(&bytes, "DOCX").unwrap();
        assert_eq!(source.text(), "Договор-заявка № 1");
    }

    #[test]
    fn test_unknown_extension() {
        let config = DocfillConfig::default();
        let err = SourceReader::new(&config).read(b"", "odt").unwrap_err();
        assert!(matches!(err, DocfillError::UnsupportedInputFormat(ext) if ext == "odt"));
    }

    #[test]
    fn test_corrupt_word_source() {
        let config = DocfillConfig::default();
        let err = SourceReader::new(&config).read(b"not a zip", "docx").unwrap_err();
        assert!(matches!(err, DocfillError::DocumentRead(_)));
    }
}
