//! PDF processing module.

mod extractor;

pub use extractor::PdfExtractor;

use crate::error::PdfError;
use image::DynamicImage;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Trait for PDF processing implementations.
///
/// Pages are 1-indexed throughout.
pub trait PdfProcessor {
    /// Load a PDF from bytes.
    fn load(&mut self, data: &[u8]) -> Result<()>;

    /// Get the number of pages in the PDF.
    fn page_count(&self) -> u32;

    /// Extract the embedded text layer of every page, in page order.
    fn extract_page_texts(&self) -> Result<Vec<String>>;

    /// Produce a raster of a page suitable for OCR.
    fn render_page(&self, page: u32) -> Result<DynamicImage>;
}
