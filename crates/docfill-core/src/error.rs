//! Error types for the docfill-core library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the docfill library.
#[derive(Error, Debug)]
pub enum DocfillError {
    /// Source or template extension is not one we know how to read.
    #[error("unsupported input format: {0}")]
    UnsupportedInputFormat(String),

    /// Source or template could not be read.
    #[error("failed to read document: {0}")]
    DocumentRead(#[from] ReadError),

    /// OCR engine missing or failed.
    #[error("OCR unavailable: {0}")]
    OcrUnavailable(#[from] OcrError),

    /// The format bridge was handed something that is not a workbook.
    #[error("unsupported workbook: {0}")]
    UnsupportedWorkbook(String),

    /// Output extension does not select a known serialization.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Generic I/O failure while saving the output.
    #[error("failed to write {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Destination is held open by another program.
    #[error("{path} is locked, it may be open in another program")]
    OutputLocked { path: PathBuf },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<PdfError> for DocfillError {
    fn from(err: PdfError) -> Self {
        Self::DocumentRead(ReadError::Pdf(err))
    }
}

/// Errors raised while decoding a source or template document.
#[derive(Error, Debug)]
pub enum ReadError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// The OOXML package (zip container) is broken.
    #[error("package error: {0}")]
    Package(#[from] zip::result::ZipError),

    /// XML inside a package could not be parsed.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A required part is missing from an OOXML package.
    #[error("missing package part: {0}")]
    MissingPart(String),

    /// Malformed content in an otherwise readable part.
    #[error("malformed {part}: {reason}")]
    Malformed { part: String, reason: String },

    /// Legacy BIFF8 workbook stream is malformed or unsupported.
    #[error("BIFF error: {0}")]
    Biff(String),

    /// I/O error (compound file access, stream reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::events::attributes::AttrError> for ReadError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(quick_xml::Error::InvalidAttr(err))
    }
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// The page renderer failed.
    #[error("failed to render page: {0}")]
    Render(String),

    /// No raster could be found for a scanned page.
    #[error("no image on page {0}")]
    NoPageImage(u32),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// No OCR engine was configured for a scanned document.
    #[error("no OCR engine configured")]
    NotConfigured,

    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The engine was built for another language.
    #[error("engine does not support language {0:?}")]
    UnsupportedLanguage(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Result type for the docfill library.
pub type Result<T> = std::result::Result<T, DocfillError>;
