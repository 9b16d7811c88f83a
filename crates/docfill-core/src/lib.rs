//! Core library for docfill: contract-request field extraction and
//! template filling.
//!
//! This crate provides:
//! - Source reading for docx and PDF, with an OCR fallback for scanned pages
//! - Field extraction for transport contract-requests (structural layout
//!   for producer tables, ordered heuristic rules for flat text)
//! - `{{key}}` placeholder substitution in docx, xls and xlsx templates
//! - A bridge between legacy (BIFF8) and modern (OOXML) workbooks

pub mod error;
pub mod models;
pub mod pdf;
pub mod ocr;
pub mod docx;
pub mod source;
pub mod extract;
pub mod workbook;
pub mod substitute;
pub mod pipeline;
mod package;

pub use error::{DocfillError, OcrError, PdfError, ReadError, Result};
pub use models::{DocfillConfig, Field, FieldMapping};
pub use pdf::{PdfExtractor, PdfProcessor};
pub use ocr::{OcrEngine, TextBox};
#[cfg(feature = "native")]
pub use ocr::PureOcrEngine;
pub use docx::WordDocument;
pub use source::{SourceDocument, SourceKind, SourceReader};
pub use extract::{extract_fields, FieldExtractor};
pub use workbook::{CellValue, SpreadsheetBook, Workbook, WorkbookFormat};
pub use substitute::{Template, TemplateKind};
pub use pipeline::{DocumentFiller, FillReport};
