//! Spreadsheet templates in both container formats.
//!
//! [`SpreadsheetBook`] is the format-neutral surface used by substitution
//! and by the [`bridge`]: list sheets and cells, write cells and merged
//! ranges, reveal hidden sheets, serialize. [`Workbook`] picks the
//! implementation from the file extension.

pub mod bridge;
mod legacy;
mod model;
mod modern;

pub use legacy::LegacyWorkbook;
pub use model::{
    a1, error_code, error_name, parse_a1, unique_sheet_name, CellEntry, CellValue, MergedRange,
    MAX_SHEET_NAME,
};
pub use modern::ModernWorkbook;

use tracing::{debug, warn};

use crate::error::{DocfillError, Result};

/// Container format of a workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookFormat {
    /// BIFF8 inside a compound file (`.xls`).
    Legacy,
    /// SpreadsheetML package (`.xlsx`).
    Modern,
}

impl WorkbookFormat {
    /// Format for a file extension, case-insensitive. `None` for anything
    /// that is not a workbook.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xls" => Some(Self::Legacy),
            "xlsx" => Some(Self::Modern),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Legacy => "xls",
            Self::Modern => "xlsx",
        }
    }
}

/// Operations shared by both workbook formats.
///
/// Sheets are addressed by position. Rows and columns are zero-based.
pub trait SpreadsheetBook {
    fn format(&self) -> WorkbookFormat;

    /// Sheet names in workbook order.
    fn sheet_names(&self) -> Vec<String>;

    /// Non-empty cells of a sheet in row-major order. Unknown sheets have
    /// no cells.
    fn cells(&self, sheet: usize) -> Vec<CellEntry>;

    fn merged_ranges(&self, sheet: usize) -> Vec<MergedRange>;

    /// Append an empty sheet and return its index.
    fn add_sheet(&mut self, name: &str) -> Result<usize>;

    /// Set a cell value. An existing cell keeps its style.
    fn write_cell(&mut self, sheet: usize, row: u32, col: u32, value: CellValue) -> Result<()>;

    /// Set the top-left cell of `range` and register the range as merged.
    fn write_merge(&mut self, sheet: usize, range: MergedRange, value: CellValue) -> Result<()>;

    /// Make every hidden sheet visible. Returns how many changed.
    fn reveal_sheets(&mut self) -> usize;

    fn to_bytes(&self) -> Result<Vec<u8>>;
}

/// A workbook of either format.
#[derive(Debug, Clone)]
pub enum Workbook {
    Legacy(LegacyWorkbook),
    Modern(ModernWorkbook),
}

impl Workbook {
    /// Load a workbook, choosing the parser from the extension.
    ///
    /// Files named `.xlsx` that are not zip packages are retried as legacy
    /// workbooks, since some producers save BIFF8 under the newer name.
    pub fn load(data: &[u8], ext: &str) -> Result<Self> {
        let format = WorkbookFormat::from_extension(ext)
            .ok_or_else(|| DocfillError::UnsupportedWorkbook(format!(".{} is not a workbook", ext)))?;

        match format {
            WorkbookFormat::Legacy => Ok(Self::Legacy(LegacyWorkbook::from_bytes(data)?)),
            WorkbookFormat::Modern => match ModernWorkbook::from_bytes(data) {
                Ok(book) => Ok(Self::Modern(book)),
                Err(modern_err) => {
                    warn!("Not a valid .xlsx package ({}), trying the .xls reader", modern_err);
                    LegacyWorkbook::from_bytes(data)
                        .map(Self::Legacy)
                        .map_err(|_| modern_err.into())
                }
            },
        }
    }

    /// An empty workbook of the given format.
    pub fn new(format: WorkbookFormat) -> Self {
        match format {
            WorkbookFormat::Legacy => Self::Legacy(LegacyWorkbook::new()),
            WorkbookFormat::Modern => Self::Modern(ModernWorkbook::new()),
        }
    }

    pub fn book(&self) -> &dyn SpreadsheetBook {
        match self {
            Self::Legacy(book) => book,
            Self::Modern(book) => book,
        }
    }

    pub fn book_mut(&mut self) -> &mut dyn SpreadsheetBook {
        match self {
            Self::Legacy(book) => book,
            Self::Modern(book) => book,
        }
    }

    pub fn format(&self) -> WorkbookFormat {
        self.book().format()
    }

    /// This workbook in `target` format. Same format returns a clone.
    pub fn convert(&self, target: WorkbookFormat) -> Result<Self> {
        if self.format() == target {
            return Ok(self.clone());
        }
        debug!(
            "Converting workbook from .{} to .{}",
            self.format().extension(),
            target.extension()
        );
        let mut converted = Self::new(target);
        bridge::copy_book(self.book(), converted.book_mut())?;
        Ok(converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(WorkbookFormat::from_extension("XLS"), Some(WorkbookFormat::Legacy));
        assert_eq!(WorkbookFormat::from_extension("xlsx"), Some(WorkbookFormat::Modern));
        assert_eq!(WorkbookFormat::from_extension("docx"), None);
        assert_eq!(WorkbookFormat::Modern.extension(), "xlsx");
    }

    #[test]
    fn test_load_rejects_non_workbooks() {
        let err = Workbook::load(b"", "docx").unwrap_err();
        assert!(matches!(err, DocfillError::UnsupportedWorkbook(_)));
    }

    #[test]
    fn test_legacy_bytes_named_xlsx_are_read() {
        let mut legacy = Workbook::new(WorkbookFormat::Legacy);
        let sheet = legacy.book_mut().add_sheet("Лист1").unwrap();
        legacy
            .book_mut()
            .write_cell(sheet, 0, 0, CellValue::Text("{{Заказчик}}".into()))
            .unwrap();
        let bytes = legacy.book().to_bytes().unwrap();

        let loaded = Workbook::load(&bytes, "xlsx").unwrap();
        assert_eq!(loaded.format(), WorkbookFormat::Legacy);
        assert_eq!(
            loaded.book().cells(0)[0].value,
            CellValue::Text("{{Заказчик}}".into())
        );
    }

    #[test]
    fn test_garbage_named_xlsx_reports_package_error() {
        let err = Workbook::load(b"not a workbook at all", "xlsx").unwrap_err();
        assert!(matches!(err, DocfillError::DocumentRead(_)));
    }
}
