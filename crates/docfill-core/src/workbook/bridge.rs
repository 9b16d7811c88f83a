//! Copying workbook content between the two container formats.

use tracing::{debug, info};

use crate::error::{DocfillError, Result};

use super::{CellValue, SpreadsheetBook, Workbook, WorkbookFormat};

/// Append every sheet of `source` to `target`: names, non-empty cell values
/// at their positions, and merged ranges. Each range is written as a
/// merge-write sourced from the top-left cell of the source.
pub fn copy_book(source: &dyn SpreadsheetBook, target: &mut dyn SpreadsheetBook) -> Result<()> {
    for (index, name) in source.sheet_names().iter().enumerate() {
        let sheet = target.add_sheet(name)?;
        let cells = source.cells(index);
        let ranges = source.merged_ranges(index);

        for cell in &cells {
            let covered = ranges
                .iter()
                .any(|r| r.contains(cell.row, cell.col) && (r.first_row, r.first_col) != (cell.row, cell.col));
            if covered {
                continue;
            }
            target.write_cell(sheet, cell.row, cell.col, cell.value.clone())?;
        }

        for range in &ranges {
            let value = cells
                .iter()
                .find(|c| (c.row, c.col) == (range.first_row, range.first_col))
                .map(|c| c.value.clone())
                .unwrap_or(CellValue::Empty);
            target.write_merge(sheet, *range, value)?;
        }

        debug!(
            "Copied sheet {:?}: {} cells, {} merged ranges",
            name,
            cells.len(),
            ranges.len()
        );
    }
    Ok(())
}

/// Convert workbook bytes from the format named by `from_ext` to the one
/// named by `to_ext`.
pub fn convert_bytes(data: &[u8], from_ext: &str, to_ext: &str) -> Result<Vec<u8>> {
    let target = WorkbookFormat::from_extension(to_ext)
        .ok_or_else(|| DocfillError::UnsupportedFormat(format!(".{}", to_ext)))?;
    let book = Workbook::load(data, from_ext)?;

    info!(
        "Converting .{} workbook to .{}",
        book.format().extension(),
        target.extension()
    );
    book.convert(target)?.book().to_bytes()
}
