//! Placeholder substitution into loaded templates.
//!
//! Every `{{key}}` of the field vocabulary is replaced by the mapped value,
//! empty values included. Unknown tokens stay as they are. Matching works
//! on one text unit at a time (a word run or a spreadsheet cell), so a
//! token split across two runs is not replaced.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::docx::WordDocument;
use crate::error::{DocfillError, Result};
use crate::models::fields::{Field, FieldMapping, PLACEHOLDER_OPEN};
use crate::workbook::{CellValue, SpreadsheetBook, Workbook, WorkbookFormat};

/// Kinds of template the filler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Word,
    Workbook(WorkbookFormat),
}

impl TemplateKind {
    /// Detect the kind from a file extension (case-insensitive, dot optional).
    pub fn from_extension(extension: &str) -> Result<Self> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if ext == "docx" {
            return Ok(Self::Word);
        }
        WorkbookFormat::from_extension(&ext)
            .map(Self::Workbook)
            .ok_or(DocfillError::UnsupportedInputFormat(ext))
    }

    /// Extension of the format a template of this kind saves to by default.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Word => "docx",
            Self::Workbook(format) => format.extension(),
        }
    }
}

/// A loaded template, owned by the caller and mutated in place.
#[derive(Debug, Clone)]
pub enum Template {
    Word(WordDocument),
    Workbook(Workbook),
}

impl Template {
    /// Load a template of the given extension.
    pub fn load(data: &[u8], extension: &str) -> Result<Self> {
        match TemplateKind::from_extension(extension)? {
            TemplateKind::Word => Ok(Self::Word(WordDocument::from_bytes(data)?)),
            TemplateKind::Workbook(format) => {
                Ok(Self::Workbook(Workbook::load(data, format.extension())?))
            }
        }
    }

    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Word(_) => TemplateKind::Word,
            Self::Workbook(book) => TemplateKind::Workbook(book.format()),
        }
    }

    /// Replace every placeholder. Returns the number of text units changed.
    pub fn substitute(&mut self, mapping: &FieldMapping) -> Result<usize> {
        match self {
            Self::Word(document) => Ok(substitute_word(document, mapping)),
            Self::Workbook(book) => substitute_workbook(book.book_mut(), mapping),
        }
    }
}

/// `text` with every known placeholder replaced, or `None` when it holds
/// none.
pub fn substitute_text(text: &str, mapping: &FieldMapping) -> Option<String> {
    if !text.contains(PLACEHOLDER_OPEN) {
        return None;
    }
    let mut result: Option<String> = None;
    for field in Field::ALL {
        let placeholder = field.placeholder();
        let current = result.as_deref().unwrap_or(text);
        if current.contains(&placeholder) {
            result = Some(current.replace(&placeholder, mapping.get(field)));
        }
    }
    result
}

/// Replace placeholders in every run of a word document, tables included.
pub fn substitute_word(document: &mut WordDocument, mapping: &FieldMapping) -> usize {
    let changed = document.rewrite_runs(|text| substitute_text(text, mapping));
    info!("Substituted placeholders in {} runs", changed);
    changed
}

/// Replace placeholders in every textual cell of every sheet.
///
/// Formula cells and non-text values are left alone. A changed cell inside
/// a merged range is written once through a merge-write over the whole range,
/// so the range stays intact.
pub fn substitute_workbook(book: &mut dyn SpreadsheetBook, mapping: &FieldMapping) -> Result<usize> {
    let mut changed = 0;

    for sheet in 0..book.sheet_names().len() {
        let ranges = book.merged_ranges(sheet);
        let mut handled = HashSet::new();

        for cell in book.cells(sheet) {
            if cell.formula {
                continue;
            }
            let CellValue::Text(text) = &cell.value else {
                continue;
            };
            let Some(new_text) = substitute_text(text, mapping) else {
                continue;
            };
            if &new_text == text {
                continue;
            }

            match ranges.iter().find(|r| r.contains(cell.row, cell.col)) {
                Some(range) => {
                    if !handled.insert(*range) {
                        continue;
                    }
                    book.write_merge(sheet, *range, CellValue::Text(new_text))?;
                    // The value now lives in the anchor; drop the hidden copy
                    if (range.first_row, range.first_col) != (cell.row, cell.col) {
                        book.write_cell(sheet, cell.row, cell.col, CellValue::Empty)?;
                    }
                }
                None => book.write_cell(sheet, cell.row, cell.col, CellValue::Text(new_text))?,
            }
            debug!("Rewrote cell {} of sheet {}", crate::workbook::a1(cell.row, cell.col), sheet);
            changed += 1;
        }
    }

    info!("Substituted placeholders in {} cells", changed);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::fixtures::{docx, paragraph, table};
    use crate::workbook::{LegacyWorkbook, MergedRange};
    use pretty_assertions::assert_eq;

    fn mapping() -> FieldMapping {
        let mut mapping = FieldMapping::new();
        mapping.set(Field::DriverName, "Иванов И.И.");
        mapping.set(Field::DocumentNumber, "№ 17-А от 01.02.2024 года.");
        mapping.set(Field::CustomerBlock, "ООО \"Ромашка\"\nг. Москва");
        mapping
    }

    #[test]
    fn test_substitute_text() {
        let mapping = mapping();
        assert_eq!(
            substitute_text("Водитель: {{ФИО водителя}}", &mapping).as_deref(),
            Some("Водитель: Иванов И.И.")
        );
        assert_eq!(substitute_text("без меток", &mapping), None);
        assert_eq!(substitute_text("{{Неизвестно}}", &mapping), None);
        assert_eq!(
            substitute_text("{{ИНН получателя}}|{{ФИО водителя}}|{{ФИО водителя}}", &mapping).as_deref(),
            Some("|Иванов И.И.|Иванов И.И.")
        );
    }

    #[test]
    fn test_word_paragraphs_and_tables() {
        let body = format!(
            "{}{}",
            paragraph(&["Водитель: {{ФИО водителя}}"]),
            table(&[&["Заявка {{Номер документа}}", "{{Данные заказчика}}"]])
        );
        let mut template = Template::load(&docx(&body), "docx").unwrap();
        assert_eq!(template.substitute(&mapping()).unwrap(), 3);

        let Template::Word(document) = template else {
            panic!("expected a word template");
        };
        let body = document.body();
        assert_eq!(body.paragraphs, vec!["Водитель: Иванов И.И."]);
        assert_eq!(
            body.tables[0].cell(0, 0),
            Some("Заявка № 17-А от 01.02.2024 года.")
        );
        assert_eq!(body.tables[0].cell(0, 1), Some("ООО \"Ромашка\"\nг. Москва"));
    }

    #[test]
    fn test_split_tokens_are_left_alone() {
        let mut template =
            Template::load(&docx(&paragraph(&["{{ФИО ", "водителя}}"])), "docx").unwrap();
        assert_eq!(template.substitute(&mapping()).unwrap(), 0);
    }

    #[test]
    fn test_workbook_cells_and_merges() {
        let mut book = LegacyWorkbook::new();
        let sheet = book.add_sheet("Лист1").unwrap();
        book.write_cell(sheet, 0, 0, CellValue::Text("Водитель: {{ФИО водителя}}".into()))
            .unwrap();
        book.write_cell(sheet, 0, 1, CellValue::Number(5.0)).unwrap();
        book.write_merge(
            sheet,
            MergedRange::new(2, 3, 0, 4),
            CellValue::Text("{{Номер документа}}".into()),
        )
        .unwrap();
        book.write_cell(sheet, 5, 0, CellValue::Text("{{Чужой ключ}}".into()))
            .unwrap();

        let changed = substitute_workbook(&mut book, &mapping()).unwrap();
        assert_eq!(changed, 2);

        let cells = book.cells(sheet);
        assert_eq!(cells[0].value, CellValue::Text("Водитель: Иванов И.И.".into()));
        assert_eq!(cells[1].value, CellValue::Number(5.0));
        assert_eq!(
            cells[2].value,
            CellValue::Text("№ 17-А от 01.02.2024 года.".into())
        );
        assert_eq!(cells[3].value, CellValue::Text("{{Чужой ключ}}".into()));
        assert_eq!(book.merged_ranges(sheet), vec![MergedRange::new(2, 3, 0, 4)]);
    }

    #[test]
    fn test_placeholder_inside_merged_range() {
        let mut book = LegacyWorkbook::new();
        let sheet = book.add_sheet("Лист1").unwrap();
        let range = MergedRange::new(1, 2, 0, 3);
        book.write_merge(sheet, range, CellValue::Empty).unwrap();
        book.write_cell(sheet, 1, 2, CellValue::Text("{{ФИО водителя}}".into()))
            .unwrap();
        book.write_cell(sheet, 2, 3, CellValue::Text("{{Номер документа}}".into()))
            .unwrap();

        assert_eq!(substitute_workbook(&mut book, &mapping()).unwrap(), 1);

        let cells = book.cells(sheet);
        assert_eq!(cells.len(), 2);
        assert_eq!((cells[0].row, cells[0].col), (1, 0));
        assert_eq!(cells[0].value, CellValue::Text("Иванов И.И.".into()));
        assert_eq!(book.merged_ranges(sheet), vec![range]);

        let reread = LegacyWorkbook::from_bytes(&book.to_bytes().unwrap()).unwrap();
        assert_eq!(reread.merged_ranges(sheet), vec![range]);
    }

    #[test]
    fn test_template_kind() {
        assert_eq!(TemplateKind::from_extension(".DOCX").unwrap(), TemplateKind::Word);
        assert_eq!(
            TemplateKind::from_extension("xls").unwrap(),
            TemplateKind::Workbook(WorkbookFormat::Legacy)
        );
        assert!(matches!(
            TemplateKind::from_extension("odt"),
            Err(DocfillError::UnsupportedInputFormat(_))
        ));
    }

    #[test]
    fn test_substitution_is_deterministic() {
        let bytes = docx(&paragraph(&["{{ФИО водителя}}", "{{Данные заказчика}}"]));
        let run = || {
            let mut template = Template::load(&bytes, "docx").unwrap();
            template.substitute(&mapping()).unwrap();
            match template {
                Template::Word(document) => document.to_bytes().unwrap(),
                Template::Workbook(_) => unreachable!(),
            }
        };
        assert_eq!(run(), run());
    }
}
