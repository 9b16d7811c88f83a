//! Legacy `.xls` workbooks (BIFF8 inside a compound file).
//!
//! The globals substream is kept record by record, except for the sheet
//! directory (`BOUNDSHEET`) and the shared string table, which are rebuilt on
//! save together with every offset that points into the stream. Other streams
//! of the compound file (summary information, VBA storage) are carried over.

mod records;
mod sheet;
mod strings;

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DocfillError, ReadError, Result};

use super::model::{unique_sheet_name, CellEntry, CellValue, MergedRange};
use super::{SpreadsheetBook, WorkbookFormat};

use records::*;
use sheet::{CellContent, MAX_COLS, MAX_ROWS, Worksheet};
use strings::SharedStrings;

const WORKBOOK_STREAM: &str = "/Workbook";
const BIFF5_STREAM: &str = "/Book";
const FILEPASS: u16 = 0x002F;
const BIFF8_VERSION: u16 = 0x0600;
const MIN_STREAM_LEN: usize = 4096;

/// Sheet type byte of a `BOUNDSHEET` record.
const SHEET_KIND_WORKSHEET: u8 = 0x00;

#[derive(Debug, Clone)]
enum GlobalItem {
    Raw(Record),
    BoundSheets,
    SharedStrings,
}

#[derive(Debug, Clone)]
enum SheetBody {
    Cells(Worksheet),
    /// Chart sheets and macro sheets, kept verbatim.
    Raw(Vec<Record>),
}

#[derive(Debug, Clone)]
struct LegacySheet {
    name: String,
    /// 0 visible, 1 hidden, 2 very hidden.
    state: u8,
    kind: u8,
    body: SheetBody,
}

/// A BIFF8 workbook.
#[derive(Debug, Clone)]
pub struct LegacyWorkbook {
    globals: Vec<GlobalItem>,
    sheets: Vec<LegacySheet>,
    strings: SharedStrings,
    storages: Vec<PathBuf>,
    streams: Vec<(PathBuf, Vec<u8>)>,
}

impl LegacyWorkbook {
    /// An empty workbook with default fonts and styles and no sheets.
    pub fn new() -> Self {
        let mut globals: Vec<GlobalItem> = vec![
            Payload::new()
                .u16(BIFF8_VERSION)
                .u16(BOF_GLOBALS)
                .u16(0x0DBB)
                .u16(0x07CC)
                .u32(0)
                .u32(0x06)
                .record(BOF),
            Payload::new().u16(1200).record(CODEPAGE),
            Payload::new()
                .u16(0)
                .u16(0)
                .u16(0x3A5C)
                .u16(0x23BE)
                .u16(0x0038)
                .u16(0)
                .u16(0)
                .u16(1)
                .u16(0x0258)
                .record(WINDOW1),
        ]
        .into_iter()
        .map(GlobalItem::Raw)
        .collect();

        for _ in 0..4 {
            globals.push(GlobalItem::Raw(
                Payload::new()
                    .u16(200)
                    .u16(0)
                    .u16(0x7FFF)
                    .u16(400)
                    .u16(0)
                    .u8(0)
                    .u8(0)
                    .u8(0)
                    .u8(0)
                    .bytes(&short_string("Arial"))
                    .record(FONT),
            ));
        }
        for i in 0..16 {
            let flags = if i < 15 { 0xFFF5 } else { 0x0001 };
            globals.push(GlobalItem::Raw(
                Payload::new()
                    .u16(0)
                    .u16(0)
                    .u16(flags)
                    .u8(0x20)
                    .u8(0)
                    .u8(0)
                    .u8(0)
                    .u32(0)
                    .u32(0)
                    .u16(0x20C0)
                    .record(XF),
            ));
        }
        globals.push(GlobalItem::Raw(
            Payload::new().u16(0x8000).u8(0).u8(0xFF).record(STYLE),
        ));
        globals.push(GlobalItem::BoundSheets);
        globals.push(GlobalItem::SharedStrings);
        globals.push(GlobalItem::Raw(Record::new(EOF, Vec::new())));

        Self {
            globals,
            sheets: Vec::new(),
            strings: SharedStrings::new(),
            storages: Vec::new(),
            streams: Vec::new(),
        }
    }

    /// Load a workbook from the bytes of an `.xls` file.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, ReadError> {
        let mut file = cfb::CompoundFile::open(Cursor::new(data))?;

        let mut storages = Vec::new();
        let mut stream_paths = Vec::new();
        for entry in file.walk() {
            if entry.is_root() {
                continue;
            }
            if entry.is_storage() {
                storages.push(entry.path().to_path_buf());
            } else if entry.is_stream() {
                stream_paths.push(entry.path().to_path_buf());
            }
        }

        let workbook_path = Path::new(WORKBOOK_STREAM);
        if !stream_paths.iter().any(|p| p == workbook_path) {
            if stream_paths.iter().any(|p| p == Path::new(BIFF5_STREAM)) {
                return Err(ReadError::Biff(
                    "BIFF5 and older workbooks are not supported".to_string(),
                ));
            }
            return Err(ReadError::MissingPart("Workbook".to_string()));
        }

        let mut stream = Vec::new();
        let mut streams = Vec::new();
        for path in stream_paths {
            let mut buf = Vec::new();
            file.open_stream(&path)?.read_to_end(&mut buf)?;
            if path == workbook_path {
                stream = buf;
            } else {
                streams.push((path, buf));
            }
        }

        let mut workbook = Self::parse_stream(&stream)?;
        workbook.storages = storages;
        workbook.streams = streams;
        Ok(workbook)
    }

    fn parse_stream(stream: &[u8]) -> std::result::Result<Self, ReadError> {
        let records = read_substream(stream, 0)?;
        let version = records
            .first()
            .map(|bof| u16_at(&bof.data, 0))
            .transpose()?
            .unwrap_or(0);
        if version != BIFF8_VERSION {
            return Err(ReadError::Biff(format!(
                "unsupported BIFF version 0x{:04X}",
                version
            )));
        }

        let mut globals = Vec::with_capacity(records.len());
        let mut directory = Vec::new();
        let mut sst_segments: Vec<&[u8]> = Vec::new();
        let mut in_sst = false;

        for record in &records {
            if in_sst && record.id == CONTINUE {
                sst_segments.push(&record.data);
                continue;
            }
            in_sst = false;

            match record.id {
                FILEPASS => {
                    return Err(ReadError::Biff(
                        "encrypted workbooks are not supported".to_string(),
                    ));
                }
                BOUNDSHEET => {
                    let offset = u32_at(&record.data, 0)? as usize;
                    let state = *record.data.get(4).unwrap_or(&0);
                    let kind = *record.data.get(5).unwrap_or(&0);
                    let (name, _) = read_short_string(&record.data, 6)?;
                    if directory.is_empty() {
                        globals.push(GlobalItem::BoundSheets);
                    }
                    directory.push((offset, state, kind, name));
                }
                SST => {
                    sst_segments.push(&record.data);
                    in_sst = true;
                    globals.push(GlobalItem::SharedStrings);
                }
                EXTSST => {}
                _ => globals.push(GlobalItem::Raw(record.clone())),
            }
        }

        let eof_at = globals.len().saturating_sub(1);
        if !globals.iter().any(|g| matches!(g, GlobalItem::BoundSheets)) {
            globals.insert(eof_at, GlobalItem::BoundSheets);
        }
        let eof_at = globals.len().saturating_sub(1);
        if !globals.iter().any(|g| matches!(g, GlobalItem::SharedStrings)) {
            globals.insert(eof_at, GlobalItem::SharedStrings);
        }

        let mut strings = if sst_segments.is_empty() {
            SharedStrings::new()
        } else {
            SharedStrings::parse(sst_segments)?
        };

        let mut sheets = Vec::with_capacity(directory.len());
        for (offset, state, kind, name) in directory {
            let records = read_substream(stream, offset)?;
            let body = if kind == SHEET_KIND_WORKSHEET {
                SheetBody::Cells(Worksheet::parse(records, &mut strings)?)
            } else {
                debug!("Keeping sheet {:?} of type {} verbatim", name, kind);
                SheetBody::Raw(records)
            };
            sheets.push(LegacySheet {
                name,
                state,
                kind,
                body,
            });
        }

        debug!(
            "Loaded legacy workbook: {} sheets, {} shared strings",
            sheets.len(),
            strings.len()
        );
        Ok(Self {
            globals,
            sheets,
            strings,
            storages: Vec::new(),
            streams: Vec::new(),
        })
    }

    fn worksheet(&self, sheet: usize) -> Option<&Worksheet> {
        match &self.sheets.get(sheet)?.body {
            SheetBody::Cells(worksheet) => Some(worksheet),
            SheetBody::Raw(_) => None,
        }
    }

    fn worksheet_mut(&mut self, sheet: usize) -> Result<&mut Worksheet> {
        match self.sheets.get_mut(sheet).map(|s| &mut s.body) {
            Some(SheetBody::Cells(worksheet)) => Ok(worksheet),
            Some(SheetBody::Raw(_)) => Err(DocfillError::UnsupportedWorkbook(format!(
                "sheet {} holds no cells",
                sheet
            ))),
            None => Err(DocfillError::UnsupportedWorkbook(format!(
                "no sheet at index {}",
                sheet
            ))),
        }
    }

    fn content_for(&mut self, value: CellValue) -> CellContent {
        match value {
            CellValue::Empty => CellContent::Blank,
            CellValue::Text(text) => CellContent::Shared(self.strings.intern(&text)),
            CellValue::Number(number) => CellContent::Number(number),
            CellValue::Bool(flag) => CellContent::Bool(flag),
            CellValue::Error(code) => CellContent::Error(code),
        }
    }

    fn value_of(&self, content: &CellContent) -> (CellValue, bool) {
        match content {
            CellContent::Blank => (CellValue::Empty, false),
            CellContent::Shared(index) => (
                CellValue::Text(self.strings.get(*index).unwrap_or_default().to_string()),
                false,
            ),
            CellContent::Number(number) => (CellValue::Number(*number), false),
            CellContent::Bool(flag) => (CellValue::Bool(*flag), false),
            CellContent::Error(code) => (CellValue::Error(*code), false),
            CellContent::Formula { cached, .. } => (cached.clone(), true),
        }
    }

    /// Serialize the globals substream. Lengths do not depend on the offsets
    /// passed in, so a first pass with zeros sizes the stream.
    fn globals_records(
        &self,
        sheet_offsets: &[u32],
        strings: &strings::SstLayout,
        sst_offset: usize,
    ) -> (Vec<Record>, usize) {
        let mut out = Vec::new();
        let mut pos = 0usize;
        let mut sst_at = 0usize;

        for item in &self.globals {
            let records: Vec<Record> = match item {
                GlobalItem::Raw(record) => vec![record.clone()],
                GlobalItem::BoundSheets => self
                    .sheets
                    .iter()
                    .zip(sheet_offsets)
                    .map(|(sheet, offset)| {
                        Payload::new()
                            .u32(*offset)
                            .u8(sheet.state)
                            .u8(sheet.kind)
                            .bytes(&short_string(&sheet.name))
                            .record(BOUNDSHEET)
                    })
                    .collect(),
                GlobalItem::SharedStrings => {
                    sst_at = pos;
                    let mut records = strings.records.clone();
                    records.push(strings.extsst(sst_offset));
                    records
                }
            };
            for record in records {
                pos += record.stream_len();
                out.push(record);
            }
        }

        (out, sst_at)
    }

    fn workbook_stream(&self) -> std::result::Result<Vec<u8>, ReadError> {
        let sheet_records: Vec<Vec<Record>> = self
            .sheets
            .iter()
            .map(|sheet| match &sheet.body {
                SheetBody::Cells(worksheet) => worksheet.to_records(),
                SheetBody::Raw(records) => records.clone(),
            })
            .collect();

        let references = self
            .sheets
            .iter()
            .filter_map(|s| match &s.body {
                SheetBody::Cells(worksheet) => Some(worksheet.shared_references()),
                SheetBody::Raw(_) => None,
            })
            .sum();
        let layout = self.strings.layout(references)?;

        let zeros = vec![0u32; self.sheets.len()];
        let (sizing, sst_offset) = self.globals_records(&zeros, &layout, 0);
        let mut offset = sizing.iter().map(Record::stream_len).sum::<usize>();
        let mut offsets = Vec::with_capacity(sheet_records.len());
        for records in &sheet_records {
            offsets.push(offset as u32);
            offset += records.iter().map(Record::stream_len).sum::<usize>();
        }

        let (globals, _) = self.globals_records(&offsets, &layout, sst_offset);
        let mut stream = Vec::with_capacity(offset.max(MIN_STREAM_LEN));
        for record in globals.iter().chain(sheet_records.iter().flatten()) {
            record.write_to(&mut stream);
        }
        if stream.len() < MIN_STREAM_LEN {
            stream.resize(MIN_STREAM_LEN, 0);
        }
        Ok(stream)
    }

    fn write_compound(&self) -> std::result::Result<Vec<u8>, ReadError> {
        let mut file = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;

        let mut storages = self.storages.clone();
        storages.sort_by_key(|p| p.components().count());
        for storage in &storages {
            file.create_storage(storage)?;
        }

        file.create_stream(WORKBOOK_STREAM)?
            .write_all(&self.workbook_stream()?)?;
        for (path, data) in &self.streams {
            file.create_stream(path)?.write_all(data)?;
        }

        file.flush()?;
        Ok(file.into_inner().into_inner())
    }
}

impl Default for LegacyWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadsheetBook for LegacyWorkbook {
    fn format(&self) -> WorkbookFormat {
        WorkbookFormat::Legacy
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn cells(&self, sheet: usize) -> Vec<CellEntry> {
        let Some(worksheet) = self.worksheet(sheet) else {
            return Vec::new();
        };
        worksheet
            .cells()
            .filter_map(|(row, col, cell)| {
                let (value, formula) = self.value_of(&cell.content);
                (!value.is_empty()).then_some(CellEntry {
                    row,
                    col,
                    value,
                    formula,
                })
            })
            .collect()
    }

    fn merged_ranges(&self, sheet: usize) -> Vec<MergedRange> {
        self.worksheet(sheet)
            .map(|w| w.merged_ranges().to_vec())
            .unwrap_or_default()
    }

    fn add_sheet(&mut self, name: &str) -> Result<usize> {
        let name = unique_sheet_name(name, &self.sheet_names());
        let selected = self.sheets.is_empty();
        self.sheets.push(LegacySheet {
            name,
            state: 0,
            kind: SHEET_KIND_WORKSHEET,
            body: SheetBody::Cells(Worksheet::empty(selected)),
        });
        Ok(self.sheets.len() - 1)
    }

    fn write_cell(&mut self, sheet: usize, row: u32, col: u32, value: CellValue) -> Result<()> {
        check_grid(row, col)?;
        let content = self.content_for(value);
        self.worksheet_mut(sheet)?.set(row, col, content)?;
        Ok(())
    }

    fn write_merge(&mut self, sheet: usize, range: MergedRange, value: CellValue) -> Result<()> {
        check_grid(range.last_row, range.last_col)?;
        self.write_cell(sheet, range.first_row, range.first_col, value)?;
        self.worksheet_mut(sheet)?.merge(range)?;
        Ok(())
    }

    fn reveal_sheets(&mut self) -> usize {
        let mut revealed = 0;
        for sheet in self.sheets.iter_mut().filter(|s| s.state != 0) {
            debug!("Revealing sheet {:?}", sheet.name);
            sheet.state = 0;
            revealed += 1;
        }
        revealed
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.sheets.is_empty() {
            warn!("Saving a legacy workbook without sheets");
        }
        Ok(self.write_compound()?)
    }
}

fn check_grid(row: u32, col: u32) -> Result<()> {
    if row >= MAX_ROWS || col >= MAX_COLS {
        return Err(DocfillError::UnsupportedWorkbook(format!(
            "cell {} is outside the {} rows x {} columns of an .xls sheet",
            super::model::a1(row, col),
            MAX_ROWS,
            MAX_COLS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> LegacyWorkbook {
        let mut book = LegacyWorkbook::new();
        let first = book.add_sheet("Заявка").unwrap();
        book.write_cell(first, 0, 0, CellValue::Text("Перевозчик".into()))
            .unwrap();
        book.write_cell(first, 0, 1, CellValue::Text("{{ФИО водителя}}".into()))
            .unwrap();
        book.write_cell(first, 3, 2, CellValue::Number(1250.5))
            .unwrap();
        book.write_merge(
            first,
            MergedRange::new(5, 6, 0, 3),
            CellValue::Text("Итого".into()),
        )
        .unwrap();
        let second = book.add_sheet("Справочник").unwrap();
        book.write_cell(second, 0, 0, CellValue::Bool(true)).unwrap();
        book
    }

    #[test]
    fn test_round_trip_through_compound_file() {
        let bytes = sample().to_bytes().unwrap();
        let book = LegacyWorkbook::from_bytes(&bytes).unwrap();

        assert_eq!(book.sheet_names(), vec!["Заявка", "Справочник"]);
        assert_eq!(
            book.cells(0),
            vec![
                CellEntry {
                    row: 0,
                    col: 0,
                    value: CellValue::Text("Перевозчик".into()),
                    formula: false
                },
                CellEntry {
                    row: 0,
                    col: 1,
                    value: CellValue::Text("{{ФИО водителя}}".into()),
                    formula: false
                },
                CellEntry {
                    row: 3,
                    col: 2,
                    value: CellValue::Number(1250.5),
                    formula: false
                },
                CellEntry {
                    row: 5,
                    col: 0,
                    value: CellValue::Text("Итого".into()),
                    formula: false
                },
            ]
        );
        assert_eq!(book.merged_ranges(0), vec![MergedRange::new(5, 6, 0, 3)]);
        assert_eq!(book.cells(1)[0].value, CellValue::Bool(true));
    }

    #[test]
    fn test_rewriting_keeps_sheet_offsets_valid() {
        let bytes = sample().to_bytes().unwrap();
        let mut book = LegacyWorkbook::from_bytes(&bytes).unwrap();
        let long = "длинный текст ".repeat(700);
        book.write_cell(0, 0, 1, CellValue::Text(long.clone()))
            .unwrap();

        let again = LegacyWorkbook::from_bytes(&book.to_bytes().unwrap()).unwrap();
        assert_eq!(again.cells(0)[1].value, CellValue::Text(long));
        assert_eq!(again.cells(1)[0].value, CellValue::Bool(true));
    }

    #[test]
    fn test_reveal_hidden_sheets() {
        let mut book = sample();
        book.sheets[1].state = 1;
        let mut book = LegacyWorkbook::from_bytes(&book.to_bytes().unwrap()).unwrap();

        assert_eq!(book.sheets[1].state, 1);
        assert_eq!(book.reveal_sheets(), 1);
        assert_eq!(book.reveal_sheets(), 0);
        let book = LegacyWorkbook::from_bytes(&book.to_bytes().unwrap()).unwrap();
        assert_eq!(book.sheets[1].state, 0);
    }

    #[test]
    fn test_grid_limits() {
        let mut book = sample();
        let err = book
            .write_cell(0, 70_000, 0, CellValue::Text("x".into()))
            .unwrap_err();
        assert!(matches!(err, DocfillError::UnsupportedWorkbook(_)));
        assert!(book.write_cell(9, 0, 0, CellValue::Empty).is_err());
    }

    #[test]
    fn test_oversized_text_fails_to_save() {
        let mut book = sample();
        book.write_cell(0, 7, 0, CellValue::Text("Ж".repeat(70_000)))
            .unwrap();
        let err = book.to_bytes().unwrap_err();
        assert!(matches!(err, DocfillError::DocumentRead(ReadError::Biff(_))));
    }

    #[test]
    fn test_not_a_compound_file() {
        assert!(LegacyWorkbook::from_bytes(b"PK\x03\x04 not an xls").is_err());
    }

    #[test]
    fn test_long_sheet_names_are_truncated() {
        let mut book = LegacyWorkbook::new();
        book.add_sheet(&"Л".repeat(40)).unwrap();
        book.add_sheet(&"Л".repeat(35)).unwrap();

        let names = book.sheet_names();
        assert_eq!(names[0].chars().count(), 31);
        assert_eq!(names[1], format!("{}~1", "Л".repeat(29)));

        let reread = LegacyWorkbook::from_bytes(&book.to_bytes().unwrap()).unwrap();
        assert_eq!(reread.sheet_names(), names);
    }
}
