//! Worksheet substreams.
//!
//! A worksheet is split into the records before the cell table, the cell
//! table itself (rows and cells, decoded) and everything after it. Only the
//! cell table and the merged ranges are regenerated on save; all other
//! records are written back as they were read.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::error::ReadError;
use crate::workbook::model::{CellValue, MergedRange};

use super::records::*;
use super::strings::SharedStrings;

/// Most rows a legacy sheet can hold.
pub const MAX_ROWS: u32 = 65_536;
/// Most columns a legacy sheet can hold.
pub const MAX_COLS: u32 = 256;
/// Style index of the default cell format.
pub const DEFAULT_XF: u16 = 15;

const MAX_MERGES_PER_RECORD: usize = 1026;
const ROWS_PER_BLOCK: u32 = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Blank,
    Shared(u32),
    Number(f64),
    Bool(bool),
    Error(u8),
    /// `FORMULA` plus its trailing `STRING`/`SHRFMLA`/`ARRAY`/`TABLE`
    /// records, kept verbatim.
    Formula {
        records: Vec<Record>,
        cached: CellValue,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyCell {
    pub xf: u16,
    pub content: CellContent,
}

#[derive(Debug, Clone, Default)]
pub struct Worksheet {
    head: Vec<Record>,
    rows: BTreeMap<u32, Record>,
    cells: BTreeMap<(u32, u16), LegacyCell>,
    tail: Vec<Record>,
    merged: Vec<MergedRange>,
    merged_slot: Option<usize>,
}

#[derive(PartialEq)]
enum Phase {
    Head,
    Cells,
    Tail,
}

impl Worksheet {
    /// A sheet with no cells. `selected` marks the active tab.
    pub fn empty(selected: bool) -> Self {
        let bof = Payload::new()
            .u16(0x0600)
            .u16(BOF_WORKSHEET)
            .u16(0x0DBB)
            .u16(0x07CC)
            .u32(0)
            .u32(0x06)
            .record(BOF);
        let window2 = Payload::new()
            .u16(if selected { 0x06B6 } else { 0x04B6 })
            .u16(0)
            .u16(0)
            .u16(0x0040)
            .u16(0)
            .u16(0)
            .u16(0)
            .u32(0)
            .record(WINDOW2);

        Self {
            head: vec![bof],
            tail: vec![window2, Record::new(EOF, Vec::new())],
            ..Self::default()
        }
    }

    /// Decode a worksheet substream (`BOF` through `EOF`).
    pub fn parse(records: Vec<Record>, strings: &mut SharedStrings) -> Result<Self, ReadError> {
        let mut sheet = Self::default();
        let mut phase = Phase::Head;
        let mut last_formula: Option<(u32, u16)> = None;
        let mut depth = 0i32;

        for record in records {
            if phase == Phase::Head {
                match record.id {
                    INDEX => continue,
                    DIMENSIONS => {
                        phase = Phase::Cells;
                        continue;
                    }
                    id if is_cell_table(id) => phase = Phase::Cells,
                    _ => {
                        sheet.head.push(record);
                        continue;
                    }
                }
            }

            if phase == Phase::Cells {
                match record.id {
                    ROW => {
                        let row = u16_at(&record.data, 0)? as u32;
                        sheet.rows.insert(row, record);
                        continue;
                    }
                    DBCELL => continue,
                    STRING | SHRFMLA | ARRAY | TABLE | CONTINUE => {
                        if let Some(key) = last_formula {
                            if let Some(cell) = sheet.cells.get_mut(&key) {
                                attach_to_formula(cell, record)?;
                                continue;
                            }
                        }
                        phase = Phase::Tail;
                    }
                    id if is_cell(id) => {
                        last_formula = None;
                        for (row, col, cell) in decode_cells(&record, strings)? {
                            if id == FORMULA {
                                last_formula = Some((row, col));
                            }
                            sheet.cells.insert((row, col), cell);
                        }
                        continue;
                    }
                    _ => phase = Phase::Tail,
                }
            }

            match record.id {
                MERGEDCELLS if depth == 0 => {
                    sheet.merged.extend(decode_merges(&record)?);
                    sheet.merged_slot.get_or_insert(sheet.tail.len());
                }
                BOF => {
                    depth += 1;
                    sheet.tail.push(record);
                }
                EOF => {
                    depth -= 1;
                    sheet.tail.push(record);
                }
                _ => sheet.tail.push(record),
            }
        }

        trace!(
            "Worksheet: {} rows, {} cells, {} merged ranges",
            sheet.rows.len(),
            sheet.cells.len(),
            sheet.merged.len()
        );
        Ok(sheet)
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&LegacyCell> {
        self.cells.get(&(row, col as u16))
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, &LegacyCell)> {
        self.cells
            .iter()
            .map(|(&(row, col), cell)| (row, col as u32, cell))
    }

    pub fn merged_ranges(&self) -> &[MergedRange] {
        &self.merged
    }

    /// Set a cell, keeping its style index when it already exists.
    pub fn set(&mut self, row: u32, col: u32, content: CellContent) -> Result<(), ReadError> {
        check_bounds(row, col)?;
        let key = (row, col as u16);
        let xf = self.cells.get(&key).map(|c| c.xf).unwrap_or(DEFAULT_XF);
        self.cells.insert(key, LegacyCell { xf, content });
        Ok(())
    }

    /// Record a merged range, filling its empty cells with blanks styled
    /// like the top-left cell so borders and fills span the whole range.
    pub fn merge(&mut self, range: MergedRange) -> Result<(), ReadError> {
        check_bounds(range.last_row, range.last_col)?;
        let xf = self
            .cell(range.first_row, range.first_col)
            .map(|c| c.xf)
            .unwrap_or(DEFAULT_XF);

        for row in range.first_row..=range.last_row {
            for col in range.first_col..=range.last_col {
                self.cells.entry((row, col as u16)).or_insert(LegacyCell {
                    xf,
                    content: CellContent::Blank,
                });
            }
        }
        if !self.merged.contains(&range) {
            self.merged.push(range);
        }
        Ok(())
    }

    /// Number of cells referring to the shared string table.
    pub fn shared_references(&self) -> u32 {
        self.cells
            .values()
            .filter(|c| matches!(c.content, CellContent::Shared(_)))
            .count() as u32
    }

    /// Serialize the substream.
    pub fn to_records(&self) -> Vec<Record> {
        let mut out: Vec<Record> = self.head.clone();
        out.push(self.dimensions());

        let mut row_numbers: BTreeSet<u32> = self.rows.keys().copied().collect();
        row_numbers.extend(self.cells.keys().map(|(row, _)| *row));

        let blocks: BTreeMap<u32, Vec<u32>> =
            row_numbers.into_iter().fold(BTreeMap::new(), |mut acc, row| {
                acc.entry(row / ROWS_PER_BLOCK).or_insert_with(Vec::new).push(row);
                acc
            });

        for rows in blocks.values() {
            for &row in rows {
                out.push(self.row_record(row));
            }
            for &row in rows {
                let range = (row, 0)..=(row, u16::MAX);
                for (&(_, col), cell) in self.cells.range(range) {
                    encode_cell(row, col, cell, &mut out);
                }
            }
        }

        let slot = self.merged_slot.unwrap_or_else(|| self.default_merge_slot());
        for (i, record) in self.tail.iter().enumerate() {
            if i == slot {
                out.extend(self.merge_records());
            }
            out.push(record.clone());
        }
        if slot >= self.tail.len() {
            out.extend(self.merge_records());
        }
        out
    }

    fn dimensions(&self) -> Record {
        let mut rows = self.cells.keys().map(|(r, _)| *r);
        let (first_row, last_row) = match rows.next() {
            Some(first) => (first, rows.last().unwrap_or(first) + 1),
            None => (0, 0),
        };
        let first_col = self.cells.keys().map(|(_, c)| *c).min().unwrap_or(0);
        let last_col = self
            .cells
            .keys()
            .map(|(_, c)| *c + 1)
            .max()
            .unwrap_or(0);

        Payload::new()
            .u32(first_row)
            .u32(last_row)
            .u16(first_col)
            .u16(last_col)
            .u16(0)
            .record(DIMENSIONS)
    }

    fn row_record(&self, row: u32) -> Record {
        let mut cols = self
            .cells
            .range((row, 0)..=(row, u16::MAX))
            .map(|(&(_, col), _)| col);
        let first = cols.next();
        let last = cols.last().or(first);

        match self.rows.get(&row) {
            Some(existing) if existing.data.len() >= 6 => {
                let mut record = existing.clone();
                if let (Some(first), Some(last)) = (first, last) {
                    record.data[2..4].copy_from_slice(&first.to_le_bytes());
                    record.data[4..6].copy_from_slice(&(last + 1).to_le_bytes());
                }
                record
            }
            _ => Payload::new()
                .u16(row as u16)
                .u16(first.unwrap_or(0))
                .u16(last.map(|c| c + 1).unwrap_or(0))
                .u16(0x00FF)
                .u16(0)
                .u16(0)
                .u16(0x0100)
                .u16(0x000F)
                .record(ROW),
        }
    }

    /// After the window settings when present, otherwise before `EOF`.
    fn default_merge_slot(&self) -> usize {
        let mut depth = 0i32;
        let mut slot = None;
        for (i, record) in self.tail.iter().enumerate() {
            match record.id {
                BOF => depth += 1,
                EOF => depth -= 1,
                WINDOW2 | PANE | SELECTION | SCL if depth == 0 => slot = Some(i + 1),
                _ => {}
            }
        }
        slot.unwrap_or(self.tail.len().saturating_sub(1))
    }

    fn merge_records(&self) -> Vec<Record> {
        self.merged
            .chunks(MAX_MERGES_PER_RECORD)
            .map(|chunk| {
                let mut payload = Payload::new().u16(chunk.len() as u16);
                for range in chunk {
                    payload = payload
                        .u16(range.first_row as u16)
                        .u16(range.last_row as u16)
                        .u16(range.first_col as u16)
                        .u16(range.last_col as u16);
                }
                payload.record(MERGEDCELLS)
            })
            .collect()
    }
}

fn check_bounds(row: u32, col: u32) -> Result<(), ReadError> {
    if row >= MAX_ROWS || col >= MAX_COLS {
        return Err(ReadError::Biff(format!(
            "cell ({}, {}) is outside the {}x{} legacy grid",
            row, col, MAX_ROWS, MAX_COLS
        )));
    }
    Ok(())
}

fn is_cell(id: u16) -> bool {
    matches!(
        id,
        LABELSST | LABEL | RSTRING | NUMBER | RK | MULRK | BLANK | MULBLANK | BOOLERR | FORMULA
    )
}

fn is_cell_table(id: u16) -> bool {
    id == ROW || id == DBCELL || is_cell(id)
}

fn attach_to_formula(cell: &mut LegacyCell, record: Record) -> Result<(), ReadError> {
    if let CellContent::Formula { records, cached } = &mut cell.content {
        if record.id == STRING {
            let (text, _) = read_unicode_string(&record.data, 0)?;
            *cached = CellValue::Text(text);
        }
        records.push(record);
    }
    Ok(())
}

fn decode_cells(
    record: &Record,
    strings: &mut SharedStrings,
) -> Result<Vec<(u32, u16, LegacyCell)>, ReadError> {
    let data = &record.data;
    let row = u16_at(data, 0)? as u32;
    let col = u16_at(data, 2)?;

    let single = |content: CellContent| -> Result<Vec<(u32, u16, LegacyCell)>, ReadError> {
        let xf = u16_at(data, 4)?;
        Ok(vec![(row, col, LegacyCell { xf, content })])
    };

    match record.id {
        LABELSST => single(CellContent::Shared(u32_at(data, 6)?)),
        LABEL | RSTRING => {
            let (text, _) = read_unicode_string(data, 6)?;
            single(CellContent::Shared(strings.intern(&text)))
        }
        NUMBER => single(CellContent::Number(f64_at(data, 6)?)),
        RK => single(CellContent::Number(decode_rk(u32_at(data, 6)?))),
        BLANK => single(CellContent::Blank),
        BOOLERR => {
            let value = *data.get(6).unwrap_or(&0);
            let is_error = data.get(7).is_some_and(|&b| b != 0);
            single(if is_error {
                CellContent::Error(value)
            } else {
                CellContent::Bool(value != 0)
            })
        }
        FORMULA => single(CellContent::Formula {
            cached: formula_cached_value(data)?,
            records: vec![record.clone()],
        }),
        MULRK => {
            let count = data.len().saturating_sub(6) / 6;
            (0..count)
                .map(|i| {
                    let at = 4 + i * 6;
                    Ok((
                        row,
                        column_at(col, i)?,
                        LegacyCell {
                            xf: u16_at(data, at)?,
                            content: CellContent::Number(decode_rk(u32_at(data, at + 2)?)),
                        },
                    ))
                })
                .collect()
        }
        MULBLANK => {
            let count = data.len().saturating_sub(6) / 2;
            (0..count)
                .map(|i| {
                    Ok((
                        row,
                        column_at(col, i)?,
                        LegacyCell {
                            xf: u16_at(data, 4 + i * 2)?,
                            content: CellContent::Blank,
                        },
                    ))
                })
                .collect()
        }
        other => Err(ReadError::Biff(format!("not a cell record: 0x{:04X}", other))),
    }
}

/// Column `offset` cells right of `first` in a MULRK/MULBLANK run.
fn column_at(first: u16, offset: usize) -> Result<u16, ReadError> {
    u16::try_from(offset)
        .ok()
        .and_then(|offset| first.checked_add(offset))
        .ok_or_else(|| ReadError::Biff(format!("cell run from column {} overflows", first)))
}

fn formula_cached_value(data: &[u8]) -> Result<CellValue, ReadError> {
    let raw = data
        .get(6..14)
        .ok_or_else(|| ReadError::Biff("FORMULA record truncated".to_string()))?;
    if raw[6] == 0xFF && raw[7] == 0xFF {
        return Ok(match raw[0] {
            // String result follows in a STRING record
            0 | 3 => CellValue::Text(String::new()),
            1 => CellValue::Bool(raw[2] != 0),
            2 => CellValue::Error(raw[2]),
            _ => CellValue::Empty,
        });
    }
    f64_at(data, 6).map(CellValue::Number)
}

fn decode_merges(record: &Record) -> Result<Vec<MergedRange>, ReadError> {
    let count = u16_at(&record.data, 0)? as usize;
    (0..count)
        .map(|i| {
            let at = 2 + i * 8;
            Ok(MergedRange::new(
                u16_at(&record.data, at)? as u32,
                u16_at(&record.data, at + 2)? as u32,
                u16_at(&record.data, at + 4)? as u32,
                u16_at(&record.data, at + 6)? as u32,
            ))
        })
        .collect()
}

fn encode_cell(row: u32, col: u16, cell: &LegacyCell, out: &mut Vec<Record>) {
    let base = Payload::new().u16(row as u16).u16(col).u16(cell.xf);
    match &cell.content {
        CellContent::Blank => out.push(base.record(BLANK)),
        CellContent::Shared(index) => out.push(base.u32(*index).record(LABELSST)),
        CellContent::Number(value) => out.push(base.f64(*value).record(NUMBER)),
        CellContent::Bool(value) => out.push(base.u8(*value as u8).u8(0).record(BOOLERR)),
        CellContent::Error(code) => out.push(base.u8(*code).u8(1).record(BOOLERR)),
        CellContent::Formula { records, .. } => out.extend(records.iter().cloned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substream(body: Vec<Record>) -> Vec<Record> {
        let mut records = Worksheet::empty(true).head;
        records.extend(body);
        records.push(Record::new(EOF, Vec::new()));
        records
    }

    #[test]
    fn test_decode_cell_records() {
        let mut strings = SharedStrings::new();
        strings.intern("общая");
        let records = substream(vec![
            Payload::new().u32(0).u32(2).u16(0).u16(4).u16(0).record(DIMENSIONS),
            Payload::new().u16(0).u16(0).u16(20).u32(0).record(LABELSST),
            Payload::new().u16(0).u16(1).u16(21).bytes(&unicode_string("своя").unwrap()).record(LABEL),
            Payload::new().u16(0).u16(2).u16(15).u32((3 << 2) | 0x02).record(RK),
            Payload::new()
                .u16(1)
                .u16(0)
                .u16(15)
                .u32((1 << 2) | 0x02)
                .u16(16)
                .u32((2 << 2) | 0x02)
                .u16(1)
                .record(MULRK),
            Payload::new().u16(1).u16(2).u16(17).u16(18).u16(3).record(MULBLANK),
            Payload::new().u16(1).u16(4).u16(15).u8(0x07).u8(1).record(BOOLERR),
            Record::new(DBCELL, vec![0; 6]),
        ]);

        let sheet = Worksheet::parse(records, &mut strings).unwrap();

        assert_eq!(sheet.cell(0, 0).unwrap().content, CellContent::Shared(0));
        assert_eq!(sheet.cell(0, 1).unwrap().content, CellContent::Shared(1));
        assert_eq!(sheet.cell(0, 1).unwrap().xf, 21);
        assert_eq!(strings.get(1), Some("своя"));
        assert_eq!(sheet.cell(0, 2).unwrap().content, CellContent::Number(3.0));
        assert_eq!(sheet.cell(1, 1).unwrap().content, CellContent::Number(2.0));
        assert_eq!(sheet.cell(1, 1).unwrap().xf, 16);
        assert_eq!(sheet.cell(1, 3).unwrap().xf, 18);
        assert_eq!(sheet.cell(1, 4).unwrap().content, CellContent::Error(0x07));
        assert_eq!(sheet.cells.len(), 8);
    }

    #[test]
    fn test_cell_run_past_last_column_is_rejected() {
        let mut strings = SharedStrings::new();
        let records = substream(vec![
            Payload::new().u16(0).u16(u16::MAX).u16(15).u16(15).u16(u16::MAX).record(MULBLANK),
        ]);

        let err = Worksheet::parse(records, &mut strings).unwrap_err();
        assert!(matches!(err, ReadError::Biff(_)));

        let records = substream(vec![
            Payload::new().u16(0).u16(u16::MAX - 1).u16(15).u16(16).u16(u16::MAX).record(MULBLANK),
        ]);
        let sheet = Worksheet::parse(records, &mut strings).unwrap();
        assert_eq!(sheet.cell(0, u16::MAX as u32).unwrap().xf, 16);
    }

    #[test]
    fn test_formula_keeps_trailing_records() {
        let mut strings = SharedStrings::new();
        let formula = Payload::new()
            .u16(0)
            .u16(0)
            .u16(15)
            .bytes(&[0, 0, 0, 0, 0, 0, 0xFF, 0xFF])
            .u16(0)
            .u32(0)
            .u16(0)
            .record(FORMULA);
        let string = Payload::new().bytes(&unicode_string("итог").unwrap()).record(STRING);
        let records = substream(vec![
            Payload::new().u32(0).u32(1).u16(0).u16(1).u16(0).record(DIMENSIONS),
            formula.clone(),
            string.clone(),
        ]);

        let sheet = Worksheet::parse(records, &mut strings).unwrap();
        match &sheet.cell(0, 0).unwrap().content {
            CellContent::Formula { records, cached } => {
                assert_eq!(records, &vec![formula, string]);
                assert_eq!(cached, &CellValue::Text("итог".to_string()));
            }
            other => panic!("expected formula, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_and_merge() {
        let mut strings = SharedStrings::new();
        let mut sheet = Worksheet::empty(true);
        let index = strings.intern("шапка");
        sheet.set(2, 1, CellContent::Shared(index)).unwrap();
        sheet.merge(MergedRange::new(2, 3, 1, 2)).unwrap();
        sheet.set(40, 0, CellContent::Number(1.5)).unwrap();

        let records = sheet.to_records();
        let ids: Vec<u16> = records.iter().map(|r| r.id).collect();
        let merge_at = ids.iter().position(|&id| id == MERGEDCELLS).unwrap();
        let window_at = ids.iter().position(|&id| id == WINDOW2).unwrap();
        assert!(merge_at > window_at);
        assert_eq!(*ids.last().unwrap(), EOF);

        let parsed = Worksheet::parse(records, &mut strings).unwrap();
        assert_eq!(parsed.merged, vec![MergedRange::new(2, 3, 1, 2)]);
        assert_eq!(parsed.cell(2, 1).unwrap().content, CellContent::Shared(index));
        assert_eq!(parsed.cell(3, 2).unwrap().content, CellContent::Blank);
        assert_eq!(parsed.cell(40, 0).unwrap().content, CellContent::Number(1.5));
        assert_eq!(parsed.rows.len(), 3);
    }

    #[test]
    fn test_set_keeps_style() {
        let mut sheet = Worksheet::empty(false);
        sheet.cells.insert(
            (0, 0),
            LegacyCell {
                xf: 33,
                content: CellContent::Blank,
            },
        );
        sheet.set(0, 0, CellContent::Number(1.0)).unwrap();
        assert_eq!(sheet.cell(0, 0).unwrap().xf, 33);
        assert_eq!(sheet.cell(0, 0).unwrap().content, CellContent::Number(1.0));
        assert!(sheet.set(0, 300, CellContent::Blank).is_err());
    }
}
