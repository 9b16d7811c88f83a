//! SpreadsheetML workbooks (`.xlsx`).
//!
//! Sheets are read into a cell map for listing. Writes are collected per
//! sheet and applied on save by streaming the original sheet XML and
//! replacing or inserting only the touched `<c>` elements, so styles,
//! column widths, drawings and every other part survive untouched. Written
//! text goes in as inline strings; the shared string table is never
//! modified.

use std::collections::BTreeMap;

use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, trace, warn};

use crate::error::{DocfillError, ReadError, Result};
use crate::package::{attribute, is_element, rels_path, resolve_target, text_of, Package};

use super::model::{
    a1, error_code, error_name, parse_a1, unique_sheet_name, CellEntry, CellValue, MergedRange,
};
use super::{SpreadsheetBook, WorkbookFormat};

const CONTENT_TYPES: &str = "[Content_Types].xml";
const ROOT_RELS: &str = "_rels/.rels";
const SHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const REL_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";

/// Worksheet children that must come after `<mergeCells>`.
const AFTER_MERGE_CELLS: &[&[u8]] = &[
    b"phoneticPr",
    b"conditionalFormatting",
    b"dataValidations",
    b"hyperlinks",
    b"printOptions",
    b"pageMargins",
    b"pageSetup",
    b"headerFooter",
    b"rowBreaks",
    b"colBreaks",
    b"customProperties",
    b"cellWatches",
    b"ignoredErrors",
    b"smartTags",
    b"drawing",
    b"legacyDrawing",
    b"legacyDrawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ModernCell {
    value: CellValue,
    formula: bool,
}

#[derive(Debug, Clone)]
struct ModernSheet {
    name: String,
    part: String,
    hidden: bool,
    cells: BTreeMap<(u32, u32), ModernCell>,
    merged: Vec<MergedRange>,
    edits: BTreeMap<(u32, u32), CellValue>,
    new_merges: Vec<MergedRange>,
}

impl ModernSheet {
    fn new(name: String, part: String) -> Self {
        Self {
            name,
            part,
            hidden: false,
            cells: BTreeMap::new(),
            merged: Vec::new(),
            edits: BTreeMap::new(),
            new_merges: Vec::new(),
        }
    }
}

/// An `.xlsx` workbook.
#[derive(Debug, Clone)]
pub struct ModernWorkbook {
    package: Package,
    workbook_part: String,
    sheets: Vec<ModernSheet>,
}

impl ModernWorkbook {
    /// An empty workbook with a minimal stylesheet and no sheets.
    pub fn new() -> Self {
        let mut package = Package::new();
        package.set(CONTENT_TYPES, blank::CONTENT_TYPES.as_bytes().to_vec());
        package.set(ROOT_RELS, blank::ROOT_RELS.as_bytes().to_vec());
        package.set("xl/workbook.xml", blank::WORKBOOK.as_bytes().to_vec());
        package.set(
            "xl/_rels/workbook.xml.rels",
            blank::WORKBOOK_RELS.as_bytes().to_vec(),
        );
        package.set("xl/styles.xml", blank::STYLES.as_bytes().to_vec());

        Self {
            package,
            workbook_part: "xl/workbook.xml".to_string(),
            sheets: Vec::new(),
        }
    }

    /// Load a workbook from the bytes of an `.xlsx` file.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, ReadError> {
        let package = Package::from_bytes(data)?;

        let workbook_part = read_relationships(package.get_str(ROOT_RELS)?)?
            .into_iter()
            .find(|r| r.kind.ends_with("/officeDocument"))
            .map(|r| resolve_target("", &r.target))
            .ok_or_else(|| ReadError::MissingPart("officeDocument relationship".to_string()))?;

        let rels = read_relationships(package.get_str(&rels_path(&workbook_part))?)?;
        let target_of = |id: &str| {
            rels.iter()
                .find(|r| r.id == id)
                .map(|r| resolve_target(&workbook_part, &r.target))
        };

        let shared = match rels.iter().find(|r| r.kind.ends_with("/sharedStrings")) {
            Some(rel) => read_shared_strings(
                package.get_str(&resolve_target(&workbook_part, &rel.target))?,
            )?,
            None => Vec::new(),
        };

        let mut sheets = Vec::new();
        for (name, hidden, rel_id) in read_sheet_list(package.get_str(&workbook_part)?)? {
            let part = target_of(&rel_id).ok_or_else(|| ReadError::Malformed {
                part: workbook_part.clone(),
                reason: format!("sheet {:?} points to unknown relationship {}", name, rel_id),
            })?;
            let (cells, merged) = read_sheet(package.get_str(&part)?, &shared)?;
            trace!("Sheet {:?} ({}): {} cells", name, part, cells.len());

            let mut sheet = ModernSheet::new(name, part);
            sheet.hidden = hidden;
            sheet.cells = cells;
            sheet.merged = merged;
            sheets.push(sheet);
        }

        debug!(
            "Loaded workbook {} with {} sheets, {} shared strings",
            workbook_part,
            sheets.len(),
            shared.len()
        );
        Ok(Self {
            package,
            workbook_part,
            sheets,
        })
    }

    fn sheet_mut(&mut self, sheet: usize) -> Result<&mut ModernSheet> {
        self.sheets
            .get_mut(sheet)
            .ok_or_else(|| DocfillError::UnsupportedWorkbook(format!("no sheet at index {}", sheet)))
    }

    fn create_sheet_part(&mut self, name: &str) -> std::result::Result<String, ReadError> {
        let folder = match self.workbook_part.rfind('/') {
            Some(idx) => &self.workbook_part[..=idx],
            None => "",
        };
        let number = (1..)
            .find(|n| {
                let candidate = format!("{}worksheets/sheet{}.xml", folder, n);
                self.package.get(&candidate).is_none()
                    && self.sheets.iter().all(|s| s.part != candidate)
            })
            .unwrap_or(1);
        let part = format!("{}worksheets/sheet{}.xml", folder, number);
        let target = format!("worksheets/sheet{}.xml", number);

        let rels_part = rels_path(&self.workbook_part);
        let rels_xml = self.package.get_str(&rels_part)?.to_string();
        let rel_id = next_id(
            read_relationships(&rels_xml)?.iter().map(|r| r.id.as_str()),
            "rId",
        );
        let rels_xml = insert_before(
            &rels_xml,
            "</Relationships>",
            &format!(
                r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
                rel_id, REL_WORKSHEET, target
            ),
            &rels_part,
        )?;

        let workbook_xml = self
            .package
            .get_str(&self.workbook_part)?
            .replace("<sheets/>", "<sheets></sheets>");
        let sheet_id = max_sheet_id(&workbook_xml)? + 1;
        let workbook_xml = insert_before(
            &workbook_xml,
            "</sheets>",
            &format!(
                r#"<sheet name="{}" sheetId="{}" r:id="{}"/>"#,
                escape(name),
                sheet_id,
                rel_id
            ),
            &self.workbook_part,
        )?;

        let types_xml = insert_before(
            self.package.get_str(CONTENT_TYPES)?,
            "</Types>",
            &format!(
                r#"<Override PartName="/{}" ContentType="{}"/>"#,
                part, SHEET_CONTENT_TYPE
            ),
            CONTENT_TYPES,
        )?;

        self.package.set(&rels_part, rels_xml.into_bytes());
        let workbook_part = self.workbook_part.clone();
        self.package.set(&workbook_part, workbook_xml.into_bytes());
        self.package.set(CONTENT_TYPES, types_xml.into_bytes());
        self.package.set(&part, blank::WORKSHEET.as_bytes().to_vec());
        Ok(part)
    }
}

impl Default for ModernWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl SpreadsheetBook for ModernWorkbook {
    fn format(&self) -> WorkbookFormat {
        WorkbookFormat::Modern
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn cells(&self, sheet: usize) -> Vec<CellEntry> {
        let Some(sheet) = self.sheets.get(sheet) else {
            return Vec::new();
        };
        sheet
            .cells
            .iter()
            .filter(|(_, cell)| !cell.value.is_empty())
            .map(|(&(row, col), cell)| CellEntry {
                row,
                col,
                value: cell.value.clone(),
                formula: cell.formula,
            })
            .collect()
    }

    fn merged_ranges(&self, sheet: usize) -> Vec<MergedRange> {
        self.sheets
            .get(sheet)
            .map(|s| s.merged.clone())
            .unwrap_or_default()
    }

    fn add_sheet(&mut self, name: &str) -> Result<usize> {
        let name = unique_sheet_name(name, &self.sheet_names());
        let part = self.create_sheet_part(&name)?;
        self.sheets.push(ModernSheet::new(name, part));
        Ok(self.sheets.len() - 1)
    }

    fn write_cell(&mut self, sheet: usize, row: u32, col: u32, value: CellValue) -> Result<()> {
        let sheet = self.sheet_mut(sheet)?;
        sheet.cells.insert(
            (row, col),
            ModernCell {
                value: value.clone(),
                formula: false,
            },
        );
        sheet.edits.insert((row, col), value);
        Ok(())
    }

    fn write_merge(&mut self, sheet: usize, range: MergedRange, value: CellValue) -> Result<()> {
        self.write_cell(sheet, range.first_row, range.first_col, value)?;
        let sheet = self.sheet_mut(sheet)?;
        if !sheet.merged.contains(&range) {
            sheet.merged.push(range);
            sheet.new_merges.push(range);
        }
        Ok(())
    }

    fn reveal_sheets(&mut self) -> usize {
        let revealed = self.sheets.iter().filter(|s| s.hidden).count();
        if revealed == 0 {
            return 0;
        }
        let Ok(xml) = self.package.get_str(&self.workbook_part) else {
            return 0;
        };
        match strip_sheet_state(xml) {
            Ok(rewritten) => {
                let part = self.workbook_part.clone();
                self.package.set(&part, rewritten);
                for sheet in &mut self.sheets {
                    sheet.hidden = false;
                }
                debug!("Revealed {} hidden sheets", revealed);
                revealed
            }
            Err(e) => {
                warn!("Could not reveal hidden sheets: {}", e);
                0
            }
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut package = self.package.clone();
        for sheet in &self.sheets {
            if sheet.edits.is_empty() && sheet.new_merges.is_empty() {
                continue;
            }
            let xml = package.get_str(&sheet.part)?;
            let rewritten = rewrite_sheet(xml, &sheet.edits, &sheet.new_merges)?;
            trace!(
                "Rewrote {} ({} cells, {} new merges)",
                sheet.part,
                sheet.edits.len(),
                sheet.new_merges.len()
            );
            package.set(&sheet.part, rewritten);
        }
        Ok(package.to_bytes()?)
    }
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

fn read_relationships(xml: &str) -> std::result::Result<Vec<Relationship>, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"Relationship" => {
                rels.push(Relationship {
                    id: attribute(&e, b"Id").unwrap_or_default(),
                    kind: attribute(&e, b"Type").unwrap_or_default(),
                    target: attribute(&e, b"Target").unwrap_or_default(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// `(name, hidden, relationship id)` of every sheet in `workbook.xml`.
fn read_sheet_list(xml: &str) -> std::result::Result<Vec<(String, bool, String)>, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"sheet" => {
                let mut name = String::new();
                let mut hidden = false;
                let mut rel_id = String::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = attr.key;
                    let value = attr.unescape_value()?.into_owned();
                    match (key.prefix().is_some(), key.local_name().as_ref()) {
                        (false, b"name") => name = value,
                        (false, b"state") => hidden = value != "visible",
                        (true, b"id") => rel_id = value,
                        _ => {}
                    }
                }
                sheets.push((name, hidden, rel_id));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn max_sheet_id(xml: &str) -> std::result::Result<u32, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut max = 0;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"sheet" => {
                let id = attribute(&e, b"sheetId")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                max = max.max(id);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(max)
}

fn next_id<'a>(existing: impl Iterator<Item = &'a str>, prefix: &str) -> String {
    let taken: Vec<&str> = existing.collect();
    (1..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|id| !taken.contains(&id.as_str()))
        .unwrap_or_else(|| format!("{}0", prefix))
}

fn insert_before(
    xml: &str,
    closing: &str,
    fragment: &str,
    part: &str,
) -> std::result::Result<String, ReadError> {
    let at = xml.rfind(closing).ok_or_else(|| ReadError::Malformed {
        part: part.to_string(),
        reason: format!("no {}", closing),
    })?;
    Ok(format!("{}{}{}", &xml[..at], fragment, &xml[at..]))
}

fn read_shared_strings(xml: &str) -> std::result::Result<Vec<String>, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = !in_phonetic,
                _ => {}
            },
            Event::Empty(e) if local_name(e.name().as_ref()) == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => {
                if let Some(current) = current.as_mut() {
                    current.push_str(&text_of(&t));
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"si" => strings.extend(current.take()),
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

#[derive(Default)]
struct PendingCell {
    row: u32,
    col: u32,
    kind: Option<String>,
    raw: Option<String>,
    inline: String,
    formula: bool,
}

impl PendingCell {
    fn value(&self, shared: &[String]) -> CellValue {
        let raw = self.raw.as_deref();
        match (self.kind.as_deref(), raw) {
            (Some("inlineStr"), _) => CellValue::Text(self.inline.clone()),
            (_, None) => CellValue::Empty,
            (Some("s"), Some(raw)) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i))
                .map(|s| CellValue::Text(s.clone()))
                .unwrap_or(CellValue::Empty),
            (Some("str"), Some(raw)) => CellValue::Text(raw.to_string()),
            (Some("b"), Some(raw)) => CellValue::Bool(raw.trim() == "1"),
            (Some("e"), Some(raw)) => CellValue::Error(error_code(raw.trim())),
            (_, Some(raw)) => raw
                .trim()
                .parse::<f64>()
                .map(CellValue::Number)
                .unwrap_or_else(|_| CellValue::Text(raw.to_string())),
        }
    }
}

type SheetContent = (BTreeMap<(u32, u32), ModernCell>, Vec<MergedRange>);

fn read_sheet(xml: &str, shared: &[String]) -> std::result::Result<SheetContent, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut cells = BTreeMap::new();
    let mut merged = Vec::new();
    let mut grid = GridCursor::default();
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) | Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"row" => {
                    grid.enter_row(e);
                }
                b"c" => {
                    let (row, col) = grid.enter_cell(e);
                    let pending = PendingCell {
                        row,
                        col,
                        kind: attribute(e, b"t"),
                        ..PendingCell::default()
                    };
                    if matches!(event, Event::Start(_)) {
                        cell = Some(pending);
                    }
                }
                b"v" => in_value = matches!(event, Event::Start(_)),
                b"f" => {
                    if let Some(cell) = cell.as_mut() {
                        cell.formula = true;
                    }
                }
                b"rPh" => in_phonetic = matches!(event, Event::Start(_)),
                b"t" => in_text = matches!(event, Event::Start(_)) && !in_phonetic,
                b"mergeCell" => {
                    if let Some(range) = attribute(e, b"ref").and_then(|r| MergedRange::from_a1(&r)) {
                        merged.push(range);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some(cell) = cell.as_mut() {
                    if in_value {
                        cell.raw.get_or_insert_with(String::new).push_str(&text_of(t));
                    } else if in_text {
                        cell.inline.push_str(&text_of(t));
                    }
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"c" => {
                    if let Some(done) = cell.take() {
                        let value = done.value(shared);
                        if !value.is_empty() || done.formula {
                            cells.insert(
                                (done.row, done.col),
                                ModernCell {
                                    value,
                                    formula: done.formula,
                                },
                            );
                        }
                    }
                }
                b"v" => in_value = false,
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok((cells, merged))
}

/// Position tracking for rows and cells that may omit their `r` attribute.
#[derive(Default)]
struct GridCursor {
    next_row: u32,
    row: u32,
    next_col: u32,
}

impl GridCursor {
    fn enter_row(&mut self, e: &BytesStart<'_>) -> u32 {
        self.row = attribute(e, b"r")
            .and_then(|r| r.trim().parse::<u32>().ok())
            .and_then(|r| r.checked_sub(1))
            .unwrap_or(self.next_row);
        self.next_row = self.row + 1;
        self.next_col = 0;
        self.row
    }

    fn enter_cell(&mut self, e: &BytesStart<'_>) -> (u32, u32) {
        let (row, col) = attribute(e, b"r")
            .and_then(|r| parse_a1(&r))
            .unwrap_or((self.row, self.next_col));
        self.next_col = col + 1;
        (row, col)
    }
}

/// Apply cell edits and new merged ranges to one worksheet part.
fn rewrite_sheet(
    xml: &str,
    edits: &BTreeMap<(u32, u32), CellValue>,
    new_merges: &[MergedRange],
) -> std::result::Result<Vec<u8>, ReadError> {
    let mut pending: BTreeMap<u32, BTreeMap<u32, &CellValue>> = BTreeMap::new();
    for (&(row, col), value) in edits {
        pending.entry(row).or_default().insert(col, value);
    }

    let mut reader = Reader::from_str(xml);
    let mut out = SheetWriter {
        writer: Writer::new(Vec::new()),
        pending,
    };
    let mut grid = GridCursor::default();
    let mut current_row: Option<u32> = None;
    let mut depth = 0usize;
    let mut skipping = 0usize;
    let mut merges_written = new_merges.is_empty();

    loop {
        let event = reader.read_event()?;
        if skipping > 0 {
            match event {
                Event::Start(_) => skipping += 1,
                Event::End(_) => skipping -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e)
                if depth == 1
                    && !merges_written
                    && AFTER_MERGE_CELLS.contains(&local_name(e.name().as_ref())) =>
            {
                out.merge_block(new_merges, None)?;
                merges_written = true;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
                out.writer.write_event(event)?;
            }
            Event::Empty(ref e) if is_element(e, b"sheetData") => {
                out.writer.write_event(Event::Start(e.clone()))?;
                out.rows_before(u32::MAX)?;
                out.writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
            }
            Event::Start(ref e) if is_element(e, b"row") => {
                let row = grid.enter_row(e);
                out.rows_before(row)?;
                current_row = Some(row);
                depth += 1;
                out.writer.write_event(event)?;
            }
            Event::Empty(ref e) if is_element(e, b"row") => {
                let row = grid.enter_row(e);
                out.rows_before(row)?;
                if out.pending.contains_key(&row) {
                    out.writer.write_event(Event::Start(e.clone()))?;
                    out.cells_before(row, u32::MAX)?;
                    out.writer.write_event(Event::End(BytesEnd::new("row")))?;
                } else {
                    out.writer.write_event(event)?;
                }
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if is_element(e, b"c") && current_row.is_some() =>
            {
                let (row, col) = grid.enter_cell(e);
                out.cells_before(row, col)?;
                let replacement = out.pending.get_mut(&row).and_then(|cells| cells.remove(&col));
                match replacement {
                    Some(value) => {
                        let style = attribute(e, b"s");
                        write_cell(&mut out.writer, row, col, style.as_deref(), value)?;
                        if matches!(event, Event::Start(_)) {
                            skipping = 1;
                        }
                    }
                    None => {
                        if matches!(event, Event::Start(_)) {
                            depth += 1;
                        }
                        out.writer.write_event(event)?;
                    }
                }
            }
            Event::End(ref e) if e.name().as_ref() == b"row" => {
                if let Some(row) = current_row.take() {
                    out.cells_before(row, u32::MAX)?;
                }
                depth -= 1;
                out.writer.write_event(event)?;
            }
            Event::End(ref e) if e.name().as_ref() == b"sheetData" => {
                out.rows_before(u32::MAX)?;
                depth -= 1;
                out.writer.write_event(event)?;
            }
            Event::Start(ref e) if is_element(e, b"mergeCells") => {
                let existing: usize = attribute(e, b"count")
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let mut start = BytesStart::new("mergeCells");
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() != b"count" {
                        start.push_attribute(attr);
                    }
                }
                let count = (existing + new_merges.len()).to_string();
                start.push_attribute(("count", count.as_str()));
                depth += 1;
                out.writer.write_event(Event::Start(start))?;
            }
            Event::End(ref e) if e.name().as_ref() == b"mergeCells" => {
                for range in new_merges {
                    out.merge_cell(range)?;
                }
                merges_written = true;
                depth -= 1;
                out.writer.write_event(event)?;
            }
            Event::Empty(ref e) if is_element(e, b"mergeCells") => {
                out.merge_block(new_merges, Some(e))?;
                merges_written = true;
            }
            Event::End(_) if depth == 1 && !merges_written => {
                out.merge_block(new_merges, None)?;
                merges_written = true;
                depth -= 1;
                out.writer.write_event(event)?;
            }
            Event::Start(_) => {
                depth += 1;
                out.writer.write_event(event)?;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                out.writer.write_event(event)?;
            }
            other => out.writer.write_event(other)?,
        }
    }

    Ok(out.writer.into_inner())
}

struct SheetWriter<'v> {
    writer: Writer<Vec<u8>>,
    pending: BTreeMap<u32, BTreeMap<u32, &'v CellValue>>,
}

impl SheetWriter<'_> {
    /// Emit whole new rows numbered below `limit`.
    fn rows_before(&mut self, limit: u32) -> std::result::Result<(), ReadError> {
        let rows: Vec<u32> = self.pending.range(..limit).map(|(r, _)| *r).collect();
        for row in rows {
            let mut start = BytesStart::new("row");
            start.push_attribute(("r", (row + 1).to_string().as_str()));
            self.writer.write_event(Event::Start(start))?;
            self.cells_before(row, u32::MAX)?;
            self.writer.write_event(Event::End(BytesEnd::new("row")))?;
        }
        Ok(())
    }

    /// Emit new cells of `row` whose column is below `limit`.
    fn cells_before(&mut self, row: u32, limit: u32) -> std::result::Result<(), ReadError> {
        let Some(cells) = self.pending.get_mut(&row) else {
            return Ok(());
        };
        let cols: Vec<u32> = cells.range(..limit).map(|(c, _)| *c).collect();
        for col in cols {
            if let Some(value) = cells.remove(&col) {
                write_cell(&mut self.writer, row, col, None, value)?;
            }
        }
        if cells.is_empty() {
            self.pending.remove(&row);
        }
        Ok(())
    }

    fn merge_cell(&mut self, range: &MergedRange) -> std::result::Result<(), ReadError> {
        let mut start = BytesStart::new("mergeCell");
        start.push_attribute(("ref", range.to_string().as_str()));
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    fn merge_block(
        &mut self,
        ranges: &[MergedRange],
        original: Option<&BytesStart<'_>>,
    ) -> std::result::Result<(), ReadError> {
        let mut start = BytesStart::new("mergeCells");
        if let Some(original) = original {
            for attr in original.attributes().flatten() {
                if attr.key.as_ref() != b"count" {
                    start.push_attribute(attr);
                }
            }
        }
        start.push_attribute(("count", ranges.len().to_string().as_str()));
        self.writer.write_event(Event::Start(start))?;
        for range in ranges {
            self.merge_cell(range)?;
        }
        self.writer.write_event(Event::End(BytesEnd::new("mergeCells")))?;
        Ok(())
    }
}

fn write_cell(
    writer: &mut Writer<Vec<u8>>,
    row: u32,
    col: u32,
    style: Option<&str>,
    value: &CellValue,
) -> std::result::Result<(), ReadError> {
    let mut start = BytesStart::new("c");
    start.push_attribute(("r", a1(row, col).as_str()));
    if let Some(style) = style {
        start.push_attribute(("s", style));
    }

    let (kind, raw) = match value {
        CellValue::Empty => {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        CellValue::Text(text) => {
            start.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            let mut t = BytesStart::new("t");
            t.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
            writer.write_event(Event::End(BytesEnd::new("c")))?;
            return Ok(());
        }
        CellValue::Number(number) => (None, number.to_string()),
        CellValue::Bool(flag) => (Some("b"), if *flag { "1" } else { "0" }.to_string()),
        CellValue::Error(code) => (Some("e"), error_name(*code).to_string()),
    };

    if let Some(kind) = kind {
        start.push_attribute(("t", kind));
    }
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Start(BytesStart::new("v")))?;
    writer.write_event(Event::Text(BytesText::new(&raw)))?;
    writer.write_event(Event::End(BytesEnd::new("v")))?;
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

/// Drop the `state` attribute of every `<sheet>` so all sheets are visible.
fn strip_sheet_state(xml: &str) -> std::result::Result<Vec<u8>, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Empty(e) if local_name(e.name().as_ref()) == b"sheet" => {
                writer.write_event(Event::Empty(without_state(&e)))?;
            }
            Event::Start(e) if local_name(e.name().as_ref()) == b"sheet" => {
                writer.write_event(Event::Start(without_state(&e)))?;
            }
            event => writer.write_event(event)?,
        }
    }
    Ok(writer.into_inner())
}

fn without_state(e: &BytesStart<'_>) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut start = BytesStart::new(name);
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() != b"state" {
            start.push_attribute(attr);
        }
    }
    start
}

/// Parts of a freshly created workbook.
mod blank {
    pub const CONTENT_TYPES: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
        r#"<Default Extension="xml" ContentType="application/xml"/>"#,
        r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
        r#"</Types>"#
    );

    pub const ROOT_RELS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
        r#"</Relationships>"#
    );

    pub const WORKBOOK: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        r#"<sheets></sheets></workbook>"#
    );

    pub const WORKBOOK_RELS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        r#"</Relationships>"#
    );

    pub const STYLES: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>"#,
        r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
        r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
        r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
        r#"<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>"#,
        r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
        r#"</styleSheet>"#
    );

    pub const WORKSHEET: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<sheetData/></worksheet>"#
    );
}
