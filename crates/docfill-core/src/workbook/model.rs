//! Format-neutral cell and range types shared by both workbook formats.

use std::fmt;

/// Value of one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Error code as stored in legacy workbooks (`#DIV/0!` is `0x07`).
    Error(u8),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Error display strings and their legacy codes.
pub const ERROR_CODES: [(u8, &str); 7] = [
    (0x00, "#NULL!"),
    (0x07, "#DIV/0!"),
    (0x0F, "#VALUE!"),
    (0x17, "#REF!"),
    (0x1D, "#NAME?"),
    (0x24, "#NUM!"),
    (0x2A, "#N/A"),
];

pub fn error_name(code: u8) -> &'static str {
    ERROR_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or("#N/A")
}

pub fn error_code(name: &str) -> u8 {
    ERROR_CODES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
        .unwrap_or(0x2A)
}

/// A non-empty cell as listed by [`SpreadsheetBook::cells`](super::SpreadsheetBook::cells).
#[derive(Debug, Clone, PartialEq)]
pub struct CellEntry {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
    /// The value is the cached result of a formula.
    pub formula: bool,
}

/// A merged rectangle, zero-indexed and inclusive. Only the top-left cell
/// carries a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergedRange {
    pub first_row: u32,
    pub last_row: u32,
    pub first_col: u32,
    pub last_col: u32,
}

impl MergedRange {
    pub fn new(first_row: u32, last_row: u32, first_col: u32, last_col: u32) -> Self {
        Self {
            first_row,
            last_row,
            first_col,
            last_col,
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    /// Parse an A1 range such as `B2:D4`.
    pub fn from_a1(range: &str) -> Option<Self> {
        let (start, end) = range.split_once(':').unwrap_or((range, range));
        let (first_row, first_col) = parse_a1(start)?;
        let (last_row, last_col) = parse_a1(end)?;
        Some(Self::new(first_row, last_row, first_col, last_col))
    }
}

impl fmt::Display for MergedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            a1(self.first_row, self.first_col),
            a1(self.last_row, self.last_col)
        )
    }
}

/// Longest sheet name either workbook format accepts.
pub const MAX_SHEET_NAME: usize = 31;

/// `name` cut to [`MAX_SHEET_NAME`] characters and made distinct from
/// `existing` (compared case-insensitively) with a `~N` suffix.
pub fn unique_sheet_name(name: &str, existing: &[String]) -> String {
    let taken = |candidate: &str| {
        existing
            .iter()
            .any(|e| e.to_lowercase() == candidate.to_lowercase())
    };

    let base: String = name.chars().take(MAX_SHEET_NAME).collect();
    if !taken(&base) {
        return base;
    }
    let mut n = 1usize;
    loop {
        let suffix = format!("~{}", n);
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        let candidate: String = name.chars().take(keep).chain(suffix.chars()).collect();
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// A1 reference of a zero-indexed cell.
pub fn a1(row: u32, col: u32) -> String {
    let mut letters = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect::<String>() + &(row + 1).to_string()
}

/// Zero-indexed (row, col) of an A1 reference. `$` markers are ignored.
pub fn parse_a1(reference: &str) -> Option<(u32, u32)> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}
