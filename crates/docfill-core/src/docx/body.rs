//! Structural view of a document body: paragraphs and tables as plain text.

use quick_xml::events::Event;

use super::{attribute, is_element, text_of};

/// Body-level paragraphs and tables of a document, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordBody {
    /// Text of every body-level paragraph.
    pub paragraphs: Vec<String>,
    /// Every body-level table.
    pub tables: Vec<Table>,
}

impl WordBody {
    /// Paragraphs followed by table rows (cells tab-joined), newline-separated.
    pub fn to_text(&self) -> String {
        let mut lines: Vec<String> = self.paragraphs.clone();
        for table in &self.tables {
            for row in &table.rows {
                lines.push(row.join("\t"));
            }
        }
        lines.join("\n")
    }
}

/// A table laid out on its column grid.
///
/// A cell spanning several grid columns appears in each of them, and a
/// vertically merged continuation cell repeats the text of the cell above,
/// so coordinates address the visual grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Text of a cell, `None` when out of range.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }
}

pub(super) fn read_body(events: &[Event<'static>]) -> WordBody {
    let mut reader = BodyReader { events, pos: 0 };
    reader.read_body()
}

struct BodyReader<'a> {
    events: &'a [Event<'static>],
    pos: usize,
}

struct RawCell {
    text: String,
    span: usize,
    continues: bool,
}

impl<'a> BodyReader<'a> {
    fn next(&mut self) -> Option<&'a Event<'static>> {
        let event = self.events.get(self.pos)?;
        self.pos += 1;
        Some(event)
    }

    fn read_body(&mut self) -> WordBody {
        let mut body = WordBody::default();

        while let Some(event) = self.next() {
            if matches!(event, Event::Start(e) if is_element(e, b"w:body")) {
                break;
            }
        }

        while let Some(event) = self.next() {
            match event {
                Event::Start(e) if is_element(e, b"w:p") => {
                    body.paragraphs.push(self.read_paragraph());
                }
                Event::Start(e) if is_element(e, b"w:tbl") => {
                    body.tables.push(self.read_table());
                }
                Event::Start(_) => self.skip_element(),
                Event::Empty(e) if is_element(e, b"w:p") => body.paragraphs.push(String::new()),
                Event::End(e) if e.name().as_ref() == b"w:body" => break,
                _ => {}
            }
        }

        body
    }

    /// Called right after `<w:p>`; consumes through `</w:p>`.
    ///
    /// Tabs and breaks count only as run content, so tab-stop definitions
    /// in `w:pPr/w:tabs` add nothing.
    fn read_paragraph(&mut self) -> String {
        let mut text = String::new();
        let mut open: Vec<&[u8]> = Vec::new();

        while let Some(event) = self.next() {
            match event {
                Event::Start(e) => open.push(e.name().into_inner()),
                Event::End(_) => {
                    if open.pop().is_none() {
                        break;
                    }
                }
                Event::Empty(e) if open.last() == Some(&b"w:r".as_slice()) => {
                    match e.name().as_ref() {
                        b"w:tab" => text.push('\t'),
                        b"w:br" | b"w:cr" => text.push('\n'),
                        _ => {}
                    }
                }
                Event::Text(t) if open.last() == Some(&b"w:t".as_slice()) => {
                    text.push_str(&text_of(t))
                }
                _ => {}
            }
        }

        text
    }

    /// Called right after `<w:tbl>`; consumes through `</w:tbl>`.
    fn read_table(&mut self) -> Table {
        let mut table = Table::default();

        while let Some(event) = self.next() {
            match event {
                Event::Start(e) if is_element(e, b"w:tr") => {
                    let row = self.read_row(&table.rows);
                    table.rows.push(row);
                }
                Event::Start(_) => self.skip_element(),
                Event::End(e) if e.name().as_ref() == b"w:tbl" => break,
                _ => {}
            }
        }

        table
    }

    fn read_row(&mut self, previous: &[Vec<String>]) -> Vec<String> {
        let mut cells: Vec<String> = Vec::new();

        while let Some(event) = self.next() {
            match event {
                Event::Start(e) if is_element(e, b"w:tc") => {
                    let cell = self.read_cell();
                    for _ in 0..cell.span.max(1) {
                        let text = if cell.continues {
                            previous
                                .last()
                                .and_then(|row| row.get(cells.len()))
                                .cloned()
                                .unwrap_or_default()
                        } else {
                            cell.text.clone()
                        };
                        cells.push(text);
                    }
                }
                Event::Start(_) => self.skip_element(),
                Event::End(e) if e.name().as_ref() == b"w:tr" => break,
                _ => {}
            }
        }

        cells
    }

    fn read_cell(&mut self) -> RawCell {
        let mut paragraphs: Vec<String> = Vec::new();
        let mut span = 1;
        let mut continues = false;

        while let Some(event) = self.next() {
            match event {
                Event::Start(e) if is_element(e, b"w:tcPr") => {
                    (span, continues) = self.read_cell_properties();
                }
                Event::Start(e) if is_element(e, b"w:p") => paragraphs.push(self.read_paragraph()),
                Event::Empty(e) if is_element(e, b"w:p") => paragraphs.push(String::new()),
                // Nested tables do not contribute to the cell's own text
                Event::Start(_) => self.skip_element(),
                Event::End(e) if e.name().as_ref() == b"w:tc" => break,
                _ => {}
            }
        }

        RawCell {
            text: paragraphs.join("\n"),
            span,
            continues,
        }
    }

    fn read_cell_properties(&mut self) -> (usize, bool) {
        let mut span = 1;
        let mut continues = false;
        let mut depth = 1;

        while let Some(event) = self.next() {
            let start = match event {
                Event::Start(e) => {
                    depth += 1;
                    e
                }
                Event::Empty(e) => e,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    continue;
                }
                _ => continue,
            };

            match start.name().as_ref() {
                b"w:gridSpan" => {
                    span = attribute(start, b"w:val")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(1);
                }
                b"w:vMerge" => {
                    continues = attribute(start, b"w:val").is_none_or(|v| v == "continue");
                }
                _ => {}
            }
        }

        (span, continues)
    }

    /// Called right after a start tag; consumes through its end tag.
    fn skip_element(&mut self) {
        let mut depth = 1;
        while let Some(event) = self.next() {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::WordDocument;
    use super::*;

    #[test]
    fn test_paragraphs_and_tables() {
        let body = format!(
            "{}{}{}",
            paragraph(&["Договор-заявка ", "№ 5"]),
            table(&[&["a", "b"], &["c", "d"]]),
            paragraph(&["после"])
        );
        let doc = WordDocument::from_bytes(&docx(&body)).unwrap();
        let body = doc.body();

        assert_eq!(body.paragraphs, vec!["Договор-заявка № 5", "после"]);
        assert_eq!(body.tables.len(), 1);
        assert_eq!(body.tables[0].cell(1, 0), Some("c"));
        assert_eq!(body.tables[0].cell(2, 0), None);
        assert_eq!(body.tables[0].cell(0, 5), None);
    }

    #[test]
    fn test_tabs_breaks_and_multi_paragraph_cells() {
        let body = r#"<w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>one</w:t></w:r></w:p><w:p/><w:p><w:r><w:t>two</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#;
        let doc = WordDocument::from_bytes(&docx(body)).unwrap();
        let body = doc.body();

        assert_eq!(body.paragraphs, vec!["a\tb\nc"]);
        assert_eq!(body.tables[0].cell(0, 0), Some("one\n\ntwo"));
    }

    #[test]
    fn test_tab_stops_are_not_text() {
        let body = concat!(
            r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="4253"/><w:tab w:val="left" w:pos="7088"/></w:tabs></w:pPr>"#,
            r#"<w:r><w:t>Адрес загрузки</w:t></w:r><w:r><w:tab/><w:t>Адрес разгрузки</w:t></w:r></w:p>"#
        );
        let doc = WordDocument::from_bytes(&docx(body)).unwrap();
        assert_eq!(doc.body().paragraphs, vec!["Адрес загрузки\tАдрес разгрузки"]);
    }

    #[test]
    fn test_merged_cells_follow_the_grid() {
        let body = concat!(
            "<w:tbl>",
            r#"<w:tr><w:tc><w:tcPr><w:gridSpan w:val="2"/><w:vMerge w:val="restart"/></w:tcPr><w:p><w:r><w:t>wide</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>x</w:t></w:r></w:p></w:tc></w:tr>"#,
            r#"<w:tr><w:tc><w:tcPr><w:gridSpan w:val="2"/><w:vMerge/></w:tcPr><w:p/></w:tc><w:tc><w:p><w:r><w:t>y</w:t></w:r></w:p></w:tc></w:tr>"#,
            "</w:tbl>"
        );
        let doc = WordDocument::from_bytes(&docx(body)).unwrap();
        let table = &doc.body().tables[0];

        assert_eq!(table.rows[0], vec!["wide", "wide", "x"]);
        assert_eq!(table.rows[1], vec!["wide", "wide", "y"]);
    }

    #[test]
    fn test_nested_table_text_is_not_part_of_cell() {
        let inner = table(&[&["inner"]]);
        let body = format!(
            "<w:tbl><w:tr><w:tc>{}{}</w:tc></w:tr></w:tbl>",
            paragraph(&["outer"]),
            inner
        );
        let doc = WordDocument::from_bytes(&docx(&body)).unwrap();
        let body = doc.body();
        assert_eq!(body.tables.len(), 1);
        assert_eq!(body.tables[0].cell(0, 0), Some("outer"));
    }

    #[test]
    fn test_to_text() {
        let body = WordBody {
            paragraphs: vec!["p".to_string()],
            tables: vec![Table {
                rows: vec![vec!["a".to_string(), "b".to_string()]],
            }],
        };
        assert_eq!(body.to_text(), "p\na\tb");
    }
}
