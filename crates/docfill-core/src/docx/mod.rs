//! Word-processor documents (`.docx`).
//!
//! The main document part is held as a list of XML events so that a filled
//! template serializes back with every element and attribute it came with.
//! All other package parts are carried through untouched.

mod body;
mod runs;

pub use body::{Table, WordBody};

use quick_xml::events::Event;
use quick_xml::Writer;
use tracing::debug;

use crate::error::ReadError;
use crate::package::{attribute, is_element, parse_events, text_of, Package};

/// Main document part of a WordprocessingML package.
pub const DOCUMENT_PART: &str = "word/document.xml";

/// A loaded `.docx` document.
#[derive(Debug, Clone)]
pub struct WordDocument {
    package: Package,
    events: Vec<Event<'static>>,
}

impl WordDocument {
    /// Load a document from the bytes of a `.docx` file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReadError> {
        let package = Package::from_bytes(data)?;
        let xml = package.get_str(DOCUMENT_PART)?;
        let events = parse_events(xml)?;

        debug!("Loaded {} with {} XML events", DOCUMENT_PART, events.len());
        Ok(Self { package, events })
    }

    /// Structural view: body-level paragraphs and tables.
    pub fn body(&self) -> WordBody {
        body::read_body(&self.events)
    }

    /// Serialize the document, including any rewritten runs.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReadError> {
        let mut writer = Writer::new(Vec::new());
        for event in &self.events {
            writer.write_event(event.clone())?;
        }

        let mut package = self.package.clone();
        package.set(DOCUMENT_PART, writer.into_inner());
        package.to_bytes()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Minimal `.docx` packages for tests.

    use crate::package::Package;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

    /// A paragraph holding one run per text.
    pub fn paragraph(runs: &[&str]) -> String {
        let runs: String = runs
            .iter()
            .map(|t| format!(r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r>"#, t))
            .collect();
        format!("<w:p>{}</w:p>", runs)
    }

    /// A table whose cells each hold a single one-run paragraph.
    pub fn table(rows: &[&[&str]]) -> String {
        let rows: String = rows
            .iter()
            .map(|cells| {
                let cells: String = cells
                    .iter()
                    .map(|c| format!("<w:tc><w:tcPr/>{}</w:tc>", paragraph(&[c])))
                    .collect();
                format!("<w:tr>{}</w:tr>", cells)
            })
            .collect();
        format!("<w:tbl><w:tblPr/>{}</w:tbl>", rows)
    }

    /// Wrap body XML into a complete package.
    pub fn docx(body: &str) -> Vec<u8> {
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}<w:sectPr/></w:body></w:document>"#,
            body
        );
        let mut package = Package::new();
        package.set("[Content_Types].xml", CONTENT_TYPES.as_bytes().to_vec());
        package.set("word/document.xml", document.into_bytes());
        package.set("word/styles.xml", b"<w:styles/>".to_vec());
        package.to_bytes().unwrap()
    }
}
