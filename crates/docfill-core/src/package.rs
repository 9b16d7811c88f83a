//! OOXML package (zip container) access shared by `.docx` and `.xlsx`.

use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use tracing::trace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::ReadError;

/// One file inside a package.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub data: Vec<u8>,
}

/// An opened package. Parts keep their original order so a rewritten
/// package lists entries the way the producer wrote them.
#[derive(Debug, Clone, Default)]
pub struct Package {
    parts: Vec<Part>,
}

impl Package {
    /// Create an empty package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every part of a zip container into memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReadError> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut parts = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            trace!("Read part {} ({} bytes)", file.name(), buf.len());
            parts.push(Part {
                name: file.name().to_string(),
                data: buf,
            });
        }

        Ok(Self { parts })
    }

    /// Raw bytes of a part.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    /// A part decoded as UTF-8.
    pub fn get_str(&self, name: &str) -> Result<&str, ReadError> {
        let data = self
            .get(name)
            .ok_or_else(|| ReadError::MissingPart(name.to_string()))?;
        std::str::from_utf8(data).map_err(|e| ReadError::Malformed {
            part: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Replace a part, appending it when it does not exist yet.
    pub fn set(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|p| p.name == name) {
            Some(part) => part.data = data,
            None => self.parts.push(Part {
                name: name.to_string(),
                data,
            }),
        }
    }

    /// Names of all parts.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// Serialize the package back into a zip container.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReadError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        // Fixed timestamps keep repeated saves byte-identical
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());

        for part in &self.parts {
            writer.start_file(part.name.as_str(), options)?;
            writer.write_all(&part.data)?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

/// Resolve a relationship target against the folder of the part that owns
/// the relationship (`xl/workbook.xml` + `worksheets/sheet1.xml`).
pub fn resolve_target(owner: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = match owner.rfind('/') {
        Some(idx) => owner[..idx].split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Path of the relationships part belonging to `part`.
pub fn rels_path(part: &str) -> String {
    match part.rfind('/') {
        Some(idx) => format!("{}/_rels/{}.rels", &part[..idx], &part[idx + 1..]),
        None => format!("_rels/{}.rels", part),
    }
}

/// Every event of an XML part, owned.
pub(crate) fn parse_events(xml: &str) -> Result<Vec<Event<'static>>, ReadError> {
    let mut reader = Reader::from_str(xml);
    let mut events = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            event => events.push(event.into_owned()),
        }
    }
    Ok(events)
}

pub(crate) fn is_element(start: &BytesStart<'_>, name: &[u8]) -> bool {
    start.name().as_ref() == name
}

/// Unescaped value of the attribute with this exact qualified name.
pub(crate) fn attribute(start: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Unescaped text, falling back to the raw bytes for invalid entities.
pub(crate) fn text_of(text: &BytesText<'_>) -> String {
    match text.unescape() {
        Ok(value) => value.into_owned(),
        Err(_) => String::from_utf8_lossy(text).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_order() {
        let mut package = Package::new();
        package.set("[Content_Types].xml", b"<Types/>".to_vec());
        package.set("word/document.xml", b"<doc/>".to_vec());

        let bytes = package.to_bytes().unwrap();
        let reopened = Package::from_bytes(&bytes).unwrap();

        let names: Vec<&str> = reopened.names().collect();
        assert_eq!(names, vec!["[Content_Types].xml", "word/document.xml"]);
        assert_eq!(reopened.get_str("word/document.xml").unwrap(), "<doc/>");
        assert!(matches!(
            reopened.get_str("missing.xml"),
            Err(ReadError::MissingPart(_))
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(Package::from_bytes(b"plain text").is_err());
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../sharedStrings.xml"),
            "xl/sharedStrings.xml"
        );
        assert_eq!(rels_path("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
    }
}
