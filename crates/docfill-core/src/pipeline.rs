//! End-to-end fill: read a source, extract its fields, fill a template and
//! save the result.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{DocfillError, Result};
use crate::extract::FieldExtractor;
use crate::models::config::DocfillConfig;
use crate::models::fields::{Field, FieldMapping};
use crate::ocr::OcrEngine;
use crate::source::SourceReader;
use crate::substitute::{Template, TemplateKind};
use crate::workbook::WorkbookFormat;

/// What a completed fill produced.
#[derive(Debug, Clone)]
pub struct FillReport {
    /// Where the output was written, extension included.
    pub output: PathBuf,
    pub mapping: FieldMapping,
    /// Runs or cells whose text changed.
    pub replaced: usize,
    /// Hidden sheets made visible.
    pub revealed: usize,
}

/// Runs the whole pipeline for one source and one template.
pub struct DocumentFiller<'a> {
    config: &'a DocfillConfig,
    ocr: Option<&'a dyn OcrEngine>,
    extractor: FieldExtractor,
}

impl<'a> DocumentFiller<'a> {
    pub fn new(config: &'a DocfillConfig) -> Self {
        Self {
            config,
            ocr: None,
            extractor: FieldExtractor::new(),
        }
    }

    /// OCR engine for scanned PDF sources.
    pub fn with_ocr(mut self, ocr: &'a dyn OcrEngine) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Extract the field mapping of a source buffer.
    pub fn extract(&self, data: &[u8], extension: &str) -> Result<FieldMapping> {
        let mut reader = SourceReader::new(self.config);
        if let Some(ocr) = self.ocr {
            reader = reader.with_ocr(ocr);
        }
        let source = reader.read(data, extension)?;
        let mapping = self.extractor.extract(&source);
        info!(
            "Extracted {}/{} fields",
            mapping.filled_count(),
            Field::ALL.len()
        );
        Ok(mapping)
    }

    /// Fill a template buffer and serialize it in the format selected by
    /// `output_extension`. Returns the bytes with the fill statistics.
    pub fn render(
        &self,
        mapping: &FieldMapping,
        template: &[u8],
        template_extension: &str,
        output_extension: &str,
    ) -> Result<(Vec<u8>, usize, usize)> {
        let mut template = Template::load(template, template_extension)?;
        let target = output_kind(template.kind(), output_extension)?;
        let replaced = template.substitute(mapping)?;

        match template {
            Template::Word(document) => Ok((document.to_bytes()?, replaced, 0)),
            Template::Workbook(book) => {
                let TemplateKind::Workbook(format) = target else {
                    return Err(DocfillError::UnsupportedWorkbook(
                        "a workbook template cannot be saved as a document".to_string(),
                    ));
                };
                let mut book = book.convert(format)?;
                let revealed = if self.config.output.reveal_hidden_sheets {
                    book.book_mut().reveal_sheets()
                } else {
                    0
                };
                Ok((book.book().to_bytes()?, replaced, revealed))
            }
        }
    }

    /// Fill `template` with the fields of `source` and write `output`.
    ///
    /// An output path without an extension gets the template's own.
    pub fn fill(&self, source: &Path, template: &Path, output: &Path) -> Result<FillReport> {
        let start = Instant::now();

        let source_data = read_input(source)?;
        let mapping = self.extract(&source_data, &extension_of(source))?;

        let template_data = read_input(template)?;
        let template_ext = extension_of(template);
        let native = TemplateKind::from_extension(&template_ext)?;
        let output = with_default_extension(output, native);

        let (bytes, replaced, revealed) =
            self.render(&mapping, &template_data, &template_ext, &extension_of(&output))?;
        save_atomic(&bytes, &output, self.config.output.overwrite)?;

        info!(
            "Wrote {} ({} replacements) in {}ms",
            output.display(),
            replaced,
            start.elapsed().as_millis()
        );
        Ok(FillReport {
            output,
            mapping,
            replaced,
            revealed,
        })
    }
}

/// The kind an output extension selects for a template of kind `template`.
fn output_kind(template: TemplateKind, extension: &str) -> Result<TemplateKind> {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    match template {
        TemplateKind::Word if ext == "docx" => Ok(TemplateKind::Word),
        TemplateKind::Word if WorkbookFormat::from_extension(&ext).is_some() => {
            Err(DocfillError::UnsupportedWorkbook(
                "a document template cannot be saved as a workbook".to_string(),
            ))
        }
        TemplateKind::Workbook(_) => WorkbookFormat::from_extension(&ext)
            .map(TemplateKind::Workbook)
            .ok_or(DocfillError::UnsupportedFormat(format!(".{}", ext))),
        TemplateKind::Word => Err(DocfillError::UnsupportedFormat(format!(".{}", ext))),
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| DocfillError::DocumentRead(e.into()))
}

/// Lowercased extension of a path, empty when it has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// `path` with the native extension of `kind` appended when it has none.
pub fn with_default_extension(path: &Path, kind: TemplateKind) -> PathBuf {
    if path.extension().is_some() {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(kind.extension());
    PathBuf::from(name)
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so a failed save never leaves a partial file behind.
pub fn save_atomic(bytes: &[u8], path: &Path, overwrite: bool) -> Result<()> {
    let write_error = |source: std::io::Error| match source.kind() {
        ErrorKind::PermissionDenied => DocfillError::OutputLocked {
            path: path.to_path_buf(),
        },
        _ => DocfillError::OutputWrite {
            path: path.to_path_buf(),
            source,
        },
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(bytes).map_err(write_error)?;
    file.as_file().sync_all().map_err(write_error)?;

    let persisted = if overwrite {
        file.persist(path)
    } else {
        file.persist_noclobber(path)
    };
    persisted.map_err(|e| write_error(e.error))?;

    debug!("Saved {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::WordDocument;
    use crate::docx::fixtures::{docx, paragraph, table};
    use crate::workbook::{CellValue, SpreadsheetBook, Workbook};
    use tempfile::TempDir;

    fn contract_source() -> Vec<u8> {
        docx(&format!(
            "{}{}",
            paragraph(&["Договор-заявка № 17-А от 01.02.2024 года."]),
            paragraph(&["ФИО водителя: Иванов И.И."])
        ))
    }

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_fill_word_template() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "source.docx", &contract_source());
        let template = write(
            &dir,
            "template.docx",
            &docx(&table(&[&["Водитель: {{ФИО водителя}}"]])),
        );

        let config = DocfillConfig::default();
        let report = DocumentFiller::new(&config)
            .fill(&source, &template, &dir.path().join("out"))
            .unwrap();

        assert_eq!(report.output, dir.path().join("out.docx"));
        assert_eq!(report.replaced, 1);
        let document = WordDocument::from_bytes(&fs::read(&report.output).unwrap()).unwrap();
        assert_eq!(
            document.body().tables[0].cell(0, 0),
            Some("Водитель: Иванов И.И.")
        );
    }

    #[test]
    fn test_fill_legacy_template_into_modern_output() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "source.docx", &contract_source());

        let mut book = Workbook::new(WorkbookFormat::Legacy);
        let sheet = book.book_mut().add_sheet("Акт").unwrap();
        book.book_mut()
            .write_cell(sheet, 1, 1, CellValue::Text("{{ФИО водителя}}".into()))
            .unwrap();
        let template = write(&dir, "template.xls", &book.book().to_bytes().unwrap());

        let config = DocfillConfig::default();
        let output = dir.path().join("filled.xlsx");
        DocumentFiller::new(&config)
            .fill(&source, &template, &output)
            .unwrap();

        let filled = Workbook::load(&fs::read(&output).unwrap(), "xlsx").unwrap();
        assert_eq!(filled.format(), WorkbookFormat::Modern);
        assert_eq!(
            filled.book().cells(0)[0].value,
            CellValue::Text("Иванов И.И.".into())
        );
    }

    #[test]
    fn test_output_format_errors() {
        let config = DocfillConfig::default();
        let filler = DocumentFiller::new(&config);
        let mapping = FieldMapping::new();
        let template = docx(&paragraph(&["x"]));

        assert!(matches!(
            filler.render(&mapping, &template, "docx", "xlsx"),
            Err(DocfillError::UnsupportedWorkbook(_))
        ));
        assert!(matches!(
            filler.render(&mapping, &template, "docx", "pdf"),
            Err(DocfillError::UnsupportedFormat(_))
        ));

        let mut book = Workbook::new(WorkbookFormat::Modern);
        book.book_mut().add_sheet("Лист1").unwrap();
        let bytes = book.book().to_bytes().unwrap();
        assert!(matches!(
            filler.render(&mapping, &bytes, "xlsx", "csv"),
            Err(DocfillError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            filler.render(&mapping, &bytes, "xlsx", "docx"),
            Err(DocfillError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unknown_source_format() {
        let dir = TempDir::new().unwrap();
        let source = write(&dir, "source.odt", b"whatever");
        let template = write(&dir, "template.docx", &docx(&paragraph(&["x"])));
        let config = DocfillConfig::default();

        let err = DocumentFiller::new(&config)
            .fill(&source, &template, &dir.path().join("out.docx"))
            .unwrap_err();
        assert!(matches!(err, DocfillError::UnsupportedInputFormat(ext) if ext == "odt"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let config = DocfillConfig::default();
        let filler = DocumentFiller::new(&config);
        let mapping = filler.extract(&contract_source(), "docx").unwrap();
        let template = docx(&paragraph(&["{{ФИО водителя}} / {{Номер документа}}"]));

        let first = filler.render(&mapping, &template, "docx", "docx").unwrap();
        let second = filler.render(&mapping, &template, "docx", "docx").unwrap();
        assert_eq!(first.0, second.0);
    }

    #[test]
    fn test_save_atomic_respects_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.docx");
        save_atomic(b"first", &path, true).unwrap();
        save_atomic(b"second", &path, true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        let err = save_atomic(b"third", &path, false).unwrap_err();
        assert!(matches!(err, DocfillError::OutputWrite { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_save_into_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("out.docx");
        assert!(matches!(
            save_atomic(b"x", &path, true),
            Err(DocfillError::OutputWrite { .. })
        ));
    }

    #[test]
    fn test_default_extension() {
        assert_eq!(
            with_default_extension(Path::new("out"), TemplateKind::Workbook(WorkbookFormat::Modern)),
            PathBuf::from("out.xlsx")
        );
        assert_eq!(
            with_default_extension(Path::new("out.xls"), TemplateKind::Word),
            PathBuf::from("out.xls")
        );
    }
}
