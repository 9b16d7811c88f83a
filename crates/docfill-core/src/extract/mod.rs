//! Field extraction from source documents.
//!
//! Two strategies exist. A word-processor document with tables is read by
//! cell coordinates ([`ProducerLayout`]). Everything else is flattened to
//! text and handed to the rule-based [`HeuristicParser`].

pub mod layout;
mod parser;
pub mod rules;

pub use layout::{CellBinding, CustomerCell, ProducerLayout};
pub use parser::HeuristicParser;
pub use rules::ExtractionRule;

use tracing::info;

use crate::models::fields::FieldMapping;
use crate::source::SourceDocument;

/// Extracts a [`FieldMapping`] from an acquired source.
pub struct FieldExtractor {
    layout: ProducerLayout,
    parser: HeuristicParser,
}

impl FieldExtractor {
    /// Extractor for the contract-request layout and the standard rules.
    pub fn new() -> Self {
        Self {
            layout: ProducerLayout::contract_request(),
            parser: HeuristicParser::new(),
        }
    }

    /// Use another producer layout for structured documents.
    pub fn with_layout(mut self, layout: ProducerLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Use another heuristic parser for flat text.
    pub fn with_parser(mut self, parser: HeuristicParser) -> Self {
        self.parser = parser;
        self
    }

    /// Extract fields. Never fails: anything not found stays empty.
    pub fn extract(&self, source: &SourceDocument) -> FieldMapping {
        match source {
            SourceDocument::Word(body) if !body.tables.is_empty() => {
                info!(
                    "Structured source with {} tables, using layout {}",
                    body.tables.len(),
                    self.layout.name
                );
                self.layout.extract(body)
            }
            SourceDocument::Word(body) => {
                info!("Structured source without tables, parsing its text");
                self.parser.parse(&body.to_text())
            }
            SourceDocument::Text(text) => self.parser.parse(text),
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract fields with the default layout and rules.
pub fn extract_fields(source: &SourceDocument) -> FieldMapping {
    FieldExtractor::new().extract(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::{Table, WordBody};
    use crate::models::fields::Field;

    #[test]
    fn test_word_without_tables_uses_heuristics() {
        let body = WordBody {
            paragraphs: vec![
                "Договор-заявка № 8".to_string(),
                "ФИО водителя: Орлов О.О.".to_string(),
            ],
            tables: Vec::new(),
        };
        let mapping = extract_fields(&SourceDocument::Word(body));

        assert_eq!(mapping.get(Field::DocumentNumber), "№ 8");
        assert_eq!(mapping.get(Field::DriverName), "Орлов О.О.");
    }

    #[test]
    fn test_word_with_tables_uses_layout_only() {
        let body = WordBody {
            paragraphs: vec!["ФИО водителя: Орлов О.О.".to_string()],
            tables: vec![Table {
                rows: vec![vec!["x".to_string()]],
            }],
        };
        let mapping = extract_fields(&SourceDocument::Word(body));
        assert!(mapping.is_empty(Field::DriverName));
    }

    #[test]
    fn test_every_field_present() {
        let mapping = extract_fields(&SourceDocument::Text(String::new()));
        assert_eq!(mapping.iter().count(), Field::ALL.len());
    }
}
