//! Rule-based field extractors for flat contract-request text.

pub mod columns;
pub mod customer;
pub mod fallback;
pub mod patterns;
pub mod price;

pub use columns::LineColumnRule;
pub use customer::{parse_customer_block, CustomerBlockRule};
pub use fallback::{IdentifierRule, RegexFallbackRule};
pub use price::{extract_price, PriceRule};

use crate::models::fields::{Field, FieldMapping};

use patterns::COLUMN_SEPARATOR;

/// One independent step of the heuristic strategy.
///
/// A rule sees the full text and the mapping built so far, and returns the
/// fields it can fill. The caller applies a value only to a field that is
/// still empty, so a rule never has to check what earlier rules found.
pub trait ExtractionRule {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Values this rule can offer for `text`.
    fn extract(&self, text: &str, current: &FieldMapping) -> Vec<(Field, String)>;
}

/// Non-empty trimmed lines of `text`.
pub fn content_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Split a line into columns on tab runs or runs of 2+ whitespace
/// characters. Empty columns are dropped.
pub fn split_columns(line: &str) -> Vec<&str> {
    COLUMN_SEPARATOR
        .split(line)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

/// Trimmed first capture group of `re` in `text`.
pub(crate) fn capture(re: &regex::Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_columns() {
        assert_eq!(
            split_columns("Марка\tVolvo FH   АВ 1234"),
            vec!["Марка", "Volvo FH", "АВ 1234"]
        );
        assert_eq!(split_columns("\t\t"), Vec::<&str>::new());
        assert_eq!(split_columns("one column"), vec!["one column"]);
    }

    #[test]
    fn test_content_lines() {
        assert_eq!(content_lines("  a \n\n   \n b"), vec!["a", "b"]);
    }
}
