//! Numeric price derived from the carriage cost.

use crate::models::fields::{Field, FieldMapping};

use super::patterns::PRICE_DIGITS;
use super::ExtractionRule;

/// Leading digits of a cost with grouping whitespace removed.
///
/// `"12 345 руб. 00 коп."` gives `"12345"`; text without digits gives `""`.
pub fn extract_price(cost: &str) -> String {
    PRICE_DIGITS
        .find(cost)
        .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect())
        .unwrap_or_default()
}

/// Derives the price from whatever carriage cost earlier rules found.
#[derive(Debug, Default)]
pub struct PriceRule;

impl PriceRule {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionRule for PriceRule {
    fn name(&self) -> &'static str {
        "price"
    }

    fn extract(&self, _text: &str, current: &FieldMapping) -> Vec<(Field, String)> {
        vec![(Field::Price, extract_price(current.get(Field::CarriageCost)))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_price() {
        assert_eq!(extract_price("12 345 руб. 00 коп."), "12345");
        assert_eq!(extract_price(""), "");
        assert_eq!(extract_price("договорная"), "");
        assert_eq!(extract_price("45000 (сорок пять тысяч) руб."), "45000");
    }

    #[test]
    fn test_price_rule_reads_current_cost() {
        let mut current = FieldMapping::new();
        current.set(Field::CarriageCost, "7 500 руб.");
        let values = PriceRule::new().extract("", &current);
        assert_eq!(values, vec![(Field::Price, "7500".to_string())]);
    }
}
