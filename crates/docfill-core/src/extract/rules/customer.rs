//! Customer block: sole-proprietor name plus legal address.

use tracing::debug;

use crate::models::fields::{Field, FieldMapping};

use super::patterns::{CUSTOMER_COLON, CUSTOMER_PLAIN, LEGAL_ADDRESS};
use super::{content_lines, ExtractionRule};

const PROPRIETOR: &str = "Индивидуальный предприниматель";
const LEGAL_ADDRESS_LABEL: &str = "Юридический адрес";
const POSTAL_ADDRESS_LABEL: &str = "Почтовый адрес";

/// Extracts the customer block from the last `Заказчик` section.
#[derive(Debug, Default)]
pub struct CustomerBlockRule;

impl CustomerBlockRule {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionRule for CustomerBlockRule {
    fn name(&self) -> &'static str {
        "customer-block"
    }

    fn extract(&self, text: &str, _current: &FieldMapping) -> Vec<(Field, String)> {
        let block = last_block(text);
        block
            .and_then(parse_customer_block)
            .map(|value| vec![(Field::CustomerBlock, value)])
            .unwrap_or_default()
    }
}

/// Text of the last customer section, preferring the `Заказчик:` form.
fn last_block(text: &str) -> Option<&str> {
    let colon = CUSTOMER_COLON
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1));
    let block = colon.or_else(|| {
        CUSTOMER_PLAIN
            .captures_iter(text)
            .last()
            .and_then(|c| c.get(1))
    })?;
    Some(block.as_str())
}

/// Build `name\naddress` from a customer section.
///
/// Returns `None` when no proprietor name can be found; the address alone is
/// never reported.
pub fn parse_customer_block(block: &str) -> Option<String> {
    let lines = content_lines(block);

    let name = proprietor_name(&lines)?;
    let address = legal_address(&lines).or_else(|| {
        LEGAL_ADDRESS
            .find(block)
            .map(|m| m.as_str().trim().to_string())
    });

    debug!("Customer {:?}, address {:?}", name, address);
    Some(match address {
        Some(address) if !address.is_empty() => format!("{}\n{}", name, address),
        _ => name,
    })
}

fn proprietor_name(lines: &[&str]) -> Option<String> {
    let idx = lines.iter().rposition(|l| l.starts_with(PROPRIETOR))?;
    let after = lines[idx][PROPRIETOR.len()..].trim();

    if after.is_empty() {
        // Name printed on the following line, last three words
        let tokens: Vec<&str> = lines.get(idx + 1)?.split_whitespace().collect();
        if tokens.len() < 3 {
            return None;
        }
        return Some(format!("{} {}", PROPRIETOR, tokens[tokens.len() - 3..].join(" ")));
    }

    let name = [LEGAL_ADDRESS_LABEL, POSTAL_ADDRESS_LABEL]
        .iter()
        .find_map(|label| after.find(label).map(|pos| after[..pos].trim()))
        .unwrap_or(after);
    Some(format!("{} {}", PROPRIETOR, name))
}

fn legal_address(lines: &[&str]) -> Option<String> {
    let idx = lines.iter().position(|l| l.starts_with(LEGAL_ADDRESS_LABEL))?;
    let mut address = lines[idx].to_string();

    if let Some(extra) = lines[idx + 1..]
        .iter()
        .find(|l| l.contains("литера") || l.contains("офис"))
    {
        address = format!("{}, {}", address.trim_end_matches(','), extra);
    }
    Some(address)
}
