//! Structural strategy: fixed table coordinates of a known producer.
//!
//! A [`ProducerLayout`] is plain data describing where one producer's
//! contract-request template prints each field. Supporting another producer
//! means writing another layout, not another extractor.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::docx::WordBody;
use crate::models::fields::{Field, FieldMapping};

use super::rules::patterns::{REGISTRATION_ID_CELL, TAX_ID_CELL};
use super::rules::extract_price;

/// A field read from one table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellBinding {
    pub table: usize,
    pub row: usize,
    pub col: usize,
    pub field: Field,
}

/// Cell holding the customer requisites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerCell {
    pub table: usize,
    pub row: usize,
    pub col: usize,
    /// Marker right before the customer text.
    pub start_marker: String,
    /// Marker right after the customer text.
    pub end_marker: String,
}

/// Where a producer's template places each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerLayout {
    pub name: String,
    /// Prefix of the paragraph carrying the document number.
    pub number_prefix: String,
    /// Cells copied verbatim (trimmed) into fields.
    pub cells: Vec<CellBinding>,
    pub customer: Option<CustomerCell>,
}

impl ProducerLayout {
    /// Layout of the transport contract-request template this tool was built for.
    pub fn contract_request() -> Self {
        let cell = |table, row, col, field| CellBinding {
            table,
            row,
            col,
            field,
        };

        Self {
            name: "contract-request".to_string(),
            number_prefix: "Договор-заявка".to_string(),
            cells: vec![
                // Route and cost
                cell(0, 8, 0, Field::ShipperAddress),
                cell(0, 8, 4, Field::ConsigneeAddress),
                cell(0, 10, 0, Field::LoadingDate),
                cell(0, 10, 4, Field::UnloadingDate),
                cell(0, 11, 4, Field::CarriageCost),
                // Vehicle
                cell(1, 0, 1, Field::VehicleMake),
                cell(1, 0, 2, Field::TrailerNumber),
                cell(1, 1, 1, Field::DriverName),
            ],
            customer: Some(CustomerCell {
                table: 2,
                row: 0,
                col: 1,
                start_marker: "Заказчик:".to_string(),
                end_marker: "Почтовый адрес".to_string(),
            }),
        }
    }

    /// Read every field this layout knows about from `body`.
    ///
    /// Missing paragraphs, tables or cells leave their fields empty.
    pub fn extract(&self, body: &WordBody) -> FieldMapping {
        let mut mapping = FieldMapping::new();

        if let Some(number) = self.document_number(body) {
            mapping.set(Field::DocumentNumber, number);
        }

        for binding in &self.cells {
            let value = body
                .tables
                .get(binding.table)
                .and_then(|t| t.cell(binding.row, binding.col));
            match value {
                Some(text) => mapping.set(binding.field, text.trim()),
                None => debug!(
                    "No cell ({}, {}) in table {} for {}",
                    binding.row, binding.col, binding.table, binding.field
                ),
            }
        }

        if let Some(customer) = &self.customer {
            let text = body
                .tables
                .get(customer.table)
                .and_then(|t| t.cell(customer.row, customer.col))
                .unwrap_or_default();
            read_customer_cell(customer, text, &mut mapping);
        }

        let price = extract_price(mapping.get(Field::CarriageCost));
        mapping.set(Field::Price, price);

        info!(
            "Layout {} filled {} of {} fields",
            self.name,
            mapping.filled_count(),
            Field::ALL.len()
        );
        mapping
    }

    /// Text after the first `№` of the first paragraph starting with the
    /// number prefix. Only that paragraph is considered.
    fn document_number(&self, body: &WordBody) -> Option<String> {
        let paragraph = body
            .paragraphs
            .iter()
            .map(|p| p.trim())
            .find(|p| p.starts_with(&self.number_prefix))?;
        let start = paragraph.find('№')?;
        Some(paragraph[start..].trim().to_string())
    }
}

impl Default for ProducerLayout {
    fn default() -> Self {
        Self::contract_request()
    }
}

fn read_customer_cell(customer: &CustomerCell, text: &str, mapping: &mut FieldMapping) {
    if text.is_empty() {
        return;
    }

    if let (Some(start), Some(end)) = (
        text.find(&customer.start_marker),
        text.find(&customer.end_marker),
    ) {
        let from = start + customer.start_marker.len();
        if end > start && from <= end {
            mapping.set(Field::CustomerBlock, text[from..end].trim());
        }
    }
    if let Some(m) = TAX_ID_CELL.find(text) {
        mapping.set(Field::TaxId, m.as_str().trim());
    }
    if let Some(m) = REGISTRATION_ID_CELL.find(text) {
        mapping.set(Field::RegistrationId, m.as_str().trim());
    }
}
