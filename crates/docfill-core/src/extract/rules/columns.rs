//! Line/column pass over table-shaped text.
//!
//! Text produced from tables (a PDF text layer or OCR output) keeps each row
//! on one line with columns separated by tabs or wide gaps. This pass looks
//! for known header lines and reads the values from the lines below them.

use tracing::debug;

use crate::models::fields::{Field, FieldMapping};

use super::patterns::{ADDRESS_BOUNDARY, ADDRESS_HEADER, CARRIAGE_COST, DATE_HEADER};
use super::{capture, content_lines, split_columns, ExtractionRule};

/// Anchor-driven extraction of addresses, dates, cost, vehicle and driver.
#[derive(Debug, Default)]
pub struct LineColumnRule;

impl LineColumnRule {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionRule for LineColumnRule {
    fn name(&self) -> &'static str {
        "line-column"
    }

    fn extract(&self, text: &str, _current: &FieldMapping) -> Vec<(Field, String)> {
        let lines = content_lines(text);
        // The first line matching an anchor wins, so collect through `fill`.
        let mut found = FieldMapping::new();

        for (i, line) in lines.iter().enumerate() {
            let next = lines.get(i + 1);

            if ADDRESS_HEADER.is_match(line) {
                let Some(first) = next else { continue };
                let mut address_line = first.to_string();
                for continuation in lines[i + 2..].iter().take_while(|l| !l.starts_with("Дата")) {
                    address_line.push(' ');
                    address_line.push_str(continuation);
                }
                if let Some((shipper, consignee)) = split_addresses(&address_line) {
                    debug!("Address row: {:?} / {:?}", shipper, consignee);
                    found.fill(Field::ShipperAddress, &shipper);
                    found.fill(Field::ConsigneeAddress, &consignee);
                }
            } else if DATE_HEADER.is_match(line) {
                let Some(first) = next else { continue };
                let mut values_line = first.to_string();
                if let Some(second) = lines.get(i + 2) {
                    if !second.starts_with("Стоимость перевозки") {
                        // Tab keeps the two rows apart as columns
                        values_line.push('\t');
                        values_line.push_str(second);
                    }
                }
                let columns = split_columns(&values_line);
                if columns.len() >= 3 {
                    found.fill(Field::LoadingDate, columns[0]);
                    found.fill(Field::UnloadingDate, columns[2]);
                }
            } else if line.starts_with("Стоимость перевозки") {
                if let Some(cost) = capture(&CARRIAGE_COST, line) {
                    found.fill(Field::CarriageCost, &cost);
                }
            } else if line.starts_with("Марка") && line.contains("полуприцеп") {
                let columns = split_columns(line);
                if let Some(make) = columns.get(1) {
                    found.fill(Field::VehicleMake, make);
                }
                if let Some(trailer) = columns.get(2) {
                    found.fill(Field::TrailerNumber, trailer);
                }
            } else if line.starts_with("ФИО водителя") {
                if let Some(driver) = split_columns(line).get(1) {
                    found.fill(Field::DriverName, driver);
                }
            }
        }

        found
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(field, value)| (field, value.to_string()))
            .collect()
    }
}

/// Split a stitched address row into shipper and consignee addresses.
///
/// Columns are tried first. A row without column gaps is bisected at the
/// first digit followed by whitespace and an uppercase Cyrillic letter; the
/// digit stays with the shipper address.
pub fn split_addresses(row: &str) -> Option<(String, String)> {
    let columns = split_columns(row);
    if columns.len() >= 2 {
        return Some((columns[0].to_string(), columns[1].to_string()));
    }

    let boundary = ADDRESS_BOUNDARY.find(row)?;
    let capital = row[..boundary.end()].chars().next_back()?;
    let split = boundary.end() - capital.len_utf8();

    let shipper = row[..split].trim();
    let consignee = row[split..].trim();
    Some((shipper.to_string(), consignee.to_string()))
}
