//! Regex fallback over the whole text, for fields the line pass missed.

use crate::models::fields::{Field, FieldMapping};

use super::patterns::{
    ADDRESS_PAIR, CARRIAGE_COST, CONSIGNEE_ADDRESS, DATE, DOCUMENT_NUMBER, DRIVER_NAME,
    REGISTRATION_ID, SHIPPER_ADDRESS, TAX_ID, TRAILER_NUMBER, VEHICLE_MAKE, VEHICLE_PAIR,
};
use super::{capture, ExtractionRule};

/// Labelled-value regexes for number, addresses, dates, cost, vehicle and driver.
#[derive(Debug, Default)]
pub struct RegexFallbackRule;

impl RegexFallbackRule {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionRule for RegexFallbackRule {
    fn name(&self) -> &'static str {
        "regex-fallback"
    }

    fn extract(&self, text: &str, current: &FieldMapping) -> Vec<(Field, String)> {
        let mut values = Vec::new();
        let mut push = |field: Field, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                values.push((field, value));
            }
        };

        push(Field::DocumentNumber, capture(&DOCUMENT_NUMBER, text));

        if current.is_empty(Field::ShipperAddress) || current.is_empty(Field::ConsigneeAddress) {
            if let Some(caps) = ADDRESS_PAIR.captures(text) {
                push(Field::ShipperAddress, Some(caps[1].trim().to_string()));
                push(Field::ConsigneeAddress, Some(caps[2].trim().to_string()));
            }
        }
        push(Field::ShipperAddress, capture(&SHIPPER_ADDRESS, text));
        push(Field::ConsigneeAddress, capture(&CONSIGNEE_ADDRESS, text));

        let dates: Vec<&str> = DATE.find_iter(text).take(2).map(|m| m.as_str()).collect();
        if let &[loading, unloading] = dates.as_slice() {
            push(Field::LoadingDate, Some(loading.to_string()));
            push(Field::UnloadingDate, Some(unloading.to_string()));
        }

        push(Field::CarriageCost, capture(&CARRIAGE_COST, text));

        if let Some(caps) = VEHICLE_PAIR.captures(text) {
            push(Field::VehicleMake, Some(caps[1].to_string()));
            push(Field::TrailerNumber, Some(caps[2].to_string()));
        }
        push(Field::VehicleMake, capture(&VEHICLE_MAKE, text));
        push(Field::TrailerNumber, capture(&TRAILER_NUMBER, text));

        push(Field::DriverName, capture(&DRIVER_NAME, text));

        values
    }
}

/// Recipient tax id (`ИНН получателя …`) and registration id (`ОГРН …`),
/// kept with their labels.
#[derive(Debug, Default)]
pub struct IdentifierRule;

impl IdentifierRule {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionRule for IdentifierRule {
    fn name(&self) -> &'static str {
        "identifiers"
    }

    fn extract(&self, text: &str, _current: &FieldMapping) -> Vec<(Field, String)> {
        let mut values = Vec::new();
        if let Some(m) = TAX_ID.find(text) {
            values.push((Field::TaxId, m.as_str().trim().to_string()));
        }
        if let Some(m) = REGISTRATION_ID.find(text) {
            values.push((Field::RegistrationId, m.as_str().trim().to_string()));
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lookup(values: &[(Field, String)], field: Field) -> Option<&str> {
        values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_document_number() {
        let values = RegexFallbackRule::new().extract(
            "Договор-заявка № 17-А от 01.02.2024 года.\nследующая строка",
            &FieldMapping::new(),
        );
        assert_eq!(
            lookup(&values, Field::DocumentNumber),
            Some("№ 17-А от 01.02.2024 года.")
        );
    }

    #[test]
    fn test_labelled_values() {
        let text = "Адрес загрузки: г. Москва\n\
                    Адрес разгрузки: г. Казань\n\
                    Погрузка 01.02.2024, выгрузка 03.02.2024, оплата 10.02.2024\n\
                    Стоимость перевозки 45 000 руб.\n\
                    Марка автомобиля: Scania R450\n\
                    Номер полуприцепа: ЕК 5678 50\n\
                    ФИО водителя: Сергеев С.С.";
        let values = RegexFallbackRule::new().extract(text, &FieldMapping::new());

        assert_eq!(lookup(&values, Field::ShipperAddress), Some("г. Москва"));
        assert_eq!(lookup(&values, Field::ConsigneeAddress), Some("г. Казань"));
        assert_eq!(lookup(&values, Field::LoadingDate), Some("01.02.2024"));
        assert_eq!(lookup(&values, Field::UnloadingDate), Some("03.02.2024"));
        assert_eq!(lookup(&values, Field::CarriageCost), Some("45 000 руб."));
        assert_eq!(lookup(&values, Field::VehicleMake), Some("Scania R450"));
        assert_eq!(lookup(&values, Field::TrailerNumber), Some("ЕК 5678 50"));
        assert_eq!(lookup(&values, Field::DriverName), Some("Сергеев С.С."));
    }

    #[test]
    fn test_vehicle_pair_is_case_insensitive() {
        let text = "МАРКА, НОМЕР А/М, НОМЕР ПОЛУПРИЦЕПА MAN АА1111";
        let values = RegexFallbackRule::new().extract(text, &FieldMapping::new());
        assert_eq!(lookup(&values, Field::VehicleMake), Some("MAN"));
        assert_eq!(lookup(&values, Field::TrailerNumber), Some("АА1111"));
    }

    #[test]
    fn test_single_date_is_not_enough() {
        let values = RegexFallbackRule::new().extract("Дата 01.02.2024", &FieldMapping::new());
        assert_eq!(lookup(&values, Field::LoadingDate), None);
    }

    #[test]
    fn test_identifiers_keep_labels() {
        let values = IdentifierRule::new().extract(
            "ИНН получателя 7701234567, ОГРН1027700132195",
            &FieldMapping::new(),
        );
        assert_eq!(lookup(&values, Field::TaxId), Some("ИНН получателя 7701234567"));
        assert_eq!(lookup(&values, Field::RegistrationId), Some("ОГРН1027700132195"));
    }
}
