//! Canonical field vocabulary and the field mapping produced by extraction.
//!
//! Field keys double as placeholder names: a template refers to a field as
//! `{{<key>}}`, e.g. `{{ФИО водителя}}`.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;

/// Opening delimiter of a placeholder token.
pub const PLACEHOLDER_OPEN: &str = "{{";

/// Closing delimiter of a placeholder token.
pub const PLACEHOLDER_CLOSE: &str = "}}";

/// A field recognized in transport contract-requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CustomerBlock,
    TaxId,
    RegistrationId,
    DocumentNumber,
    ShipperAddress,
    ConsigneeAddress,
    VehicleMake,
    TrailerNumber,
    DriverName,
    LoadingDate,
    UnloadingDate,
    CarriageCost,
    Price,
}

impl Field {
    /// Every field, in the order mappings are listed and serialized.
    pub const ALL: [Field; 13] = [
        Field::CustomerBlock,
        Field::TaxId,
        Field::RegistrationId,
        Field::DocumentNumber,
        Field::ShipperAddress,
        Field::ConsigneeAddress,
        Field::VehicleMake,
        Field::TrailerNumber,
        Field::DriverName,
        Field::LoadingDate,
        Field::UnloadingDate,
        Field::CarriageCost,
        Field::Price,
    ];

    /// Key used in placeholders and serialized output.
    pub fn key(self) -> &'static str {
        match self {
            Field::CustomerBlock => "Данные заказчика",
            Field::TaxId => "ИНН получателя",
            Field::RegistrationId => "ОГРН получателя",
            Field::DocumentNumber => "Номер документа",
            Field::ShipperAddress => "Адрес загрузки",
            Field::ConsigneeAddress => "Адрес разгрузки",
            Field::VehicleMake => "Марка автомобиля",
            Field::TrailerNumber => "Номер полуприцепа",
            Field::DriverName => "ФИО водителя",
            Field::LoadingDate => "Дата погрузки",
            Field::UnloadingDate => "Дата разгрузки",
            Field::CarriageCost => "Стоимость перевозки",
            Field::Price => "Цена",
        }
    }

    /// Look a field up by its key.
    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.key() == key)
    }

    /// The placeholder token for this field, e.g. `{{Цена}}`.
    pub fn placeholder(self) -> String {
        format!("{}{}{}", PLACEHOLDER_OPEN, self.key(), PLACEHOLDER_CLOSE)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Values for every canonical field.
///
/// Every field is always present; fields that could not be extracted hold
/// an empty string. A mapping is filled by the extraction engine and is
/// read-only for everyone else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    values: [String; 13],
}

impl FieldMapping {
    /// A mapping with every field empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field (empty when not found).
    pub fn get(&self, field: Field) -> &str {
        &self.values[field.index()]
    }

    /// Whether a field has no value.
    pub fn is_empty(&self, field: Field) -> bool {
        self.values[field.index()].is_empty()
    }

    /// Iterate `(field, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        Field::ALL.into_iter().map(move |f| (f, self.get(f)))
    }

    /// Number of fields that carry a value.
    pub fn filled_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_empty()).count()
    }

    /// Overwrite a field. Only the extraction engine writes values.
    pub(crate) fn set(&mut self, field: Field, value: impl Into<String>) {
        self.values[field.index()] = value.into();
    }

    /// Write a field only if it is still empty and the value is not.
    /// Returns whether the value was taken.
    pub(crate) fn fill(&mut self, field: Field, value: &str) -> bool {
        if value.is_empty() || !self.is_empty(field) {
            return false;
        }
        self.set(field, value);
        true
    }

    /// Human-readable summary of the mapping, one line per item.
    pub fn preview(&self) -> String {
        let lines = [
            self.get(Field::CustomerBlock).to_string(),
            self.get(Field::TaxId).to_string(),
            self.get(Field::RegistrationId).to_string(),
            format!(
                "Транспортные услуги по договору-заявке {}",
                self.get(Field::DocumentNumber)
            ),
            format!(
                "По маршруту {} - {}",
                self.get(Field::ShipperAddress),
                self.get(Field::ConsigneeAddress)
            ),
            format!(
                "Автомобиль: {} {}",
                self.get(Field::VehicleMake),
                self.get(Field::TrailerNumber)
            ),
            format!("Водитель: {}", self.get(Field::DriverName)),
            format!("Дата погрузки: {}", self.get(Field::LoadingDate)),
            format!("Дата разгрузки: {}", self.get(Field::UnloadingDate)),
            format!("Стоимость перевозки: {}", self.get(Field::CarriageCost)),
        ];
        lines.join("\n")
    }
}

impl Serialize for FieldMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Field::ALL.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field.key(), value)?;
        }
        map.end()
    }
}
