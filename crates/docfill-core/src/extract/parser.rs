//! Heuristic strategy: ordered extraction rules over flat text.

use std::time::Instant;

use tracing::{debug, info};

use crate::models::fields::{Field, FieldMapping};

use super::rules::{
    CustomerBlockRule, ExtractionRule, IdentifierRule, LineColumnRule, PriceRule,
    RegexFallbackRule,
};

/// Runs extraction rules in priority order over one text.
///
/// Each rule's values are applied only to fields that are still empty, so an
/// earlier rule always wins over a later one.
pub struct HeuristicParser {
    rules: Vec<Box<dyn ExtractionRule + Send + Sync>>,
}

impl HeuristicParser {
    /// Parser with the standard rule order: line/column pass, regex
    /// fallback, customer block, identifiers, then the derived price.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(LineColumnRule::new()),
                Box::new(RegexFallbackRule::new()),
                Box::new(CustomerBlockRule::new()),
                Box::new(IdentifierRule::new()),
                Box::new(PriceRule::new()),
            ],
        }
    }

    /// Parser with a custom rule list.
    pub fn with_rules(rules: Vec<Box<dyn ExtractionRule + Send + Sync>>) -> Self {
        Self { rules }
    }

    /// Extract every field the rules can find in `text`.
    pub fn parse(&self, text: &str) -> FieldMapping {
        let start = Instant::now();
        info!("Parsing {} characters of text", text.chars().count());

        let mut mapping = FieldMapping::new();
        for rule in &self.rules {
            let offered = rule.extract(text, &mapping);
            let taken: Vec<Field> = offered
                .into_iter()
                .filter_map(|(field, value)| mapping.fill(field, &value).then_some(field))
                .collect();
            if !taken.is_empty() {
                debug!("Rule {} filled {:?}", rule.name(), taken);
            }
        }

        info!(
            "Heuristic extraction filled {} of {} fields in {}ms",
            mapping.filled_count(),
            Field::ALL.len(),
            start.elapsed().as_millis()
        );
        mapping
    }
}

impl Default for HeuristicParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONTRACT_TEXT: &str = "\
Договор-заявка № 42 от 05.03.2024
Адрес загрузки    Адрес разгрузки
г. Москва, ул. А, 1    г. Казань, ул. Б, 2
Дата  Время  Дата  Время
05.03.2024  09:00  07.03.2024  15:00
Стоимость перевозки 85 000 руб.
Марка, номер а/м, номер полуприцепа  DAF XF  ВС 4321 99
ФИО водителя  Козлов Андрей Викторович
Заказчик:
Индивидуальный предприниматель Смирнов Олег Игоревич
Юридический адрес: г. Тула, ул. Мира, д. 3
ИНН получателя 710512345678
ОГРНИП 312710400012345
Почтовый адрес: г. Тула
";

    #[test]
    fn test_parse_full_contract_text() {
        let mapping = HeuristicParser::new().parse(CONTRACT_TEXT);

        assert_eq!(mapping.get(Field::DocumentNumber), "№ 42 от 05.03.2024");
        assert_eq!(mapping.get(Field::ShipperAddress), "г. Москва, ул. А, 1");
        assert_eq!(mapping.get(Field::ConsigneeAddress), "г. Казань, ул. Б, 2");
        assert_eq!(mapping.get(Field::LoadingDate), "05.03.2024");
        assert_eq!(mapping.get(Field::UnloadingDate), "07.03.2024");
        assert_eq!(mapping.get(Field::CarriageCost), "85 000 руб.");
        assert_eq!(mapping.get(Field::Price), "85000");
        assert_eq!(mapping.get(Field::VehicleMake), "DAF XF");
        assert_eq!(mapping.get(Field::TrailerNumber), "ВС 4321 99");
        assert_eq!(mapping.get(Field::DriverName), "Козлов Андрей Викторович");
        assert_eq!(
            mapping.get(Field::CustomerBlock),
            "Индивидуальный предприниматель Смирнов Олег Игоревич\nЮридический адрес: г. Тула, ул. Мира, д. 3"
        );
        assert_eq!(mapping.get(Field::TaxId), "ИНН получателя 710512345678");
        assert_eq!(mapping.get(Field::RegistrationId), "");
    }

    #[test]
    fn test_fallback_never_overwrites_line_pass() {
        // The line pass takes the first two dates from the columns; the
        // fallback would pick the number date and the loading date.
        let mapping = HeuristicParser::new().parse(CONTRACT_TEXT);
        assert_eq!(mapping.get(Field::LoadingDate), "05.03.2024");
        assert_eq!(mapping.get(Field::UnloadingDate), "07.03.2024");

        let text = "ФИО водителя  Первый П.П.\nФИО водителя: Второй В.В.";
        let mapping = HeuristicParser::new().parse(text);
        assert_eq!(mapping.get(Field::DriverName), "Первый П.П.");
    }

    #[test]
    fn test_inline_customer_text() {
        let text = "Заказчик: Индивидуальный предприниматель Иванов Иван Иванович \
                    Юридический адрес: г. Москва, ул. Ленина, д. 1 Почтовый адрес: г. Москва, ул. Ленина, д. 1";
        let mapping = HeuristicParser::new().parse(text);
        assert_eq!(
            mapping.get(Field::CustomerBlock),
            "Индивидуальный предприниматель Иванов Иван Иванович\nЮридический адрес: г. Москва, ул. Ленина, д. 1"
        );
    }

    #[test]
    fn test_empty_text_gives_empty_mapping() {
        let mapping = HeuristicParser::new().parse("");
        assert_eq!(mapping, FieldMapping::new());
    }

    #[test]
    fn test_custom_rule_order() {
        let parser = HeuristicParser::with_rules(vec![Box::new(PriceRule::new())]);
        let mapping = parser.parse("Стоимость перевозки 100");
        assert!(mapping.is_empty(Field::CarriageCost));
        assert!(mapping.is_empty(Field::Price));
    }
}
