//! Regex patterns for transport contract-request extraction.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Column separators: tab runs or two or more whitespace characters
    pub static ref COLUMN_SEPARATOR: Regex = Regex::new(r"\t+|\s{2,}").unwrap();

    // Line/column anchors
    pub static ref ADDRESS_HEADER: Regex = Regex::new(
        r"^Адрес загрузки\s+Адрес разгрузки"
    ).unwrap();

    pub static ref DATE_HEADER: Regex = Regex::new(
        r"^Дата\s+Время\s+Дата\s+Время"
    ).unwrap();

    // A digit, whitespace, then an uppercase Cyrillic letter: where the
    // shipper address ends and the consignee address starts.
    pub static ref ADDRESS_BOUNDARY: Regex = Regex::new(r"\d\s+[А-ЯЁ]").unwrap();

    // Document number
    pub static ref DOCUMENT_NUMBER: Regex = Regex::new(
        r"Договор-заявка.*?(№\s*[^\n\r]+)"
    ).unwrap();

    // Addresses
    pub static ref ADDRESS_PAIR: Regex = Regex::new(
        r"Адрес загрузки[:\s]+([^\n\r]+)\s+Адрес разгрузки[:\s]+([^\n\r]+)"
    ).unwrap();

    pub static ref SHIPPER_ADDRESS: Regex = Regex::new(
        r"(?m)^Адрес загрузки[:\s]+([^\n\r]+)"
    ).unwrap();

    pub static ref CONSIGNEE_ADDRESS: Regex = Regex::new(
        r"(?m)^Адрес разгрузки[:\s]+([^\n\r]+)"
    ).unwrap();

    // Dates (dd.mm.yyyy)
    pub static ref DATE: Regex = Regex::new(r"\d{2}\.\d{2}\.\d{4}").unwrap();

    // Carriage cost, optionally spelled out
    pub static ref CARRIAGE_COST: Regex = Regex::new(
        r"Стоимость перевозки(?:\s*\(прописью\))?\s*([^\n\r]+)"
    ).unwrap();

    // Vehicle
    pub static ref VEHICLE_PAIR: Regex = Regex::new(
        r"(?i)Марка[,\s]+номер а/м, номер полуприцепа\s+(\S+)\s+(\S+)"
    ).unwrap();

    pub static ref VEHICLE_MAKE: Regex = Regex::new(
        r"(?m)^Марка автомобиля[:\s]+([^\n\r]+)"
    ).unwrap();

    pub static ref TRAILER_NUMBER: Regex = Regex::new(
        r"(?m)^Номер полуприцепа[:\s]+([^\n\r]+)"
    ).unwrap();

    pub static ref DRIVER_NAME: Regex = Regex::new(
        r"(?m)^ФИО водителя[:\s]*([^\n\r]+)"
    ).unwrap();

    // Customer block: everything after "Заказчик" up to the postal address
    pub static ref CUSTOMER_COLON: Regex = Regex::new(
        r"(?s)Заказчик:(.*?)(?:Почтовый адрес|$)"
    ).unwrap();

    pub static ref CUSTOMER_PLAIN: Regex = Regex::new(
        r"(?s)Заказчик\s+(.*?)(?:Почтовый адрес|$)"
    ).unwrap();

    pub static ref LEGAL_ADDRESS: Regex = Regex::new(r"Юридический адрес[^\n]*").unwrap();

    // Identifiers
    pub static ref TAX_ID: Regex = Regex::new(r"ИНН получателя\s*\d+").unwrap();

    pub static ref REGISTRATION_ID: Regex = Regex::new(r"ОГРН\s*\d+").unwrap();

    // Identifiers as printed in the customer cell of a structured document
    pub static ref TAX_ID_CELL: Regex = Regex::new(r"ИНН получателя \d+").unwrap();

    pub static ref REGISTRATION_ID_CELL: Regex = Regex::new(r"ОГРН \d+").unwrap();

    // Leading run of digits in a cost, possibly grouped by spaces
    pub static ref PRICE_DIGITS: Regex = Regex::new(r"[0-9][0-9\s]*").unwrap();
}
