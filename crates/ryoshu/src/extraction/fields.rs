//! Structured receipt fields returned by the extraction model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys that must be present and non-empty in every model response.
pub const REQUIRED_FIELDS: &[&str] = &[
    "uploader_name",
    "receipt_type",
    "date",
    "company_name",
    "price",
];

/// One purchased line on a receipt.
///
/// Quantities and amounts are kept as text: the model may answer with
/// numbers or strings and receipts use inconsistent formatting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit_price: String,
    #[serde(default)]
    pub total_price: String,
}

/// A validated extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptFields {
    pub uploader_name: String,
    /// Free-text category, e.g. `grocery` or `駐車場`.
    pub receipt_type: String,
    /// Purchase date as printed; not normalised.
    pub date: String,
    pub company_name: String,
    /// Total amount without currency unit.
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl ReceiptFields {
    /// Builds fields from a JSON object, or returns the names of required
    /// keys that are absent, null, or blank.
    ///
    /// `price` is checked after normalisation, so a bare currency unit counts
    /// as missing.
    pub fn from_object(obj: &Map<String, Value>) -> Result<Self, Vec<String>> {
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|key| required_field(obj, key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        let required = |key: &str| required_field(obj, key).unwrap_or_default();
        Ok(Self {
            uploader_name: required("uploader_name"),
            receipt_type: required("receipt_type"),
            date: required("date"),
            company_name: required("company_name"),
            price: required("price"),
            file_name: text_field(obj, "file_name"),
            items: obj.get("items").map(line_items).unwrap_or_default(),
        })
    }
}

/// Renders scalars as trimmed text. Objects, arrays and null yield `None`.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(value_text)
        .filter(|s| !s.is_empty())
}

fn required_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let value = text_field(obj, key)?;
    if key == "price" {
        Some(normalise_price(&value)).filter(|p| !p.is_empty())
    } else {
        Some(value)
    }
}

/// Drops yen markers and thousands separators the model sometimes keeps.
fn normalise_price(price: &str) -> String {
    price
        .trim()
        .trim_start_matches(['¥', '￥'])
        .trim_end_matches('円')
        .replace([',', '，'], "")
        .trim()
        .to_string()
}

fn line_items(value: &Value) -> Vec<LineItem> {
    let Some(entries) = value.as_array() else {
        log::warn!("Ignoring non-array 'items' in extraction result");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            let text = |key: &str| entry.get(key).and_then(value_text).unwrap_or_default();
            LineItem {
                name: text("name"),
                quantity: text("quantity"),
                unit_price: text("unit_price"),
                total_price: text("total_price"),
            }
        })
        .collect()
}
