//! Decoding of store JSON into item details.
//!
//! Store responses are loosely typed. Each known field gets explicit
//! handling; everything else passes through as the closest variant.

use crate::store::currency;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub type ItemDetails = BTreeMap<String, ItemValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Map(ItemDetails),
}

impl ItemValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ItemValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ItemValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        ItemValue::Str(s.to_string())
    }
}

const TIMESTAMP_FIELDS: [&str; 3] = ["acknowledged_timestamp", "completed_timestamp", "refundable_until"];

/// Decode one item object. `currency` is the user's preferred currency code.
pub fn decode_item(object: &Map<String, Value>, currency: Option<&str>) -> ItemDetails {
    let mut details = ItemDetails::new();
    for (key, value) in object {
        match value {
            Value::String(s) => {
                details.insert(key.clone(), ItemValue::Str(s.clone()));
            }
            Value::Bool(b) => {
                details.insert(key.clone(), ItemValue::Bool(*b));
            }
            Value::Number(n) if key == "id" => {
                if let Some(id) = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
                    details.insert(key.clone(), ItemValue::Int(id));
                }
            }
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    details.insert(key.clone(), ItemValue::Float(f));
                }
            }
            Value::Object(inner) => {
                let inner = decode_item(inner, currency);
                if key == "prices" {
                    if let Some(price) = display_price(&inner, currency) {
                        details.insert("price".into(), ItemValue::Str(price));
                    }
                }
                details.insert(key.clone(), ItemValue::Map(inner));
            }
            // Treated as "never" and normalized below.
            Value::Null if key == "refundable_until" => {
                details.insert(key.clone(), ItemValue::Str(String::new()));
            }
            Value::Null => {}
            Value::Array(_) => {
                tracing::warn!(key = %key, "unable to decode list value in item");
            }
        }
    }

    let normalized = match item_state(&details) {
        Some("Complete") => Some("purchased"),
        Some("Cancelled") => Some("available"),
        _ => None,
    };
    if let Some(state) = normalized {
        details.insert("state".into(), state.into());
    }

    if let Some(name) = details.remove("package_name") {
        details.insert("sku".into(), name);
    }

    for field in TIMESTAMP_FIELDS {
        let Some(ItemValue::Str(raw)) = details.get(field).cloned() else {
            continue;
        };
        if raw.is_empty() {
            details.insert(field.into(), ItemValue::Uint(0));
            continue;
        }
        match OffsetDateTime::parse(&raw, &Rfc3339) {
            Ok(at) => {
                let secs = at.unix_timestamp().max(0) as u64;
                details.insert(field.into(), ItemValue::Uint(secs));
            }
            Err(e) => tracing::warn!(field, value = %raw, "unable to parse timestamp: {e}"),
        }
    }

    details
}

/// Formatted price from a `prices` map of currency code to decimal string.
fn display_price(prices: &ItemDetails, preference: Option<&str>) -> Option<String> {
    let offered: Vec<&str> = prices.keys().map(String::as_str).collect();
    let code = currency::preferred_code(preference, currency::DEFAULT_CURRENCY, &offered);
    let raw = prices.get(code)?.as_str()?;
    match raw.parse::<f64>() {
        Ok(price) => Some(currency::format_price(price, currency::symbol_for(code))),
        Err(e) => {
            tracing::warn!(price = raw, "failed to parse price: {e}");
            None
        }
    }
}

pub fn item_state(details: &ItemDetails) -> Option<&str> {
    details.get("state").and_then(ItemValue::as_str)
}

/// Placeholder for a package the user does not own.
pub fn available_item(sku: &str) -> ItemDetails {
    let mut item = ItemDetails::new();
    item.insert("sku".into(), sku.into());
    item.insert("state".into(), "available".into());
    item.insert("refundable_until".into(), ItemValue::Uint(0));
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> ItemDetails {
        decode_item(value.as_object().unwrap(), None)
    }

    #[test]
    fn normalizes_click_purchase() {
        let item = decode(json!({
            "open_id": "https://login.ubuntu.com/+id/open_id",
            "package_name": "bazbar.example",
            "refundable_until": "2099-12-31T23:59:59Z",
            "state": "Complete"
        }));
        assert_eq!(item_state(&item), Some("purchased"));
        assert_eq!(item.get("sku"), Some(&ItemValue::Str("bazbar.example".into())));
        assert!(!item.contains_key("package_name"));
        assert_eq!(item.get("refundable_until"), Some(&ItemValue::Uint(4_102_444_799)));
    }

    #[test]
    fn null_refundable_until_is_zero() {
        let item = decode(json!({"package_name": "foobar.example", "refundable_until": null}));
        assert_eq!(item.get("refundable_until"), Some(&ItemValue::Uint(0)));
    }

    #[test]
    fn cancelled_is_available() {
        let item = decode(json!({"state": "Cancelled"}));
        assert_eq!(item_state(&item), Some("available"));
    }

    #[test]
    fn id_is_integer_other_numbers_are_float() {
        let item = decode(json!({"id": 42.0, "rating": 4}));
        assert_eq!(item.get("id").and_then(ItemValue::as_int), Some(42));
        assert_eq!(item.get("rating"), Some(&ItemValue::Float(4.0)));
    }

    #[test]
    fn empty_timestamps_are_zero_and_bad_ones_kept() {
        let item = decode(json!({
            "acknowledged_timestamp": "",
            "completed_timestamp": "yesterday"
        }));
        assert_eq!(item.get("acknowledged_timestamp"), Some(&ItemValue::Uint(0)));
        assert_eq!(item.get("completed_timestamp"), Some(&ItemValue::Str("yesterday".into())));
    }

    #[test]
    fn prices_produce_display_price() {
        let value = json!({"prices": {"USD": "0.99", "EUR": "0.89"}});
        let item = decode(value.clone());
        assert_eq!(item.get("price"), Some(&ItemValue::Str("US$0.99".into())));
        assert!(matches!(item.get("prices"), Some(ItemValue::Map(_))));

        let item = decode_item(value.as_object().unwrap(), Some("EUR"));
        assert_eq!(item.get("price"), Some(&ItemValue::Str("€0.89".into())));
    }

    #[test]
    fn serializes_untagged() {
        let item = available_item("foo.example");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            json!({"refundable_until": 0, "sku": "foo.example", "state": "available"})
        );
    }
}
