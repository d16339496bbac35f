//! Item state held by the remote store.

mod currency;
mod items;
mod webclient;

use crate::error::PurchaseError;
use crate::model::CLICK_SCOPE;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

pub(crate) use items::{ItemDetails, ItemValue};
#[cfg(test)]
pub(crate) use items::item_state;
pub(crate) use webclient::{ItemClient, WebClient};

pub const DEFAULT_BASE_URL: &str = "https://myapps.developer.ubuntu.com";

const APPLICATION_JSON: &str = "application/json";
const APPLICATION_HAL_JSON: &str = "application/hal+json";

/// Endpoint layout below the store base URL.
#[derive(Debug, Clone)]
pub struct PayUrls {
    base: String,
}

impl PayUrls {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Package (click) purchases.
    pub fn click(&self) -> String {
        format!("{}/api/2.0/click", self.base)
    }

    /// In-app purchases.
    pub fn inventory(&self) -> String {
        format!("{}/inventory/api/v1/packages", self.base)
    }
}

pub struct ItemStore {
    client: Arc<dyn ItemClient>,
    urls: PayUrls,
    currency: Option<String>,
}

impl ItemStore {
    pub fn new(client: Arc<dyn ItemClient>, urls: PayUrls, currency: Option<String>) -> Self {
        Self {
            client,
            urls,
            currency,
        }
    }

    pub async fn fetch_item(&self, package: &str, item: &str) -> Result<ItemDetails, PurchaseError> {
        if package == CLICK_SCOPE {
            let url = format!("{}/purchases/{item}/", self.urls.click());
            // Unowned packages come back as 404 with an empty object.
            let data = match self.get_json(&url, Method::GET, HeaderMap::new(), String::new()).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(item, "click purchase lookup failed, treating as available: {e}");
                    return Ok(items::available_item(item));
                }
            };
            let details = self.decode_object(&data)?;
            if !details.contains_key("sku") {
                return Ok(items::available_item(item));
            }
            return Ok(details);
        }

        let url = format!("{}/{package}/items/by-sku/{item}", self.urls.inventory());
        let data = self.get_json(&url, Method::GET, HeaderMap::new(), String::new()).await?;
        self.decode_object(&data)
    }

    pub async fn purchased_items(&self, package: &str) -> Result<Vec<ItemDetails>, PurchaseError> {
        let mut headers = HeaderMap::new();

        if package == CLICK_SCOPE {
            headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
            let url = format!("{}/purchases/", self.urls.click());
            let data = self.get_json(&url, Method::GET, headers, String::new()).await?;
            let list = data
                .as_array()
                .ok_or_else(|| PurchaseError::Parse("expected a list of purchases".into()))?;
            return list.iter().map(|entry| self.decode_object(entry)).collect();
        }

        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_HAL_JSON));
        let url = format!("{}/{package}/purchases", self.urls.inventory());
        let data = self.get_json(&url, Method::GET, headers, String::new()).await?;
        if !data.is_object() {
            tracing::warn!(package, "purchase list is not an object, returning no items");
            return Ok(Vec::new());
        }

        let mut purchased = Vec::new();
        for purchase in embedded(&data, "purchases")? {
            let purchase_id = purchase
                .get("id")
                .and_then(Value::as_f64)
                .map(|id| id as u64)
                .unwrap_or_default();
            let device = match purchase.get("requested_device") {
                Some(Value::String(device)) => ItemValue::Str(device.clone()),
                _ => ItemValue::Str(String::new()),
            };
            for entry in embedded(purchase, "items")? {
                let mut details = self.decode_object(entry)?;
                details.insert("requested_device".into(), device.clone());
                details.insert("purchase_id".into(), ItemValue::Uint(purchase_id));
                purchased.push(details);
            }
        }
        Ok(purchased)
    }

    pub async fn acknowledge(&self, package: &str, item: &str) -> Result<ItemDetails, PurchaseError> {
        if package == CLICK_SCOPE {
            return Err(PurchaseError::Unsupported(
                "AcknowledgeItem not supported for packages.".into(),
            ));
        }

        let current = self
            .fetch_item(package, item)
            .await
            .map_err(|source| PurchaseError::ItemNotFound {
                item: item.to_string(),
                package: package.to_string(),
                source: Box::new(source),
            })?;
        let id = current
            .get("id")
            .and_then(ItemValue::as_int)
            .ok_or_else(|| PurchaseError::Parse(format!("item \"{item}\" has no id")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        let url = format!("{}/{package}/items/{id}", self.urls.inventory());
        let body = serde_json::json!({ "state": "acknowledged" }).to_string();
        let data = self.get_json(&url, Method::POST, headers, body).await?;
        self.decode_object(&data)
    }

    pub async fn refund(&self, package: &str, item: &str) -> Result<ItemDetails, PurchaseError> {
        if package != CLICK_SCOPE {
            return Err(PurchaseError::Unsupported(
                "Refunds only supported for packages.".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        let url = format!("{}/refunds/", self.urls.click());
        let body = serde_json::json!({ "name": item }).to_string();
        self.get_json(&url, Method::POST, headers, body).await?;

        self.fetch_item(package, item).await
    }

    async fn get_json(
        &self,
        url: &str,
        method: Method,
        headers: HeaderMap,
        body: String,
    ) -> Result<Value, PurchaseError> {
        let raw = self
            .client
            .call(url, method, headers, body)
            .await
            .map_err(|e| PurchaseError::Request(format!("{e:#}")))?;
        serde_json::from_str(&raw).map_err(|e| PurchaseError::Parse(e.to_string()))
    }

    fn decode_object(&self, value: &Value) -> Result<ItemDetails, PurchaseError> {
        let object = value
            .as_object()
            .ok_or_else(|| PurchaseError::Parse("expected an item object".into()))?;
        Ok(items::decode_item(object, self.currency.as_deref()))
    }
}

/// `value._embedded.<key>` of a HAL document.
fn embedded<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, PurchaseError> {
    value
        .get("_embedded")
        .and_then(|e| e.get(key))
        .and_then(Value::as_array)
        .ok_or_else(|| PurchaseError::Parse(format!("missing _embedded.{key}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    mockall::mock! {
        pub Client {}

        #[async_trait]
        impl ItemClient for Client {
            async fn call(&self, url: &str, method: Method, headers: HeaderMap, body: String) -> Result<String>;
        }
    }

    /// Store backed by `client` with a fixed base URL.
    pub fn store_with(client: MockClient) -> ItemStore {
        ItemStore::new(Arc::new(client), PayUrls::new("https://pay.test"), None)
    }
}
