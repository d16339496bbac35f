use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// One REST round trip. Returns the response body.
#[async_trait]
pub trait ItemClient: Send + Sync {
    async fn call(&self, url: &str, method: Method, headers: HeaderMap, body: String) -> Result<String>;
}

pub struct WebClient {
    http: reqwest::Client,
    device_id: Option<HeaderValue>,
}

impl WebClient {
    pub fn new(user_agent: &str, device_id: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build http client")?;
        let device_id = device_id
            .filter(|id| !id.is_empty())
            .map(HeaderValue::from_str)
            .transpose()
            .context("device id is not a valid header value")?;
        Ok(Self { http, device_id })
    }
}

#[async_trait]
impl ItemClient for WebClient {
    async fn call(&self, url: &str, method: Method, mut headers: HeaderMap, body: String) -> Result<String> {
        if let Some(id) = &self.device_id {
            headers.insert(HeaderName::from_static(DEVICE_ID_HEADER), id.clone());
        }
        tracing::debug!(%method, url, "store request");

        let resp = self
            .http
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("Error in response")?;

        let status = resp.status();
        if status != StatusCode::OK {
            bail!("HTTP Error: {}: {}", status.as_u16(), status);
        }
        resp.text().await.context("Error reading response body")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn sends_device_id_and_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/2.0/click/purchases/")
            .match_header("x-device-id", "abc123")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = WebClient::new("pay-service-test", Some("abc123")).unwrap();
        let body = client
            .call(
                &format!("{}/api/2.0/click/purchases/", server.url()),
                Method::GET,
                HeaderMap::new(),
                String::new(),
            )
            .await
            .unwrap();
        assert_eq!(body, "[]");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn omits_device_id_when_unknown() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/refunds/")
            .match_header("x-device-id", Matcher::Missing)
            .match_body(r#"{"name":"foo.example"}"#)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = WebClient::new("pay-service-test", None).unwrap();
        client
            .call(
                &format!("{}/refunds/", server.url()),
                Method::POST,
                HeaderMap::new(),
                r#"{"name":"foo.example"}"#.into(),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("{}")
            .create_async()
            .await;

        let client = WebClient::new("pay-service-test", None).unwrap();
        let err = client
            .call(&format!("{}/missing", server.url()), Method::GET, HeaderMap::new(), String::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP Error: 404: 404 Not Found");
    }
}
