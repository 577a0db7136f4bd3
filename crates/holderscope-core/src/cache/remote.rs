//! Remote key-value tier over an Upstash-style REST protocol.
//!
//! The protocol is two endpoints with bearer auth:
//!
//! - `GET {base}/get/{key}` → `{"result": <stored string> | null}`
//! - `POST {base}/set/{key}?EX={ttl}` with the value as the request body
//!
//! Values are stored as serialized JSON strings. Every operation is
//! best-effort from the store's perspective: callers log failures and fall
//! through to the filesystem tier.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

use crate::{cache::CacheError, config::RemoteKvConfig};

/// Client for the remote key-value tier.
pub struct RemoteKv {
    client: Client,
    base_url: String,
    token: String,
}

impl RemoteKv {
    /// Builds a client from the remote tier config.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(config: &RemoteKvConfig) -> Result<Self, CacheError> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .use_rustls_tls()
            .user_agent("holderscope/0.3")
            .build()
            .map_err(|e| CacheError::Remote(format!("HTTP client build failed: {e}")))?;

        let mut base_url = config.base_url.clone();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self { client, base_url, token: config.token.clone() })
    }

    /// Reads `key`, returning `None` when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Remote`] on transport or protocol failure.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let url = format!("{}/get/{key}", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CacheError::Remote(sanitize(&e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CacheError::Remote(format!("GET returned {}", response.status())));
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| CacheError::Remote(sanitize(&e)))?;

        match body.get("result") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(stored)) => {
                let value = serde_json::from_str(stored)
                    .map_err(|e| CacheError::Remote(format!("stored value is not JSON: {e}")))?;
                Ok(Some(value))
            }
            Some(other) => Ok(Some(other.clone())),
        }
    }

    /// Writes `value` under `key` with a TTL in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Remote`] on transport or protocol failure.
    pub async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let url = format!("{}/set/{key}", self.base_url);
        let body = serde_json::to_string(value)?;

        let response = self
            .client
            .post(&url)
            .query(&[("EX", ttl_seconds.to_string())])
            .bearer_auth(&self.token)
            .body(body)
            .send()
            .await
            .map_err(|e| CacheError::Remote(sanitize(&e)))?;

        if !response.status().is_success() {
            return Err(CacheError::Remote(format!("SET returned {}", response.status())));
        }

        Ok(())
    }
}

fn sanitize(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection refused or unreachable".to_string()
    } else {
        "network error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(base_url: String) -> RemoteKvConfig {
        RemoteKvConfig {
            enabled: true,
            base_url,
            token: "secret".to_string(),
            disabled_prefixes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_get_stored_string_parsed_as_json() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get/holders_stax")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"result": "{\"totalHolders\": 3}"}"#)
            .create_async()
            .await;

        let kv = RemoteKv::new(&config(server.url())).unwrap();
        let value = kv.get("holders_stax").await.unwrap().unwrap();

        assert_eq!(value["totalHolders"], 3);
    }

    #[tokio::test]
    async fn test_get_null_result_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get/missing")
            .with_status(200)
            .with_body(r#"{"result": null}"#)
            .create_async()
            .await;

        let kv = RemoteKv::new(&config(server.url())).unwrap();
        assert!(kv.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_includes_ttl() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/set/holders_stax")
            .match_query(mockito::Matcher::UrlEncoded("EX".into(), "86400".into()))
            .with_status(200)
            .with_body(r#"{"result": "OK"}"#)
            .create_async()
            .await;

        let kv = RemoteKv::new(&config(server.url())).unwrap();
        kv.set("holders_stax", &json!({"a": 1}), 86_400).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_surfaces_as_remote_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/get/key").with_status(500).create_async().await;

        let kv = RemoteKv::new(&config(server.url())).unwrap();
        assert!(matches!(kv.get("key").await.unwrap_err(), CacheError::Remote(_)));
    }
}
