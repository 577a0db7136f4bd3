//! HTTP client for the indexing service.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

use crate::indexer::IndexerError;

/// Thin JSON client over the indexing API.
///
/// The base URL carries the API key as a path segment (provider convention),
/// so error messages must never echo the URL — network failures are
/// sanitized the same way the node client sanitizes them.
pub struct IndexerClient {
    client: Client,
    base_url: String,
}

impl IndexerClient {
    /// Creates a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .use_rustls_tls()
            .user_agent("holderscope/0.3")
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build indexer http client");
                IndexerError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self { client, base_url })
    }

    fn sanitize(error: &reqwest::Error) -> IndexerError {
        if error.is_timeout() {
            IndexerError::Timeout
        } else if error.is_connect() {
            IndexerError::ConnectionFailed("connection refused or unreachable".to_string())
        } else if error.is_body() || error.is_decode() {
            IndexerError::InvalidResponse("response body error".to_string())
        } else {
            IndexerError::ConnectionFailed("network error".to_string())
        }
    }

    async fn handle(response: reqwest::Response) -> Result<serde_json::Value, IndexerError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let raw_text = response.text().await.unwrap_or_default();
            let truncated = if raw_text.len() > 512 {
                format!("{}... (truncated)", &raw_text[..512])
            } else {
                raw_text
            };
            return Err(IndexerError::HttpError(status, truncated));
        }

        response.json::<serde_json::Value>().await.map_err(|e| Self::sanitize(&e))
    }

    /// Issues a GET request against `path` with query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on transport failure, non-2xx status, or a
    /// non-JSON body.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, IndexerError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response =
            self.client.get(&url).query(query).send().await.map_err(|e| Self::sanitize(&e))?;
        Self::handle(response).await
    }

    /// Issues a POST request with a JSON body against `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError`] on transport failure, non-2xx status, or a
    /// non-JSON body.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, IndexerError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response =
            self.client.post(&url).json(body).send().await.map_err(|e| Self::sanitize(&e))?;
        Self::handle(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_json_with_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/getOwnersForContract")
            .match_query(mockito::Matcher::UrlEncoded("contractAddress".into(), "0xabc".into()))
            .with_status(200)
            .with_body(r#"{"owners":[]}"#)
            .create_async()
            .await;

        let client = IndexerClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let value = client
            .get_json("getOwnersForContract", &[("contractAddress", "0xabc".to_string())])
            .await
            .unwrap();

        assert!(value["owners"].is_array());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_preserved_for_classification() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/getAssetTransfers")
            .with_status(400)
            .with_body("Log response size exceeded limit")
            .create_async()
            .await;

        let client = IndexerClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let err = client.post_json("getAssetTransfers", &json!({})).await.unwrap_err();

        assert!(err.is_oversize());
    }

    #[tokio::test]
    async fn test_trailing_slash_normalized() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let url = format!("{}/", server.url());
        let client = IndexerClient::new(url, Duration::from_secs(5)).unwrap();
        client.get_json("/ping", &[]).await.unwrap();

        mock.assert_async().await;
    }
}
