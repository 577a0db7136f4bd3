//! JSON-RPC node client with semaphore-based concurrency control.

use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;

use crate::chain::ChainError;

/// Configuration for node client concurrency and timeout behavior.
#[derive(Debug, Clone)]
pub struct NodeClientConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Maximum number of concurrent HTTP requests allowed.
    pub concurrent_limit: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            concurrent_limit: 32,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for a single JSON-RPC node endpoint.
///
/// Concurrency is bounded by a semaphore so a population run fanning out
/// dozens of batches cannot exhaust the connection pool or trip the
/// provider's connection-level limits.
pub struct NodeClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: NodeClientConfig,
}

impl NodeClient {
    /// Creates a node client for the given endpoint with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(rpc_url: impl Into<String>) -> Result<Self, ChainError> {
        Self::with_config(NodeClientConfig { rpc_url: rpc_url.into(), ..Default::default() })
    }

    /// Creates a node client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: NodeClientConfig) -> Result<Self, ChainError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout + Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("holderscope/0.3")
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build node http client");
                ChainError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    /// Sanitizes network errors to prevent endpoint/key disclosure in logs
    /// and client-visible messages.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_body() || error.is_decode() {
            "response body error".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Sends a raw JSON-RPC payload (single request or batch) and returns the
    /// parsed response body.
    ///
    /// # Errors
    ///
    /// - [`ChainError::Timeout`] if the request times out
    /// - [`ChainError::ConcurrencyLimit`] if the semaphore is closed
    /// - [`ChainError::HttpError`] for non-success HTTP status codes
    /// - [`ChainError::ConnectionFailed`] for network-level failures
    /// - [`ChainError::InvalidResponse`] when the body is not JSON
    pub async fn send(&self, payload: &serde_json::Value) -> Result<serde_json::Value, ChainError> {
        let body = Bytes::from(
            serde_json::to_vec(payload)
                .map_err(|e| ChainError::InvalidResponse(format!("unserializable payload: {e}")))?,
        );

        let _permit = Arc::clone(&self.concurrent_limit)
            .acquire_owned()
            .await
            .map_err(|_| ChainError::ConcurrencyLimit)?;

        tracing::trace!(
            available_permits = self.concurrent_limit.available_permits(),
            "rpc request started"
        );

        let result = self
            .client
            .post(&self.config.rpc_url)
            .header("content-type", "application/json")
            // Bytes::clone is O(1); retries in the caller reuse the body cheaply
            .body(body.clone())
            .timeout(self.config.request_timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(ChainError::Timeout),
            Err(e) => return Err(ChainError::ConnectionFailed(Self::sanitize_network_error(&e))),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let raw_text = response.text().await.unwrap_or_default();
            let truncated = if raw_text.len() > 256 {
                format!("{}... (truncated)", &raw_text[..256])
            } else {
                raw_text
            };
            return Err(ChainError::HttpError(status, truncated));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ChainError::InvalidResponse(Self::sanitize_network_error(&e)))
    }

    /// Fetches the current chain tip via `eth_blockNumber`.
    ///
    /// # Errors
    ///
    /// Propagates transport errors and surfaces a malformed result as
    /// [`ChainError::InvalidResponse`].
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let response = self
            .send(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "eth_blockNumber",
                "params": [],
                "id": 1,
            }))
            .await?;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(serde_json::Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            return Err(ChainError::RpcError(code as i32, message.to_string()));
        }

        let hex_str = response
            .get("result")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ChainError::InvalidResponse("missing block number result".into()))?;

        let stripped = hex_str
            .strip_prefix("0x")
            .ok_or_else(|| ChainError::InvalidResponse("block number missing 0x prefix".into()))?;

        u64::from_str_radix(stripped, 16)
            .map_err(|e| ChainError::InvalidResponse(format!("bad block number: {e}")))
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}
