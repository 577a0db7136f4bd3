//! CLI command implementations.

mod holders;
mod populate;

pub use holders::{handle_holders, handle_progress};
pub use populate::handle_populate;

use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Shared HTTP helper for talking to the server.
pub(crate) struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub(crate) fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub(crate) async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response =
            self.client.get(&url).send().await.with_context(|| format!("GET {url} failed"))?;
        Self::parse(response).await
    }

    pub(crate) async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        Self::parse(response).await
    }

    async fn parse(response: reqwest::Response) -> Result<serde_json::Value> {
        let status = response.status();
        let body: serde_json::Value =
            response.json().await.context("server returned a non-JSON body")?;

        if status.is_client_error() || status.is_server_error() {
            let error = body["error"].as_str().unwrap_or("unknown error");
            match body.get("details").and_then(serde_json::Value::as_str) {
                Some(details) => bail!("server error ({status}): {error}: {details}"),
                None => bail!("server error ({status}): {error}"),
            }
        }

        Ok(body)
    }
}
