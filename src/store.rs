use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP client for the document store's index-level APIs.
///
/// `index_url` is the full URL of the target index; entity-type segments and
/// the `_bulk` / `_mapping` suffixes are appended per call.
pub struct DocumentStore {
    client: reqwest::Client,
    index_url: String,
}

impl DocumentStore {
    pub fn new(index_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build document store client")?;
        Ok(Self {
            client,
            index_url: index_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    /// Sends one newline-delimited bulk body for `entity_type`. The caller
    /// guarantees a non-empty, newline-terminated body; the store rejects
    /// empty payloads.
    pub async fn bulk(&self, entity_type: &str, body: String) -> Result<()> {
        let url = format!("{}/{}/_bulk", self.index_url, entity_type);
        debug!(url = %url, bytes = body.len(), "Sending bulk request");
        let response = self
            .client
            .put(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Bulk request failed: {url}"))?;
        Self::check(response, &url).await
    }

    /// Creates the target index unless it already exists. Returns whether a
    /// new index was created.
    pub async fn create_index(&self) -> Result<bool> {
        let exists = self
            .client
            .head(&self.index_url)
            .send()
            .await
            .with_context(|| format!("Index check failed: {}", self.index_url))?
            .status()
            .is_success();
        if exists {
            debug!(url = %self.index_url, "Index already exists");
            return Ok(false);
        }

        let response = self
            .client
            .put(&self.index_url)
            .send()
            .await
            .with_context(|| format!("Index create failed: {}", self.index_url))?;
        Self::check(response, &self.index_url).await?;
        Ok(true)
    }

    /// Installs the field mappings for `entity_type`.
    pub async fn put_mapping(&self, entity_type: &str, mappings: &Value) -> Result<()> {
        let url = format!("{}/{}/_mapping", self.index_url, entity_type);
        let response = self
            .client
            .put(&url)
            .json(mappings)
            .send()
            .await
            .with_context(|| format!("Mapping request failed: {url}"))?;
        Self::check(response, &url).await
    }

    async fn check(response: reqwest::Response, url: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        bail!("Store rejected request: {url} ({status}): {snippet}");
    }
}
