//! Thin HTTP client for the daemon's control API: start a run, cancel a
//! run, query run/issue status. Commands that only need to read
//! the on-disk state tree (`status`, `logs`, `tasks`) go straight through
//! `jeeves-core::JsonStateStore` instead of round-tripping through the
//! daemon — the daemon's job is to drive runs and fan out live events, not
//! to gate every read.
use anyhow::{bail, Result};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    base_url: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(addr: &str, port: u16) -> Self {
        Self { base_url: format!("http://{addr}:{port}"), client: reqwest::Client::new() }
    }

    pub async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("request to daemon at {url} failed: {e}\n(is 'jeeves-daemon' running?)"))?;
        Self::into_result(response).await
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("request to daemon at {url} failed: {e}\n(is 'jeeves-daemon' running?)"))?;
        Self::into_result(response).await
    }

    async fn into_result<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<serde_json::Value>(&bytes)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            bail!("daemon returned {status}: {message}");
        }
        serde_json::from_slice(&bytes).map_err(|e| anyhow::anyhow!("failed to decode daemon response: {e}"))
    }
}
