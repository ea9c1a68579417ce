//! On-demand model provisioning.
//!
//! Wraps the LLM service's pull operation. The puller streams the service's
//! NDJSON status lines (manifest, downloading, verifying, success) as
//! [`CoreEvent::ProvisionProgress`] events, runs the whole fetch under a
//! timeout, and never lets an error escape its boundary: callers get `false`
//! for "could not provision", nothing else.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;
use crate::events::{CoreEvent, EventBus};

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Fetch `model` onto the service. Returns false on timeout or any
    /// transport error.
    async fn fetch(&self, model: &str) -> bool;
}

/// Pulls models from an Ollama-compatible service via `POST {host}/api/pull`.
pub struct OllamaPuller {
    host: String,
    timeout: Duration,
    bus: EventBus,
    client: reqwest::Client,
}

impl OllamaPuller {
    pub fn new(config: &LlmConfig, bus: EventBus) -> Result<Self> {
        // No per-request timeout on the client: a pull legitimately runs for
        // minutes. The overall deadline lives in fetch().
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.pull_timeout_secs),
            bus,
            client,
        })
    }

    async fn pull(&self, model: &str) -> Result<()> {
        let body = serde_json::json!({ "name": model, "stream": true });

        let mut response = self
            .client
            .post(format!("{}/api/pull", self.host))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("pull request failed {}: {}", status, body_text);
        }

        // One JSON object per line; chunks may split lines arbitrarily.
        let mut buffer = String::new();
        while let Some(chunk) = response.chunk().await? {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if line.is_empty() {
                    continue;
                }
                self.handle_status_line(model, &line)?;
            }
        }
        let tail = buffer.trim();
        if !tail.is_empty() {
            self.handle_status_line(model, tail)?;
        }

        Ok(())
    }

    fn handle_status_line(&self, model: &str, line: &str) -> Result<()> {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return Ok(()), // tolerate noise in the stream
        };

        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            bail!("pull reported error: {}", error);
        }

        if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
            self.bus.publish(CoreEvent::ProvisionProgress {
                model: model.to_string(),
                status: status.to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Provisioner for OllamaPuller {
    async fn fetch(&self, model: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.pull(model)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(model, error = %e, "model pull failed");
                false
            }
            Err(_) => {
                warn!(model, timeout_secs = self.timeout.as_secs(), "model pull timed out");
                false
            }
        }
    }
}
