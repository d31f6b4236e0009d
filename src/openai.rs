//! Shared HTTP plumbing for OpenAI-compatible endpoints.
//!
//! Embeddings, transcription, and chat completions all authenticate with
//! `OPENAI_API_KEY`. `OPENAI_BASE_URL` overrides the API root, which lets
//! tests and self-hosted gateways stand in for the real service.
//!
//! # Retry Strategy
//!
//! JSON requests go through [`OpenAiClient::post_json`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use reqwest::multipart::Form;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    backend: &'static str,
}

impl OpenAiClient {
    /// Build a client from the environment. `backend` names the calling
    /// collaborator in error messages.
    pub fn from_env(backend: &'static str, timeout_secs: u64) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(backend, api_key, base_url, timeout_secs)
    }

    pub fn new(
        backend: &'static str,
        api_key: String,
        base_url: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            backend,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body with retry/backoff and return the parsed response.
    pub async fn post_json(&self, path: &str, body: &Value, max_retries: u32) -> Result<Value> {
        let url = self.url(path);
        let mut last_err = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(backend = self.backend, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = Error::backend(self.backend, format!("API error {}: {}", status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(Error::backend(self.backend, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::backend(self.backend, "request failed after retries")))
    }

    /// POST a multipart form once and return the parsed response.
    pub async fn post_multipart(&self, path: &str, form: Form) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::backend(self.backend, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::backend(
                self.backend,
                format!("API error {}: {}", status, body_text),
            ));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_cleanly() {
        let c = OpenAiClient::new("test", "k".into(), "http://localhost:9/v1/".into(), 5).unwrap();
        assert_eq!(c.url("/embeddings"), "http://localhost:9/v1/embeddings");
        assert_eq!(c.url("chat/completions"), "http://localhost:9/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_backend_error() {
        let c = OpenAiClient::new("test", "k".into(), "http://127.0.0.1:1".into(), 2).unwrap();
        let err = c
            .post_json("embeddings", &serde_json::json!({}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
    }
}
