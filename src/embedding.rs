//! Embedding gateway implementations.
//!
//! - **[`DisabledEmbedder`]** fails every call; used when
//!   `embedding.provider = "disabled"`.
//! - **[`OpenAIEmbedder`]** calls an OpenAI-compatible `POST /embeddings`
//!   endpoint with one request per batch.
//!
//! # Retry Strategy
//!
//! Only HTTP 429 (rate limited) is retried, up to `embedding.max_retries`
//! times with exponential backoff (1s, 2s, 4s, ... capped at 2^5). Every
//! other failure is reported immediately. An elapsed client timeout maps to
//! [`RagError::UpstreamTimeout`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use balanced_rag_core::embedding::Embedder;
use balanced_rag_core::error::{RagError, Result};

use crate::config::EmbeddingConfig;

const OPERATION: &str = "embedding";

/// A gateway that refuses to embed anything.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::upstream(OPERATION, "embedding provider is disabled"))
    }
}

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_ms: u64,
    backoff_base: Duration,
}

impl OpenAIEmbedder {
    /// Build the gateway with an explicit API key.
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model,
            dims,
            max_retries: config.max_retries,
            timeout_ms: config.timeout_secs * 1000,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Build the gateway with the key from `OPENAI_API_KEY`.
    pub fn from_env(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(config, api_key)
    }

    /// Override the first backoff delay (doubled on every retry).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| map_transport_error(OPERATION, e, self.timeout_ms))?;

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| map_transport_error(OPERATION, e, self.timeout_ms))?;
                return parse_embedding_response(&json);
            }

            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 && attempt < self.max_retries {
                let delay = self.backoff_base * (1u32 << attempt.min(5));
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = self.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "embedding request rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(RagError::upstream(
                OPERATION,
                format!("API error {}: {}", status, body_text),
            ));
        }
    }
}

/// Elapsed client deadlines become timeouts; anything else is a failure.
pub(crate) fn map_transport_error(
    operation: &str,
    err: reqwest::Error,
    timeout_ms: u64,
) -> RagError {
    if err.is_timeout() {
        RagError::timeout(operation, timeout_ms)
    } else {
        RagError::upstream(operation, err)
    }
}

/// Extract `data[].embedding` arrays, ordered by `data[].index` when present.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::upstream(OPERATION, "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::upstream(OPERATION, "invalid response: missing embedding"))?;

        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

/// Create the configured embedding gateway.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::from_env(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}
