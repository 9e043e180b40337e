//! Chat completion gateway used by the ask flow.
//!
//! The [`Completer`] trait takes a system prompt and a user prompt and
//! returns the generated text. [`OpenAICompleter`] calls an
//! OpenAI-compatible `POST /chat/completions` endpoint bounded by
//! `completion.timeout_ms`; there are no retries.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use balanced_rag_core::error::{RagError, Result};

use crate::config::CompletionConfig;
use crate::embedding::map_transport_error;

const OPERATION: &str = "completion";

#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// A gateway that refuses every completion.
pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(RagError::upstream(OPERATION, "completion provider is disabled"))
    }
}

pub struct OpenAICompleter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout_ms: u64,
}

impl OpenAICompleter {
    pub fn new(config: &CompletionConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_ms: config.timeout_ms,
        })
    }

    pub fn from_env(config: &CompletionConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(config, api_key)
    }
}

#[async_trait]
impl Completer for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(OPERATION, e, self.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::upstream(
                OPERATION,
                format!("API error {}: {}", status, body_text),
            ));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| map_transport_error(OPERATION, e, self.timeout_ms))?;
        parse_completion_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| RagError::upstream(OPERATION, "invalid response: missing message content"))
}

pub fn create_completer(config: &CompletionConfig) -> anyhow::Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "openai" => Ok(Arc::new(OpenAICompleter::from_env(config)?)),
        other => anyhow::bail!("Unknown completion provider: {}", other),
    }
}
