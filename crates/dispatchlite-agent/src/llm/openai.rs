//! OpenAI-compatible `/chat/completions` oracle.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dispatchlite_core::config::LlmConfig;
use serde::Deserialize;
use serde_json::json;

use super::{Oracle, OracleRequest};
use crate::error::{DispatchError, DispatchResult};

/// HTTP oracle client. Works with OpenAI, DeepSeek, Qwen, Ollama and other servers that
/// speak the same protocol.
pub struct OpenAiOracle {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiOracle {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::new(
            &config.api_base,
            &config.api_key,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    /// POST the request; returns the raw body of a 2xx response.
    async fn post_chat(&self, request: &OracleRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Oracle request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read oracle response")?;
        if !status.is_success() {
            anyhow::bail!("Oracle API error ({}): {}", status, text);
        }
        Ok(text)
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, request: OracleRequest) -> DispatchResult<String> {
        let body = self.post_chat(&request).await.map_err(|e| {
            tracing::warn!(error = %e, model = %request.model, "Oracle unavailable");
            DispatchError::OracleUnavailable {
                message: format!("{:#}", e),
            }
        })?;

        let response: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| DispatchError::parse(format!("invalid completion body: {}", e)))?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DispatchError::parse("completion has no message content"))
    }
}

// ─── Response types ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
