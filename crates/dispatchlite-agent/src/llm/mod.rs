//! Reasoning oracle: the external language model consulted for selection, ReAct steps,
//! planning and synthesis.
//!
//! Every call is one blocking round trip (no streaming). The HTTP client bounds it with
//! its own timeout; callers only see `OracleUnavailable` or `OracleParseFailure`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

mod openai;


pub use openai::OpenAiOracle;

/// One conversation turn sent to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A complete oracle request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f64,
}

/// External reasoning service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send the turns and return the free-text reply.
    async fn complete(&self, request: OracleRequest) -> DispatchResult<String>;
}

/// Model and sampling settings attached to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleSettings {
    pub model: String,
    pub temperature: f64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
        }
    }
}

/// An oracle paired with the settings used for every call; cheap to clone.
#[derive(Clone)]
pub struct OracleClient {
    oracle: Arc<dyn Oracle>,
    settings: OracleSettings,
}

impl OracleClient {
    pub fn new(oracle: Arc<dyn Oracle>, settings: OracleSettings) -> Self {
        Self { oracle, settings }
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    /// Send arbitrary turns.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> DispatchResult<String> {
        let request = OracleRequest {
            messages,
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
        };
        self.oracle.complete(request).await
    }

    /// System prompt plus one user turn.
    pub async fn ask(&self, system: &str, user: &str) -> DispatchResult<String> {
        self.chat(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .await
    }

    /// Like [`OracleClient::ask`], then strict typed parse of the JSON in the reply.
    pub async fn ask_json<T: DeserializeOwned>(&self, system: &str, user: &str) -> DispatchResult<T> {
        let reply = self.ask(system, user).await?;
        parse_json_reply(&reply)
    }
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("settings", &self.settings)
            .finish()
    }
}

// ─── Reply parsing ──────────────────────────────────────────────────────────

/// Isolate the JSON payload of a reply: strips markdown fences, then slices from the
/// first `{` or `[` to the matching last `}` or `]`.
pub fn extract_json_block(reply: &str) -> Option<&str> {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.trim_start();
        if let Some(end) = text.rfind("```") {
            text = text[..end].trim_end();
        }
    }

    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Strict typed parse of the JSON payload of an oracle reply.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> DispatchResult<T> {
    let block = extract_json_block(reply).ok_or_else(|| {
        DispatchError::parse(format!(
            "no JSON found in reply: {}",
            crate::types::safe_truncate(reply, 120)
        ))
    })?;
    serde_json::from_str(block).map_err(|e| DispatchError::parse(e.to_string()))
}
