//! Shared types for the dispatch engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── UTF-8 safe string helpers ──────────────────────────────────────────────

/// Truncate a string at a safe UTF-8 char boundary (from the start).
/// Returns a &str of at most `max_bytes` bytes, never splitting a multi-byte character.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Lower-case and collapse all whitespace runs to a single space.
pub fn normalize_request(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Request context ────────────────────────────────────────────────────────

/// Free-form request context supplied by the host.
///
/// Only [`RequestContext::CACHE_KEY_FIELDS`] participate in selection cache keys, so
/// unrelated fields (session ids, timestamps, ...) never fragment the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext {
    fields: BTreeMap<String, Value>,
}

impl RequestContext {
    /// Capability the host suggests for this request.
    pub const SUGGESTED_CAPABILITY: &'static str = "suggested_capability";
    /// Domain hint (e.g. "math", "weather").
    pub const DOMAIN: &'static str = "domain";
    /// Capabilities used recently in the conversation (array of names).
    pub const RECENT_CAPABILITIES: &'static str = "recent_capabilities";
    /// Results of earlier plan steps (array of strings), set by the planner.
    pub const PREVIOUS_RESULTS: &'static str = "previous_results";
    /// Overall goal of the active plan, set by the planner.
    pub const PLAN_GOAL: &'static str = "plan_goal";

    /// Fields that are part of the selection cache key.
    pub const CACHE_KEY_FIELDS: &'static [&'static str] = &[
        Self::SUGGESTED_CAPABILITY,
        Self::DOMAIN,
        Self::RECENT_CAPABILITIES,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn suggested_capability(&self) -> Option<&str> {
        self.get(Self::SUGGESTED_CAPABILITY).and_then(Value::as_str)
    }

    pub fn domain(&self) -> Option<&str> {
        self.get(Self::DOMAIN).and_then(Value::as_str)
    }

    pub fn recent_capabilities(&self) -> Vec<&str> {
        string_list(self.get(Self::RECENT_CAPABILITIES))
    }

    pub fn previous_results(&self) -> Vec<&str> {
        string_list(self.get(Self::PREVIOUS_RESULTS))
    }

    /// Deterministic serialization of the whitelisted fields only.
    pub fn cache_key_fragment(&self) -> String {
        let subset: BTreeMap<&str, &Value> = Self::CACHE_KEY_FIELDS
            .iter()
            .filter_map(|k| self.fields.get(*k).map(|v| (*k, v)))
            .collect();
        serde_json::to_string(&subset).unwrap_or_default()
    }

    /// Render the context for inclusion in an oracle prompt.
    pub fn render(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("- {}: {}", k, s),
                other => format!("- {}: {}", k, other),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    }
}

// ─── Selection ──────────────────────────────────────────────────────────────

/// Outcome of a successful selection: which capability, how sure, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    /// Name of the selected capability (or registered chain).
    pub capability: String,
    /// Always within [0, 1].
    pub confidence: f64,
    pub rationale: String,
    /// Arguments extracted during selection (explicit syntax or oracle), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl SelectionResult {
    pub fn new(capability: impl Into<String>, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            confidence: clamp_confidence(confidence),
            rationale: rationale.into(),
            arguments: None,
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Use `fallback` as arguments when selection did not extract any.
    #[must_use]
    pub fn or_arguments(mut self, fallback: Value) -> Self {
        if self.arguments.is_none() {
            self.arguments = Some(fallback);
        }
        self
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ─── Reasoning loop records ─────────────────────────────────────────────────

/// Lifecycle of a reasoning loop instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    Thinking,
    Acting,
    Observing,
    Planning,
    Executing,
    Finished,
    Error,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Thinking => "THINKING",
            Self::Acting => "ACTING",
            Self::Observing => "OBSERVING",
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One Think step's decision, completed by the following Act step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub capability: String,
    pub args: Value,
    pub thought: String,
    pub result: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentAction {
    pub fn new(capability: impl Into<String>, args: Value, thought: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            args,
            thought: thought.into(),
            result: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the observation. Only the first call has an effect.
    pub fn record_result(&mut self, result: impl Into<String>) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(result.into());
        true
    }
}

// ─── Event sink ─────────────────────────────────────────────────────────────

/// Receives progress events from the reasoning loop (CLI, RPC, logging, tests).
pub trait EventSink: Send {
    /// Called on every state transition.
    fn on_state(&mut self, _state: AgentState) {}
    /// Called when a Think step produced a thought.
    fn on_thought(&mut self, _thought: &str) {}
    /// Called when a capability is about to be invoked.
    fn on_action(&mut self, _capability: &str, _args: &Value) {}
    /// Called with the observation returned by the capability.
    fn on_observation(&mut self, _capability: &str, _observation: &str) {}
    /// Called when a plan has been generated.
    fn on_plan(&mut self, _goal: &str, _steps: &[String]) {}
    /// Called after each plan step completes.
    fn on_plan_progress(&mut self, _cursor: usize, _total: usize) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}

/// Forwards every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_state(&mut self, state: AgentState) {
        tracing::debug!(state = %state, "Reasoning loop state");
    }

    fn on_thought(&mut self, thought: &str) {
        tracing::debug!(thought = %safe_truncate(thought, 200), "Thought");
    }

    fn on_action(&mut self, capability: &str, args: &Value) {
        tracing::debug!(capability = %capability, args = %args, "Action");
    }

    fn on_observation(&mut self, capability: &str, observation: &str) {
        tracing::debug!(
            capability = %capability,
            observation = %safe_truncate(observation, 200),
            "Observation"
        );
    }

    fn on_plan(&mut self, goal: &str, steps: &[String]) {
        tracing::debug!(goal = %goal, steps = steps.len(), "Plan generated");
    }

    fn on_plan_progress(&mut self, cursor: usize, total: usize) {
        tracing::debug!(cursor, total, "Plan progress");
    }
}
