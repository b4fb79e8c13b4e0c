//! Test doubles shared by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{ExecutionCache, SelectionCache};
use crate::capability::{Capability, CapabilityError, CapabilityRegistry, FnCapability};
use crate::error::{DispatchError, DispatchResult};
use crate::invoker::{InvokerSettings, ToolInvoker};
use crate::llm::{Oracle, OracleClient, OracleRequest, OracleSettings};
use crate::selector::{SelectionStrategy, SelectorConfig, ToolSelector};

/// Oracle that replays queued replies and records every request.
///
/// When the queue is empty it answers with the fallback reply, or `OracleUnavailable`
/// when no fallback is set.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<DispatchResult<String>>>,
    fallback: Mutex<Option<String>>,
    requests: Mutex<Vec<OracleRequest>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let oracle = Self::new();
        for reply in replies {
            oracle.push(reply);
        }
        oracle
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: DispatchError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    #[must_use]
    pub fn with_fallback(self, reply: impl Into<String>) -> Self {
        *self.fallback.lock().unwrap() = Some(reply.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Concatenated content of the last user turn of request `i`.
    pub fn user_prompt(&self, i: usize) -> String {
        self.requests()
            .get(i)
            .and_then(|r| r.messages.iter().rev().find(|m| m.role == "user").cloned())
            .map(|m| m.content)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: OracleRequest) -> DispatchResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        match self.fallback.lock().unwrap().clone() {
            Some(reply) => Ok(reply),
            None => Err(DispatchError::OracleUnavailable {
                message: "script exhausted".to_string(),
            }),
        }
    }
}

pub fn client(oracle: &Arc<ScriptedOracle>) -> OracleClient {
    OracleClient::new(oracle.clone(), OracleSettings::default())
}

/// Capability that echoes its arguments with a prefix and counts executions.
pub fn counting_capability(
    name: &str,
    description: &str,
    prefix: &'static str,
) -> (Arc<dyn Capability>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let cap = FnCapability::new(name, description, move |args: &Value| {
        seen.fetch_add(1, Ordering::SeqCst);
        let text = match args {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(format!("{prefix}{text}"))
    });
    (Arc::new(cap), count)
}

/// Calculator, weather and web_search capabilities.
pub fn sample_capabilities() -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(FnCapability::new(
            "calculator",
            "Evaluate arithmetic expressions and math formulas",
            |args| match args.as_str() {
                Some("2+2") | Some("2 + 2") => Ok("4".to_string()),
                Some(other) => Ok(format!("result of {other}")),
                None => Err(CapabilityError::new("expected an expression string")),
            },
        )),
        Arc::new(FnCapability::new(
            "weather",
            "Current weather forecast and temperature for a city",
            |args| Ok(format!("sunny in {}", args.as_str().unwrap_or("somewhere"))),
        )),
        Arc::new(FnCapability::new(
            "web_search",
            "Search the internet for pages and news",
            |args| Ok(format!("results for {args}")),
        )),
    ]
}

/// Registry holding [`sample_capabilities`].
pub fn sample_registry() -> Arc<CapabilityRegistry> {
    let registry = Arc::new(CapabilityRegistry::new());
    for capability in sample_capabilities() {
        registry.register(capability);
    }
    registry
}

/// Rule-based invoker over `registry`, no oracle.
pub fn invoker(registry: Arc<CapabilityRegistry>) -> ToolInvoker {
    invoker_with_settings(registry, InvokerSettings::default())
}

pub fn invoker_with_settings(registry: Arc<CapabilityRegistry>, settings: InvokerSettings) -> ToolInvoker {
    let selector = Arc::new(ToolSelector::new(
        registry.clone(),
        Arc::new(SelectionCache::new(16, Duration::from_secs(60))),
        None,
        SelectorConfig {
            strategy: SelectionStrategy::RuleBased,
            ..SelectorConfig::default()
        },
    ));
    ToolInvoker::new(
        registry,
        selector,
        Arc::new(ExecutionCache::new(16, Duration::from_secs(60))),
        settings,
    )
}
