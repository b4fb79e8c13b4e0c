//! Tool invoker: decides whether a request should be dispatched and runs capabilities
//! under a deadline on a bounded worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatchlite_core::observability::audit_execution_completed;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::cache::{execution_key, ExecutionCache};
use crate::capability::{tokenize, Capability, CapabilityRegistry, Handler};
use crate::chain::ChainScope;
use crate::error::{DispatchError, DispatchResult};
use crate::selector::ToolSelector;
use crate::types::{RequestContext, SelectionResult};

/// Phrases that never warrant a capability call on their own.
pub const DEFAULT_GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hi there",
    "hello there",
    "thanks",
    "thank you",
    "thx",
    "ok",
    "okay",
    "cool",
    "great",
    "yes",
    "no",
    "sure",
    "bye",
    "goodbye",
    "good morning",
    "good afternoon",
    "good evening",
    "good night",
];

#[derive(Debug, Clone)]
pub struct InvokerSettings {
    /// Per-execution deadline.
    pub timeout: Duration,
    /// Maximum concurrent capability executions.
    pub workers: usize,
    /// Requests shorter than this (in chars, trimmed) are never dispatched.
    pub min_input_chars: usize,
    pub greetings: Vec<String>,
    /// Registered chains that may be active inside one another at once.
    pub max_chain_depth: usize,
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            workers: 4,
            min_input_chars: 3,
            greetings: DEFAULT_GREETINGS.iter().map(|s| s.to_string()).collect(),
            max_chain_depth: 8,
        }
    }
}

/// Counters for the invoker. Shared across concurrent requests.
#[derive(Debug, Default)]
pub struct InvokerStats {
    invocations: AtomicU64,
    cache_hits: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvokerStatsSnapshot {
    pub invocations: u64,
    pub cache_hits: u64,
    pub timeouts: u64,
    pub failures: u64,
}

impl InvokerStats {
    pub fn snapshot(&self) -> InvokerStatsSnapshot {
        InvokerStatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

pub struct ToolInvoker {
    registry: Arc<CapabilityRegistry>,
    selector: Arc<ToolSelector>,
    cache: Arc<ExecutionCache>,
    pool: Arc<Semaphore>,
    settings: InvokerSettings,
    stats: InvokerStats,
    call_syntax: Option<Regex>,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        selector: Arc<ToolSelector>,
        cache: Arc<ExecutionCache>,
        settings: InvokerSettings,
    ) -> Self {
        let workers = settings.workers.max(1);
        let call_syntax = Regex::new(r"([A-Za-z_][A-Za-z0-9_.\-]*)\s*\(").ok();
        Self {
            registry,
            selector,
            cache,
            pool: Arc::new(Semaphore::new(workers)),
            settings,
            stats: InvokerStats::default(),
            call_syntax,
        }
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.settings
    }

    pub fn stats(&self) -> InvokerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> &Arc<ExecutionCache> {
        &self.cache
    }

    pub fn selector(&self) -> &Arc<ToolSelector> {
        &self.selector
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    // ─── Dispatch decision ──────────────────────────────────────────────────

    /// Cheap pre-filter: too short, or only a greeting/acknowledgment.
    pub fn is_prefiltered(&self, request: &str) -> bool {
        if request.trim().chars().count() < self.settings.min_input_chars {
            return true;
        }
        let words = tokenize(request).join(" ");
        words.is_empty() || self.settings.greetings.iter().any(|g| *g == words)
    }

    /// `name(args)` where `name` is registered. Arguments are JSON when they parse,
    /// `key=value` pairs as an object, otherwise the raw string.
    pub fn parse_explicit(&self, request: &str) -> Option<SelectionResult> {
        let call_syntax = self.call_syntax.as_ref()?;
        for caps in call_syntax.captures_iter(request) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if !self.registry.contains(name.as_str()) {
                continue;
            }
            let Some(raw) = balanced_args(&request[whole.end()..]) else {
                continue;
            };
            return Some(
                SelectionResult::new(name.as_str(), 1.0, "explicit call syntax")
                    .with_arguments(parse_call_args(raw)),
            );
        }
        None
    }

    /// Whether to dispatch `request`, and to what.
    ///
    /// Pre-filtered requests never reach the selector; explicit syntax short-circuits it.
    pub async fn should_invoke(
        &self,
        request: &str,
        ctx: &RequestContext,
    ) -> Option<SelectionResult> {
        if self.is_prefiltered(request) {
            tracing::debug!("Request pre-filtered, not dispatching");
            return None;
        }
        if let Some(explicit) = self.parse_explicit(request) {
            tracing::debug!(capability = %explicit.capability, "Explicit capability call");
            return Some(explicit);
        }
        self.selector.select(request, ctx).await
    }

    // ─── Execution ──────────────────────────────────────────────────────────

    /// Fail-soft invocation: errors come back as `"Error [Code]: ..."` text.
    pub async fn invoke(&self, selection: &SelectionResult, ctx: &RequestContext) -> String {
        match self.try_invoke(selection, ctx).await {
            Ok(output) => output,
            Err(e) => e.to_fail_soft(),
        }
    }

    /// Invoke the selected capability or chain with the selection's arguments.
    pub async fn try_invoke(
        &self,
        selection: &SelectionResult,
        ctx: &RequestContext,
    ) -> DispatchResult<String> {
        let args = selection.arguments.clone().unwrap_or(Value::Null);
        self.execute(&selection.capability, &args, ctx).await
    }

    /// Run a registered capability or chain by name.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        ctx: &RequestContext,
    ) -> DispatchResult<String> {
        self.execute_within(name, args, ctx, &[]).await
    }

    /// Like [`ToolInvoker::execute`], from inside the registered chains in `active`.
    pub(crate) async fn execute_within(
        &self,
        name: &str,
        args: &Value,
        ctx: &RequestContext,
        active: &[String],
    ) -> DispatchResult<String> {
        match self.registry.get(name) {
            Some(Handler::Capability(capability)) => {
                self.execute_capability(name, capability, args).await
            }
            Some(Handler::Chain(chain)) => {
                let mut path = active.to_vec();
                path.push(name.to_string());
                let reentered = active.iter().any(|c| c == name);
                if reentered || active.len() >= self.settings.max_chain_depth {
                    let path = path.join(" -> ");
                    tracing::warn!(chain = %name, path = %path, "Chain cycle or depth limit");
                    return Err(DispatchError::ChainCycle {
                        chain: name.to_string(),
                        path,
                    });
                }
                let input = args_as_input(args);
                let scope = ChainScope::nested(self, path);
                chain.run(&input, ctx, &scope).await.result
            }
            None => Err(DispatchError::CapabilityNotRegistered {
                name: name.to_string(),
            }),
        }
    }

    async fn execute_capability(
        &self,
        name: &str,
        capability: Arc<dyn Capability>,
        args: &Value,
    ) -> DispatchResult<String> {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
        let key = execution_key(name, args);
        if let Some(hit) = self.cache.get(&key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(capability = %name, "Execution cache hit");
            return Ok(hit);
        }

        let start = Instant::now();
        let outcome = self.run_bounded(name, capability, args.clone()).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            Ok(output) => {
                tracing::debug!(capability = %name, elapsed_ms, "Capability finished");
                audit_execution_completed(name, "ok", elapsed_ms, output.len());
            }
            Err(e) => {
                match e {
                    DispatchError::ExecutionTimeout { .. } => {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed)
                    }
                    _ => self.stats.failures.fetch_add(1, Ordering::Relaxed),
                };
                tracing::warn!(capability = %name, elapsed_ms, error = %e, "Capability failed");
                audit_execution_completed(name, e.code(), elapsed_ms, 0);
            }
        }

        let output = outcome?;
        Ok(self.cache.insert_if_absent(key, output))
    }

    /// Submit to the worker pool and wait at most `timeout`, queueing time included.
    /// An execution that overruns keeps its worker until it returns on its own.
    async fn run_bounded(
        &self,
        name: &str,
        capability: Arc<dyn Capability>,
        args: Value,
    ) -> DispatchResult<String> {
        let pool = self.pool.clone();
        let owned_name = name.to_string();
        let task = async move {
            let permit = pool
                .acquire_owned()
                .await
                .map_err(|e| DispatchError::ExecutionFailure {
                    name: owned_name.clone(),
                    message: format!("worker pool closed: {}", e),
                })?;
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                capability.execute(&args)
            })
            .await;
            match joined {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(DispatchError::ExecutionFailure {
                    name: owned_name,
                    message: e.message,
                }),
                Err(e) if e.is_panic() => Err(DispatchError::ExecutionFailure {
                    name: owned_name,
                    message: "capability panicked".to_string(),
                }),
                Err(e) => Err(DispatchError::ExecutionFailure {
                    name: owned_name,
                    message: e.to_string(),
                }),
            }
        };

        match tokio::time::timeout(self.settings.timeout, task).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DispatchError::ExecutionTimeout {
                name: name.to_string(),
                timeout_secs: self.settings.timeout.as_secs_f64(),
            }),
        }
    }
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker")
            .field("settings", &self.settings)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Text handed to a chain or used as a step input.
pub(crate) fn args_as_input(args: &Value) -> String {
    match args {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Contents up to the `)` that closes an already-consumed `(`.
fn balanced_args(rest: &str) -> Option<&str> {
    let mut depth = 1usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_call_args(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    let pairs: Option<Map<String, Value>> = raw
        .split(',')
        .map(|part| {
            let (k, v) = part.split_once('=')?;
            let k = k.trim();
            if k.is_empty() || k.contains(char::is_whitespace) {
                return None;
            }
            let v = v.trim().trim_matches(|c| c == '"' || c == '\'');
            Some((k.to_string(), Value::String(v.to_string())))
        })
        .collect();
    match pairs {
        Some(map) if !map.is_empty() => Value::Object(map),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::capability::{CapabilityError, FnCapability};
    use crate::testing::{counting_capability, invoker_with_settings as invoker_with, sample_registry};

    fn invoker() -> ToolInvoker {
        invoker_with(sample_registry(), InvokerSettings::default())
    }

    #[test]
    fn test_prefilter_short_and_greetings() {
        let inv = invoker();
        assert!(inv.is_prefiltered("hi"));
        assert!(inv.is_prefiltered("  ok "));
        assert!(inv.is_prefiltered("Thank you!"));
        assert!(inv.is_prefiltered("Good morning."));
        assert!(inv.is_prefiltered("?!?"));
        assert!(!inv.is_prefiltered("hello, what's the weather in Oslo?"));
    }

    #[test]
    fn test_parse_call_args() {
        assert_eq!(parse_call_args(r#"{"city": "Oslo"}"#), json!({"city": "Oslo"}));
        assert_eq!(parse_call_args("city=Oslo, units='metric'"), json!({"city": "Oslo", "units": "metric"}));
        assert_eq!(parse_call_args("2+2"), json!("2+2"));
        assert_eq!(parse_call_args("\"quoted\""), json!("quoted"));
        assert_eq!(parse_call_args("  "), Value::Null);
    }

    #[test]
    fn test_explicit_syntax_requires_registered_name() {
        let inv = invoker();
        let sel = inv.parse_explicit("please run calculator((1+2)*3) now").unwrap();
        assert_eq!(sel.capability, "calculator");
        assert_eq!(sel.confidence, 1.0);
        assert_eq!(sel.arguments, Some(json!("(1+2)*3")));

        assert!(inv.parse_explicit("print(hello)").is_none());
        assert!(inv.parse_explicit("calculator(2+2").is_none());
    }

    #[tokio::test]
    async fn test_should_invoke_paths() {
        let inv = invoker();
        let ctx = RequestContext::new();
        assert!(inv.should_invoke("thanks", &ctx).await.is_none());

        let explicit = inv.should_invoke("weather(city=Oslo)", &ctx).await.unwrap();
        assert_eq!(explicit.arguments, Some(json!({"city": "Oslo"})));

        let selected = inv.should_invoke("what's the weather in Paris?", &ctx).await.unwrap();
        assert_eq!(selected.capability, "weather");
        assert!(selected.arguments.is_none());

        assert!(inv.should_invoke("tell me a story", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_invoke_unknown_capability_is_fail_soft() {
        let inv = invoker();
        let out = inv
            .invoke(&SelectionResult::new("teleporter", 0.9, ""), &RequestContext::new())
            .await;
        assert!(out.starts_with("Error [CapabilityNotRegistered]"));
    }

    #[tokio::test]
    async fn test_execution_cache_skips_second_run() {
        let registry = Arc::new(CapabilityRegistry::new());
        let (echo, count) = counting_capability("echo", "Echo text back", "echo: ");
        registry.register(echo);
        let inv = invoker_with(registry, InvokerSettings::default());
        let ctx = RequestContext::new();

        let sel = SelectionResult::new("echo", 1.0, "").with_arguments(json!("hi"));
        assert_eq!(inv.invoke(&sel, &ctx).await, "echo: hi");
        assert_eq!(inv.invoke(&sel, &ctx).await, "echo: hi");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let other = SelectionResult::new("echo", 1.0, "").with_arguments(json!("bye"));
        assert_eq!(inv.invoke(&other, &ctx).await, "echo: bye");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        let stats = inv.stats();
        assert_eq!(stats.invocations, 3);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let registry = Arc::new(CapabilityRegistry::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        registry.register(Arc::new(FnCapability::new("flaky", "Always fails", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::new("disk on fire"))
        })));
        let inv = invoker_with(registry, InvokerSettings::default());
        let sel = SelectionResult::new("flaky", 1.0, "");

        let out = inv.invoke(&sel, &RequestContext::new()).await;
        assert!(out.starts_with("Error [ExecutionFailure]"));
        assert!(out.contains("disk on fire"));
        inv.invoke(&sel, &RequestContext::new()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(inv.stats().failures, 2);
    }

    #[tokio::test]
    async fn test_panicking_capability_is_execution_failure() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(FnCapability::new("boom", "Panics", |_| {
            panic!("boom");
        })));
        let inv = invoker_with(registry, InvokerSettings::default());
        let err = inv
            .try_invoke(&SelectionResult::new("boom", 1.0, ""), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ExecutionFailure");
    }

    #[tokio::test]
    async fn test_timeout_returns_within_deadline() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(FnCapability::new("slow", "Sleeps", |_| {
            std::thread::sleep(Duration::from_secs(2));
            Ok("done".to_string())
        })));
        let settings = InvokerSettings {
            timeout: Duration::from_millis(200),
            ..InvokerSettings::default()
        };
        let inv = invoker_with(registry, settings);

        let start = Instant::now();
        let out = inv
            .invoke(&SelectionResult::new("slow", 1.0, ""), &RequestContext::new())
            .await;
        let elapsed = start.elapsed();

        assert!(out.starts_with("Error [ExecutionTimeout]"), "{out}");
        assert!(elapsed < Duration::from_millis(1000), "took {elapsed:?}");
        assert_eq!(inv.stats().timeouts, 1);
        assert!(inv.cache().is_empty());
    }

    #[tokio::test]
    async fn test_queueing_counts_against_deadline() {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(FnCapability::new("slow", "Sleeps", |args| {
            std::thread::sleep(Duration::from_millis(600));
            Ok(args.to_string())
        })));
        let settings = InvokerSettings {
            timeout: Duration::from_millis(300),
            workers: 1,
            ..InvokerSettings::default()
        };
        let inv = invoker_with(registry, settings);
        let ctx = RequestContext::new();

        let one = SelectionResult::new("slow", 1.0, "").with_arguments(json!(1));
        let two = SelectionResult::new("slow", 1.0, "").with_arguments(json!(2));
        let first = inv.try_invoke(&one, &ctx);
        let second = inv.try_invoke(&two, &ctx);
        let start = Instant::now();
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap_err().code(), "ExecutionTimeout");
        assert_eq!(b.unwrap_err().code(), "ExecutionTimeout");
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_invocations_agree_on_cached_output() {
        const CALLERS: usize = 16;
        let registry = Arc::new(CapabilityRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        registry.register(Arc::new(FnCapability::new("stamp", "Numbered stamp", move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            Ok(format!("run-{n}"))
        })));
        let settings = InvokerSettings {
            workers: 4,
            ..InvokerSettings::default()
        };
        let inv = Arc::new(invoker_with(registry, settings));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let inv = inv.clone();
                tokio::spawn(async move {
                    let sel = SelectionResult::new("stamp", 1.0, "").with_arguments(json!("same"));
                    inv.try_invoke(&sel, &RequestContext::new()).await.unwrap()
                })
            })
            .collect();
        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }

        assert!(outputs.iter().all(|o| *o == outputs[0]), "{outputs:?}");
        assert_eq!(inv.cache().len(), 1);
        let stats = inv.stats();
        let executed = runs.load(Ordering::SeqCst) as u64;
        assert_eq!(stats.invocations, CALLERS as u64);
        assert_eq!(stats.cache_hits + executed, CALLERS as u64);
        assert_eq!(stats.failures + stats.timeouts, 0);
    }
}
