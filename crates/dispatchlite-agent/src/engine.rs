//! `DispatchEngine`: the single entry point that wires registry, selector, invoker,
//! planner and reasoning loop together.

use std::sync::Arc;

use anyhow::Result;
use dispatchlite_core::config::LlmConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::agent_loop::{ReactLoop, ReactOutcome, DIRECT_ANSWER_SYSTEM};
use crate::cache::{ExecutionCache, SelectionCache};
use crate::capability::{Capability, CapabilityRegistry};
use crate::chain::Chain;
use crate::config::EngineConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::invoker::{InvokerStatsSnapshot, ToolInvoker};
use crate::llm::{OpenAiOracle, Oracle, OracleClient};
use crate::selector::{SelectionStrategy, ToolSelector};
use crate::task_planner::{AgentPlan, TaskPlanner};
use crate::types::{EventSink, RequestContext, SelectionResult, TracingEventSink};

/// Result of [`DispatchEngine::process`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutcome {
    /// Unique per call; also attached to the request's log span.
    pub request_id: String,
    pub response: String,
    /// Capability or chain that produced the response (single-shot path only).
    pub capability: Option<String>,
    pub selection: Option<SelectionResult>,
    pub reasoning: Option<ReactOutcome>,
}

pub struct DispatchEngine {
    config: EngineConfig,
    registry: Arc<CapabilityRegistry>,
    selector: Arc<ToolSelector>,
    invoker: Arc<ToolInvoker>,
    planner: Arc<TaskPlanner>,
    oracle: Option<OracleClient>,
    react: Option<ReactLoop>,
}

impl DispatchEngine {
    /// Build an engine. Without an oracle only rule-based selection and the single-shot
    /// path are available.
    pub fn new(mut config: EngineConfig, oracle: Option<Arc<dyn Oracle>>) -> Self {
        let oracle = oracle.map(|o| OracleClient::new(o, config.oracle.clone()));
        if oracle.is_none()
            && !matches!(
                config.selector.strategy,
                SelectionStrategy::RuleBased | SelectionStrategy::Hybrid
            )
        {
            tracing::warn!(
                strategy = %config.selector.strategy,
                "No oracle configured, falling back to rule-based selection"
            );
            config.selector.strategy = SelectionStrategy::RuleBased;
        }

        let registry = Arc::new(CapabilityRegistry::new());
        let selection_cache = Arc::new(SelectionCache::new(
            config.selection_cache_capacity,
            config.selection_cache_ttl,
        ));
        let selector = Arc::new(ToolSelector::new(
            registry.clone(),
            selection_cache,
            oracle.clone(),
            config.selector.clone(),
        ));
        let execution_cache = Arc::new(ExecutionCache::new(
            config.execution_cache_capacity,
            config.execution_cache_ttl,
        ));
        let invoker = Arc::new(ToolInvoker::new(
            registry.clone(),
            selector.clone(),
            execution_cache,
            config.invoker.clone(),
        ));
        let planner = Arc::new(TaskPlanner::new(oracle.clone(), config.planning_length_threshold));
        let react = oracle.clone().map(|client| {
            ReactLoop::new(invoker.clone(), client, planner.clone(), config.react.clone())
        });

        Self {
            config,
            registry,
            selector,
            invoker,
            planner,
            oracle,
            react,
        }
    }

    /// Engine configured from the environment; uses the HTTP oracle when an API key is set.
    pub fn from_env() -> Result<Self> {
        let config = EngineConfig::from_env();
        let oracle: Option<Arc<dyn Oracle>> = match LlmConfig::try_from_env() {
            Some(llm) => Some(Arc::new(OpenAiOracle::from_config(&llm)?)),
            None => {
                tracing::warn!("No oracle API key configured; running without an oracle");
                None
            }
        };
        Ok(Self::new(config, oracle))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<ToolSelector> {
        &self.selector
    }

    pub fn invoker(&self) -> &Arc<ToolInvoker> {
        &self.invoker
    }

    pub fn stats(&self) -> InvokerStatsSnapshot {
        self.invoker.stats()
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    // ─── Management ─────────────────────────────────────────────────────────

    pub fn add_capability(&self, capability: Arc<dyn Capability>) {
        tracing::debug!(capability = %capability.name(), "Capability registered");
        self.registry.register(capability);
    }

    pub fn add_capabilities<I>(&self, capabilities: I)
    where
        I: IntoIterator<Item = Arc<dyn Capability>>,
    {
        for capability in capabilities {
            self.add_capability(capability);
        }
    }

    /// Register a chain under its name; selections may then name it like a capability.
    pub fn register_chain(&self, chain: Arc<dyn Chain>) {
        tracing::debug!(chain = %chain.name(), "Chain registered");
        self.registry.register_chain(chain);
    }

    /// Up to `top_k` candidates above the relaxed threshold, best first.
    pub async fn rank_capabilities(
        &self,
        request: &str,
        ctx: &RequestContext,
        top_k: usize,
    ) -> Vec<SelectionResult> {
        self.selector.select_many(request, ctx, top_k).await
    }

    pub fn needs_planning(&self, request: &str) -> bool {
        self.planner.needs_planning(request)
    }

    pub async fn build_plan(&self, request: &str, ctx: &RequestContext) -> DispatchResult<AgentPlan> {
        self.planner
            .build_plan(request, ctx, &self.registry.infos())
            .await
    }

    // ─── Processing ─────────────────────────────────────────────────────────

    /// Fail-soft: errors come back as text in `response`.
    pub async fn process(
        &self,
        request: &str,
        ctx: &RequestContext,
        use_reasoning_loop: bool,
    ) -> ProcessOutcome {
        self.process_with_events(request, ctx, use_reasoning_loop, &mut TracingEventSink)
            .await
    }

    pub async fn process_with_events(
        &self,
        request: &str,
        ctx: &RequestContext,
        use_reasoning_loop: bool,
        sink: &mut dyn EventSink,
    ) -> ProcessOutcome {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("process", request_id = %request_id);
        self.dispatch(request_id, request, ctx, use_reasoning_loop, sink)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        request_id: String,
        request: &str,
        ctx: &RequestContext,
        use_reasoning_loop: bool,
        sink: &mut dyn EventSink,
    ) -> ProcessOutcome {
        if use_reasoning_loop {
            if let Some(react) = &self.react {
                let outcome = react.run(request, ctx, sink).await;
                return ProcessOutcome {
                    request_id,
                    response: outcome.answer.clone(),
                    capability: None,
                    selection: None,
                    reasoning: Some(outcome),
                };
            }
            tracing::warn!("Reasoning loop requested without an oracle, using single-shot dispatch");
        }

        match self.invoker.should_invoke(request, ctx).await {
            Some(selection) => {
                let selection = selection.or_arguments(Value::String(request.to_string()));
                let response = self.invoker.invoke(&selection, ctx).await;
                ProcessOutcome {
                    request_id,
                    response,
                    capability: Some(selection.capability.clone()),
                    selection: Some(selection),
                    reasoning: None,
                }
            }
            None => ProcessOutcome {
                request_id,
                response: self.direct_answer(request).await,
                capability: None,
                selection: None,
                reasoning: None,
            },
        }
    }

    async fn direct_answer(&self, request: &str) -> String {
        let Some(oracle) = &self.oracle else {
            return DispatchError::NoCapabilitySelected {
                threshold: self.config.selector.confidence_threshold,
                rationale: "no capability matched and no oracle is configured".to_string(),
            }
            .to_fail_soft();
        };
        match oracle.ask(DIRECT_ANSWER_SYSTEM, request).await {
            Ok(answer) => answer.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Direct answer failed");
                e.to_fail_soft()
            }
        }
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("capabilities", &self.registry.len())
            .field("strategy", &self.config.selector.strategy)
            .field("has_oracle", &self.oracle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::capability::FnCapability;
    use crate::chain::SequentialChain;
    use crate::testing::{counting_capability, sample_capabilities, ScriptedOracle};
    use crate::types::NoopEventSink;

    fn rule_engine() -> DispatchEngine {
        let config = EngineConfig {
            selector: crate::selector::SelectorConfig {
                strategy: SelectionStrategy::RuleBased,
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        let engine = DispatchEngine::new(config, None);
        engine.add_capabilities(sample_capabilities());
        engine
    }

    #[tokio::test]
    async fn test_single_shot_dispatches_selected_capability() {
        let engine = rule_engine();
        let outcome = engine
            .process("what is the weather forecast in Paris", &RequestContext::new(), false)
            .await;
        assert_eq!(outcome.capability.as_deref(), Some("weather"));
        assert!(outcome.response.starts_with("sunny in"));
        assert!(outcome.reasoning.is_none());
        assert!(!outcome.request_id.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_call_and_greeting() {
        let engine = rule_engine();
        let outcome = engine.process("calculator(2+2)", &RequestContext::new(), false).await;
        assert_eq!(outcome.response, "4");
        assert_eq!(outcome.selection.unwrap().confidence, 1.0);

        let hello = engine.process("hello", &RequestContext::new(), false).await;
        assert!(hello.capability.is_none());
        assert!(hello.response.starts_with("Error [NoCapabilitySelected]"));
    }

    #[tokio::test]
    async fn test_direct_answer_when_nothing_matches() {
        // Nothing registered, so selection declines without consulting the oracle.
        let oracle = Arc::new(ScriptedOracle::with_replies(["I'm doing well, thanks!"]));
        let engine = DispatchEngine::new(EngineConfig::default(), Some(oracle.clone()));
        let outcome = engine
            .process("how are you doing today", &RequestContext::new(), false)
            .await;
        assert!(outcome.capability.is_none());
        assert_eq!(outcome.response, "I'm doing well, thanks!");
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_reasoning_loop_path() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            r#"{"thought": "t", "action": "echo", "action_input": "ping"}"#,
            r#"{"thought": "t", "action": "final_answer", "answer": "pong"}"#,
        ]));
        let engine = DispatchEngine::new(EngineConfig::default(), Some(oracle.clone()));
        let (echo, count) = counting_capability("echo", "Echo the input back", "echo:");
        engine.add_capability(echo);

        let outcome = engine
            .process_with_events("please echo ping", &RequestContext::new(), true, &mut NoopEventSink)
            .await;
        assert_eq!(outcome.response, "pong");
        let reasoning = outcome.reasoning.unwrap();
        assert_eq!(reasoning.actions[0].result.as_deref(), Some("echo:ping"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reasoning_without_oracle_falls_back_to_single_shot() {
        let engine = rule_engine();
        let outcome = engine.process("calculator(2+2)", &RequestContext::new(), true).await;
        assert!(outcome.reasoning.is_none());
        assert_eq!(outcome.response, "4");
    }

    #[tokio::test]
    async fn test_registered_chain_runs_through_process() {
        let engine = rule_engine();
        engine.add_capability(Arc::new(FnCapability::new("shout", "Uppercase text", |args| {
            Ok(args.as_str().unwrap_or_default().to_uppercase())
        })));
        engine.register_chain(Arc::new(SequentialChain::new("forecast_loud", ["weather", "shout"])));

        let outcome = engine
            .process("forecast_loud(\"Oslo\")", &RequestContext::new(), false)
            .await;
        assert_eq!(outcome.capability.as_deref(), Some("forecast_loud"));
        assert_eq!(outcome.response, "SUNNY IN OSLO");
    }

    #[tokio::test]
    async fn test_rank_and_planning_passthroughs() {
        let engine = rule_engine();
        let ranked = engine
            .rank_capabilities("search the internet for news", &RequestContext::new(), 2)
            .await;
        assert_eq!(ranked[0].capability, "web_search");
        assert!(ranked.len() <= 2);

        assert!(engine.needs_planning("check the weather then search the news"));
        let err = engine
            .build_plan("check the weather then search the news", &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OracleUnavailable");
    }

    #[test]
    fn test_oracle_strategies_downgrade_without_oracle() {
        let config = EngineConfig {
            selector: crate::selector::SelectorConfig {
                strategy: SelectionStrategy::Ensemble,
                ..Default::default()
            },
            ..EngineConfig::default()
        };
        let engine = DispatchEngine::new(config, None);
        assert_eq!(engine.config().selector.strategy, SelectionStrategy::RuleBased);
        assert!(!engine.has_oracle());
    }
}
