//! Engine configuration: one struct bundling the settings of every component.

use std::time::Duration;

use dispatchlite_core::config::{InvokerConfig, LlmConfig, ReasoningConfig, SelectionConfig};

use crate::agent_loop::ReactConfig;
use crate::invoker::InvokerSettings;
use crate::llm::OracleSettings;
use crate::selector::{SelectionStrategy, SelectorConfig};

/// Settings for [`crate::DispatchEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub oracle: OracleSettings,
    pub selector: SelectorConfig,
    pub invoker: InvokerSettings,
    pub react: ReactConfig,
    pub selection_cache_capacity: usize,
    pub selection_cache_ttl: Duration,
    pub execution_cache_capacity: usize,
    pub execution_cache_ttl: Duration,
    /// Requests longer than this (in chars) get a plan.
    pub planning_length_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            oracle: OracleSettings::default(),
            selector: SelectorConfig::default(),
            invoker: InvokerSettings::default(),
            react: ReactConfig::default(),
            selection_cache_capacity: 256,
            selection_cache_ttl: Duration::from_secs(300),
            execution_cache_capacity: 256,
            execution_cache_ttl: Duration::from_secs(300),
            planning_length_threshold: 200,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables (and `.env`) via the core config layer.
    pub fn from_env() -> Self {
        let llm = LlmConfig::from_env();
        let selection = SelectionConfig::from_env();
        let invoker = InvokerConfig::from_env();
        let reasoning = ReasoningConfig::from_env();
        Self::from_parts(&llm, &selection, &invoker, &reasoning)
    }

    pub fn from_parts(
        llm: &LlmConfig,
        selection: &SelectionConfig,
        invoker: &InvokerConfig,
        reasoning: &ReasoningConfig,
    ) -> Self {
        let defaults = Self::default();
        let strategy = selection.strategy.parse::<SelectionStrategy>().unwrap_or_else(|e| {
            tracing::warn!("{}; using {}", e, SelectionStrategy::default());
            SelectionStrategy::default()
        });
        let timeout = Duration::try_from_secs_f64(invoker.timeout_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.invoker.timeout);

        Self {
            oracle: OracleSettings {
                model: llm.model.clone(),
                temperature: llm.temperature,
            },
            selector: SelectorConfig {
                strategy,
                confidence_threshold: selection.confidence_threshold,
                relaxed_threshold: selection.relaxed_threshold,
                ..defaults.selector
            },
            invoker: InvokerSettings {
                timeout,
                workers: invoker.workers.max(1),
                min_input_chars: invoker.min_input_chars,
                ..defaults.invoker
            },
            react: ReactConfig {
                max_iterations: reasoning.max_iterations.max(1),
                enable_planning: reasoning.enable_planning,
                ..defaults.react
            },
            selection_cache_capacity: selection.cache_capacity,
            selection_cache_ttl: Duration::from_secs(selection.cache_ttl_secs),
            execution_cache_capacity: invoker.cache_capacity,
            execution_cache_ttl: Duration::from_secs(invoker.cache_ttl_secs),
            planning_length_threshold: reasoning.planning_length_threshold,
        }
    }
}
