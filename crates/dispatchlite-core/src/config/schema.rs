//! Configuration structs grouped by concern, loaded from the environment.

use super::env_keys::{invoker, llm, observability as obv_keys, reasoning, selection};
use super::loader::{env_bool, env_f64, env_optional, env_or, env_usize};

/// Oracle endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Load from the environment (reads `.env` first); empty values use defaults.
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let api_base = env_or(llm::API_BASE, llm::API_BASE_ALIASES, || {
            "https://api.openai.com/v1".to_string()
        });
        let model = env_or(llm::MODEL, llm::MODEL_ALIASES, || {
            Self::default_model_for_base(&api_base).to_string()
        });
        Self {
            api_key: env_or(llm::API_KEY, llm::API_KEY_ALIASES, String::new),
            model,
            temperature: env_f64(llm::TEMPERATURE, &[], 0.0),
            timeout_secs: env_usize(llm::TIMEOUT_SECS, &[], 60) as u64,
            api_base,
        }
    }

    /// Like [`LlmConfig::from_env`] but `None` when the key or base is missing.
    pub fn try_from_env() -> Option<Self> {
        let cfg = Self::from_env();
        if cfg.api_key.trim().is_empty() || cfg.api_base.trim().is_empty() {
            None
        } else {
            Some(cfg)
        }
    }

    /// Default model inferred from the API base when none is configured.
    pub fn default_model_for_base(api_base: &str) -> &'static str {
        if api_base.contains("localhost:11434") || api_base.contains("127.0.0.1:11434") {
            "qwen2.5:7b"
        } else if api_base.contains("api.deepseek.com") {
            "deepseek-chat"
        } else if api_base.contains("dashscope.aliyuncs.com") {
            "qwen-plus"
        } else {
            "gpt-4o"
        }
    }
}

/// Tool selection settings.
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Raw strategy name; parsed by the agent crate.
    pub strategy: String,
    pub confidence_threshold: f64,
    pub relaxed_threshold: f64,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
}

impl SelectionConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            strategy: env_or(selection::STRATEGY, &[], || "hybrid".to_string()),
            confidence_threshold: env_f64(selection::CONFIDENCE_THRESHOLD, &[], 0.5),
            relaxed_threshold: env_f64(selection::RELAXED_THRESHOLD, &[], 0.3),
            cache_capacity: env_usize(selection::CACHE_CAPACITY, &[], 256),
            cache_ttl_secs: env_usize(selection::CACHE_TTL_SECS, &[], 300) as u64,
        }
    }
}

/// Capability execution settings.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub timeout_secs: f64,
    pub workers: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub min_input_chars: usize,
}

impl InvokerConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            timeout_secs: env_f64(invoker::TIMEOUT_SECS, &[], 30.0),
            workers: env_usize(invoker::WORKERS, &[], 4).max(1),
            cache_capacity: env_usize(invoker::CACHE_CAPACITY, &[], 256),
            cache_ttl_secs: env_usize(invoker::CACHE_TTL_SECS, &[], 300) as u64,
            min_input_chars: env_usize(invoker::MIN_INPUT_CHARS, &[], 3),
        }
    }
}

/// Reasoning loop settings.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub max_iterations: usize,
    pub planning_length_threshold: usize,
    pub enable_planning: bool,
}

impl ReasoningConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            max_iterations: env_usize(reasoning::MAX_ITERATIONS, &[], 5).max(1),
            planning_length_threshold: env_usize(reasoning::PLANNING_LENGTH_THRESHOLD, &[], 200),
            enable_planning: env_bool(reasoning::ENABLE_PLANNING, &[], true),
        }
    }
}

/// Observability: quiet mode, log level, JSON output, audit log path.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    /// Cached for the process lifetime.
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::QUIET, &[], false),
                log_level: env_or(obv_keys::LOG_LEVEL, &[], || "dispatchlite=info".to_string()),
                log_json: env_bool(obv_keys::LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::AUDIT_LOG, &[]),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::{set_env_var, ScopedEnvGuard};

    #[test]
    fn test_default_model_for_base() {
        assert_eq!(LlmConfig::default_model_for_base("http://localhost:11434/v1"), "qwen2.5:7b");
        assert_eq!(LlmConfig::default_model_for_base("https://api.deepseek.com/v1"), "deepseek-chat");
        assert_eq!(LlmConfig::default_model_for_base("https://api.openai.com/v1"), "gpt-4o");
    }

    #[test]
    fn test_selection_config_reads_overrides() {
        set_env_var(selection::STRATEGY, "ensemble");
        set_env_var(selection::CONFIDENCE_THRESHOLD, "0.7");
        let _g1 = ScopedEnvGuard(selection::STRATEGY);
        let _g2 = ScopedEnvGuard(selection::CONFIDENCE_THRESHOLD);

        let cfg = SelectionConfig::from_env();
        assert_eq!(cfg.strategy, "ensemble");
        assert!((cfg.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.cache_capacity, 256);
    }

    #[test]
    fn test_reasoning_config_floor() {
        set_env_var(reasoning::MAX_ITERATIONS, "0");
        let _g = ScopedEnvGuard(reasoning::MAX_ITERATIONS);
        assert_eq!(ReasoningConfig::from_env().max_iterations, 1);
    }
}
