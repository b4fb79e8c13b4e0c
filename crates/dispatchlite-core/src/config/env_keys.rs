//! Environment variable keys and their alias chains.
//!
//! Primary keys use the `DISPATCHLITE_*` prefix; `OPENAI_*` style names are accepted as
//! fallbacks so an existing `.env` for an OpenAI-compatible endpoint works unchanged.

/// Oracle (LLM endpoint) settings.
pub mod llm {
    pub const API_BASE: &str = "DISPATCHLITE_API_BASE";
    pub const API_BASE_ALIASES: &[&str] = &["OPENAI_API_BASE", "OPENAI_BASE_URL", "BASE_URL"];

    pub const API_KEY: &str = "DISPATCHLITE_API_KEY";
    pub const API_KEY_ALIASES: &[&str] = &["OPENAI_API_KEY", "API_KEY"];

    pub const MODEL: &str = "DISPATCHLITE_MODEL";
    pub const MODEL_ALIASES: &[&str] = &["OPENAI_MODEL", "MODEL"];

    pub const TEMPERATURE: &str = "DISPATCHLITE_TEMPERATURE";

    /// Client-side timeout for a single oracle round trip, in seconds.
    pub const TIMEOUT_SECS: &str = "DISPATCHLITE_ORACLE_TIMEOUT_SECS";
}

/// Tool selection.
pub mod selection {
    /// One of `rule`, `oracle`, `confidence`, `hybrid`, `ensemble`.
    pub const STRATEGY: &str = "DISPATCHLITE_SELECTION_STRATEGY";
    pub const CONFIDENCE_THRESHOLD: &str = "DISPATCHLITE_CONFIDENCE_THRESHOLD";
    pub const RELAXED_THRESHOLD: &str = "DISPATCHLITE_RELAXED_THRESHOLD";
    pub const CACHE_CAPACITY: &str = "DISPATCHLITE_SELECTION_CACHE_CAPACITY";
    pub const CACHE_TTL_SECS: &str = "DISPATCHLITE_SELECTION_CACHE_TTL_SECS";
}

/// Capability execution.
pub mod invoker {
    pub const TIMEOUT_SECS: &str = "DISPATCHLITE_INVOKE_TIMEOUT_SECS";
    pub const WORKERS: &str = "DISPATCHLITE_INVOKE_WORKERS";
    pub const CACHE_CAPACITY: &str = "DISPATCHLITE_EXEC_CACHE_CAPACITY";
    pub const CACHE_TTL_SECS: &str = "DISPATCHLITE_EXEC_CACHE_TTL_SECS";
    pub const MIN_INPUT_CHARS: &str = "DISPATCHLITE_MIN_INPUT_CHARS";
}

/// Reasoning loop and planner.
pub mod reasoning {
    pub const MAX_ITERATIONS: &str = "DISPATCHLITE_MAX_ITERATIONS";
    pub const PLANNING_LENGTH_THRESHOLD: &str = "DISPATCHLITE_PLANNING_LENGTH_THRESHOLD";
    pub const ENABLE_PLANNING: &str = "DISPATCHLITE_ENABLE_PLANNING";
}

/// Logging and audit trail.
pub mod observability {
    pub const QUIET: &str = "DISPATCHLITE_QUIET";
    pub const LOG_LEVEL: &str = "DISPATCHLITE_LOG_LEVEL";
    pub const LOG_JSON: &str = "DISPATCHLITE_LOG_JSON";
    pub const AUDIT_LOG: &str = "DISPATCHLITE_AUDIT_LOG";
}
