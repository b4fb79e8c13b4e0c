//! Unified configuration layer.
//!
//! Every environment read goes through this module; the rest of the workspace works
//! with the typed structs in [`schema`].
//!
//! - `loader`: `env_or`, `env_optional`, `env_bool`, `.env` handling
//! - `schema`: `LlmConfig`, `SelectionConfig`, `InvokerConfig`, `ReasoningConfig`, `ObservabilityConfig`
//! - `env_keys`: key constants and alias chains

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{
    env_bool, env_f64, env_is_set, env_optional, env_or, env_usize, load_dotenv,
    load_dotenv_from_dir, remove_env_var, set_env_var, ScopedEnvGuard,
};
pub use schema::{InvokerConfig, LlmConfig, ObservabilityConfig, ReasoningConfig, SelectionConfig};
