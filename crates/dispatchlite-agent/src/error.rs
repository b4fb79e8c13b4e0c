//! Error taxonomy for the dispatch engine.
//!
//! Components are fail-soft: they convert these into text for the caller via
//! [`DispatchError::to_fail_soft`] rather than propagating them, except on the
//! explicit `try_*` entry points.

use thiserror::Error;

/// Errors produced while selecting, invoking or reasoning.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("no capability reached the confidence threshold {threshold:.2}: {rationale}")]
    NoCapabilitySelected { threshold: f64, rationale: String },

    #[error("capability not registered: '{name}'")]
    CapabilityNotRegistered { name: String },

    #[error("capability '{name}' did not finish within {timeout_secs:.1}s")]
    ExecutionTimeout { name: String, timeout_secs: f64 },

    #[error("capability '{name}' failed: {message}")]
    ExecutionFailure { name: String, message: String },

    #[error("oracle response could not be parsed: {message}")]
    OracleParseFailure { message: String },

    #[error("oracle request failed: {message}")]
    OracleUnavailable { message: String },

    #[error("condition for chain '{chain}' was not met")]
    ChainConditionUnmet { chain: String },

    #[error("plan could not be parsed: {message}")]
    PlanParseFailure { message: String },

    #[error("no branch of chain '{chain}' matched and no default branch is set")]
    NoBranchMatched { chain: String },

    #[error("chain '{chain}' re-entered or nested too deep: {path}")]
    ChainCycle { chain: String, path: String },
}

impl DispatchError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCapabilitySelected { .. } => "NoCapabilitySelected",
            Self::CapabilityNotRegistered { .. } => "CapabilityNotRegistered",
            Self::ExecutionTimeout { .. } => "ExecutionTimeout",
            Self::ExecutionFailure { .. } => "ExecutionFailure",
            Self::OracleParseFailure { .. } => "OracleParseFailure",
            Self::OracleUnavailable { .. } => "OracleUnavailable",
            Self::ChainConditionUnmet { .. } => "ChainConditionUnmet",
            Self::PlanParseFailure { .. } => "PlanParseFailure",
            Self::NoBranchMatched { .. } => "NoBranchMatched",
            Self::ChainCycle { .. } => "ChainCycle",
        }
    }

    /// Text form handed back to callers of fail-soft operations.
    pub fn to_fail_soft(&self) -> String {
        format!("Error [{}]: {}", self.code(), self)
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::OracleParseFailure {
            message: message.into(),
        }
    }
}

/// Whether a fail-soft string came from [`DispatchError::to_fail_soft`].
pub fn is_fail_soft_error(text: &str) -> bool {
    text.starts_with("Error [")
}

/// Convenience alias for engine operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
