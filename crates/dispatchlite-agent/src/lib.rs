//! dispatchlite agent: capability selection, bounded invocation, chains and a ReAct
//! reasoning loop behind one facade, [`DispatchEngine`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use dispatchlite_agent::{DispatchEngine, EngineConfig, FnCapability, RequestContext};
//!
//! # async fn demo() {
//! let engine = DispatchEngine::new(EngineConfig::default(), None);
//! engine.add_capability(Arc::new(FnCapability::new(
//!     "weather",
//!     "Current weather forecast for a city",
//!     |args| Ok(format!("sunny in {}", args.as_str().unwrap_or("town"))),
//! )));
//! let outcome = engine.process("weather(\"Oslo\")", &RequestContext::new(), false).await;
//! println!("{}", outcome.response);
//! # }
//! ```

pub mod agent_loop;
pub mod cache;
pub mod capability;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod llm;
pub mod selector;
pub mod task_planner;
pub mod types;

#[cfg(test)]
mod testing;

pub use agent_loop::{PlanStepRecord, ReactConfig, ReactLoop, ReactOutcome};
pub use cache::{CacheStats, ExecutionCache, SelectionCache, TtlLruCache};
pub use capability::{Capability, CapabilityError, CapabilityInfo, CapabilityRegistry, FnCapability};
pub use chain::{BranchingChain, Chain, ChainOutcome, ChainScope, ConditionalChain, SequentialChain};
pub use config::EngineConfig;
pub use engine::{DispatchEngine, ProcessOutcome};
pub use error::{DispatchError, DispatchResult};
pub use invoker::{InvokerSettings, InvokerStatsSnapshot, ToolInvoker};
pub use llm::{OpenAiOracle, Oracle, OracleClient, OracleSettings};
pub use selector::{BoostPolicy, Selection, SelectionStrategy, SelectorConfig, ToolSelector};
pub use task_planner::{AgentPlan, TaskPlanner};
pub use types::{
    AgentAction, AgentState, EventSink, NoopEventSink, RequestContext, SelectionResult,
    TracingEventSink,
};
