//! Chain primitives: sequential pipelines, predicate-guarded pipelines and branching.
//!
//! Chains run their steps through a [`ChainScope`] over the [`ToolInvoker`], so steps
//! share the execution cache, the worker pool and the deadline with direct invocations.
//! A step may name another registered chain; the scope tracks which registered chains
//! are active so a chain that leads back to itself fails with `ChainCycle`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DispatchError, DispatchResult};
use crate::invoker::ToolInvoker;
use crate::types::RequestContext;

/// Predicate over the chain input and the request context.
pub type Predicate = Arc<dyn Fn(&str, &RequestContext) -> bool + Send + Sync>;

/// Audit record of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStep {
    pub capability: String,
    pub input: String,
    pub output: String,
}

/// Final result (or first error) plus the steps executed so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub result: DispatchResult<String>,
    pub steps: Vec<ChainStep>,
    /// Branch taken, for branching chains.
    pub branch: Option<String>,
}

impl ChainOutcome {
    fn failed(err: DispatchError) -> Self {
        Self {
            result: Err(err),
            steps: Vec::new(),
            branch: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Step executor handed to [`Chain::run`]: the invoker plus the registered chains
/// currently running, outermost first.
pub struct ChainScope<'a> {
    invoker: &'a ToolInvoker,
    active: Vec<String>,
}

impl<'a> ChainScope<'a> {
    /// Top-level scope with no active chains.
    pub fn new(invoker: &'a ToolInvoker) -> Self {
        Self {
            invoker,
            active: Vec::new(),
        }
    }

    pub(crate) fn nested(invoker: &'a ToolInvoker, active: Vec<String>) -> Self {
        Self { invoker, active }
    }

    pub fn invoker(&self) -> &ToolInvoker {
        self.invoker
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    /// Run one step: a capability or a registered chain.
    pub async fn execute(&self, name: &str, args: &Value, ctx: &RequestContext) -> DispatchResult<String> {
        self.invoker.execute_within(name, args, ctx, &self.active).await
    }
}

/// A composed pipeline, registered and selected like a capability.
#[async_trait]
pub trait Chain: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(&self, input: &str, ctx: &RequestContext, scope: &ChainScope<'_>) -> ChainOutcome;
}

// ─── Sequential ─────────────────────────────────────────────────────────────

/// Output of step *i* is the input of step *i+1*. Stops at the first failure.
#[derive(Debug, Clone)]
pub struct SequentialChain {
    name: String,
    description: String,
    steps: Vec<String>,
}

impl SequentialChain {
    pub fn new<I, S>(name: impl Into<String>, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<String> = steps.into_iter().map(Into::into).collect();
        let description = format!("Runs {} in sequence", steps.join(" -> "));
        Self {
            name: name.into(),
            description,
            steps,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    async fn thread(&self, input: &str, ctx: &RequestContext, scope: &ChainScope<'_>) -> ChainOutcome {
        let mut current = input.to_string();
        let mut steps = Vec::with_capacity(self.steps.len());
        for capability in &self.steps {
            let args = Value::String(current.clone());
            match scope.execute(capability, &args, ctx).await {
                Ok(output) => {
                    steps.push(ChainStep {
                        capability: capability.clone(),
                        input: std::mem::take(&mut current),
                        output: output.clone(),
                    });
                    current = output;
                }
                Err(e) => {
                    tracing::warn!(chain = %self.name, step = %capability, error = %e, "Chain step failed");
                    return ChainOutcome {
                        result: Err(e),
                        steps,
                        branch: None,
                    };
                }
            }
        }
        ChainOutcome {
            result: Ok(current),
            steps,
            branch: None,
        }
    }
}

#[async_trait]
impl Chain for SequentialChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, input: &str, ctx: &RequestContext, scope: &ChainScope<'_>) -> ChainOutcome {
        self.thread(input, ctx, scope).await
    }
}

// ─── Conditional ────────────────────────────────────────────────────────────

/// A sequential chain that only runs when its predicate holds.
pub struct ConditionalChain {
    inner: SequentialChain,
    predicate: Predicate,
}

impl ConditionalChain {
    pub fn new<F, I, S>(name: impl Into<String>, predicate: F, steps: I) -> Self
    where
        F: Fn(&str, &RequestContext) -> bool + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = SequentialChain::new(name, steps);
        let description = format!("Conditionally {}", inner.description.to_lowercase());
        Self {
            inner: inner.with_description(description),
            predicate: Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }
}

#[async_trait]
impl Chain for ConditionalChain {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn description(&self) -> &str {
        &self.inner.description
    }

    async fn run(&self, input: &str, ctx: &RequestContext, scope: &ChainScope<'_>) -> ChainOutcome {
        if !(self.predicate)(input, ctx) {
            tracing::debug!(chain = %self.inner.name, "Chain condition not met");
            return ChainOutcome::failed(DispatchError::ChainConditionUnmet {
                chain: self.inner.name.clone(),
            });
        }
        self.inner.thread(input, ctx, scope).await
    }
}

impl std::fmt::Debug for ConditionalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalChain")
            .field("inner", &self.inner)
            .finish()
    }
}

// ─── Branching ──────────────────────────────────────────────────────────────

struct Branch {
    name: String,
    predicate: Predicate,
    chain: Arc<dyn Chain>,
}

/// Runs the first branch whose predicate holds, else the default branch.
pub struct BranchingChain {
    name: String,
    description: String,
    branches: Vec<Branch>,
    default_branch: Option<String>,
}

impl BranchingChain {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            branches: Vec::new(),
            default_branch: None,
        }
    }

    /// Append a branch; predicates are evaluated in the order branches are added.
    #[must_use]
    pub fn branch<F>(mut self, name: impl Into<String>, predicate: F, chain: Arc<dyn Chain>) -> Self
    where
        F: Fn(&str, &RequestContext) -> bool + Send + Sync + 'static,
    {
        self.branches.push(Branch {
            name: name.into(),
            predicate: Arc::new(predicate),
            chain,
        });
        self
    }

    /// Branch to run when no predicate matches.
    #[must_use]
    pub fn with_default(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }

    pub fn branch_names(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.name.as_str()).collect()
    }

    fn pick(&self, input: &str, ctx: &RequestContext) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|b| (b.predicate)(input, ctx))
            .or_else(|| {
                let default = self.default_branch.as_deref()?;
                self.branches.iter().find(|b| b.name == default)
            })
    }
}

#[async_trait]
impl Chain for BranchingChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, input: &str, ctx: &RequestContext, scope: &ChainScope<'_>) -> ChainOutcome {
        let Some(branch) = self.pick(input, ctx) else {
            return ChainOutcome::failed(DispatchError::NoBranchMatched {
                chain: self.name.clone(),
            });
        };
        tracing::debug!(chain = %self.name, branch = %branch.name, "Branch selected");
        let mut outcome = branch.chain.run(input, ctx, scope).await;
        outcome.branch = Some(branch.name.clone());
        outcome
    }
}

impl std::fmt::Debug for BranchingChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchingChain")
            .field("name", &self.name)
            .field("branches", &self.branch_names())
            .field("default_branch", &self.default_branch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::capability::{CapabilityRegistry, FnCapability};
    use crate::testing::{counting_capability, invoker};

    fn registry() -> Arc<CapabilityRegistry> {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(FnCapability::new("upper", "Uppercase text", |args| {
            Ok(args.as_str().unwrap_or_default().to_uppercase())
        })));
        registry.register(Arc::new(FnCapability::new("exclaim", "Append an exclamation", |args| {
            Ok(format!("{}!", args.as_str().unwrap_or_default()))
        })));
        registry
    }

    #[tokio::test]
    async fn test_sequential_threads_output_into_next_input() {
        let inv = invoker(registry());
        let chain = SequentialChain::new("shout", ["upper", "exclaim"]);
        let outcome = chain.run("hello", &RequestContext::new(), &ChainScope::new(&inv)).await;

        assert_eq!(outcome.result, Ok("HELLO!".to_string()));
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].input, "hello");
        assert_eq!(outcome.steps[1].input, outcome.steps[0].output);
        assert_eq!(outcome.steps[1].output, "HELLO!");
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let inv = invoker(registry());
        let chain = SequentialChain::new("broken", ["upper", "missing", "exclaim"]);
        let outcome = chain.run("hi", &RequestContext::new(), &ChainScope::new(&inv)).await;

        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(
            outcome.result,
            Err(DispatchError::CapabilityNotRegistered {
                name: "missing".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_conditional_skips_when_predicate_false() {
        let registry = registry();
        let (counted, count) = counting_capability("count", "Counts calls", "");
        registry.register(counted);
        let inv = invoker(registry);
        let chain = ConditionalChain::new(
            "only_questions",
            |input: &str, _: &RequestContext| input.ends_with('?'),
            ["count", "upper"],
        );

        let skipped = chain.run("statement", &RequestContext::new(), &ChainScope::new(&inv)).await;
        assert_eq!(
            skipped.result,
            Err(DispatchError::ChainConditionUnmet {
                chain: "only_questions".to_string()
            })
        );
        assert!(skipped.steps.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let ran = chain.run("really?", &RequestContext::new(), &ChainScope::new(&inv)).await;
        assert_eq!(ran.result, Ok("REALLY?".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    fn branching(default: Option<&str>, b1: bool, b2: bool) -> BranchingChain {
        let chain = BranchingChain::new("router", "Routes by predicate")
            .branch(
                "B1",
                move |_: &str, _: &RequestContext| b1,
                Arc::new(SequentialChain::new("b1", ["upper"])),
            )
            .branch(
                "B2",
                move |_: &str, _: &RequestContext| b2,
                Arc::new(SequentialChain::new("b2", ["exclaim"])),
            );
        match default {
            Some(d) => chain.with_default(d),
            None => chain,
        }
    }

    #[tokio::test]
    async fn test_branching_first_true_branch_wins_over_default() {
        let inv = invoker(registry());
        let outcome = branching(Some("B1"), false, true)
            .run("go", &RequestContext::new(), &ChainScope::new(&inv))
            .await;
        assert_eq!(outcome.branch.as_deref(), Some("B2"));
        assert_eq!(outcome.result, Ok("go!".to_string()));
        assert_eq!(outcome.steps[0].capability, "exclaim");
    }

    #[tokio::test]
    async fn test_branching_without_match_or_default() {
        let inv = invoker(registry());
        let outcome = branching(None, false, false)
            .run("go", &RequestContext::new(), &ChainScope::new(&inv))
            .await;
        assert_eq!(
            outcome.result,
            Err(DispatchError::NoBranchMatched {
                chain: "router".to_string()
            })
        );
        assert!(outcome.steps.is_empty());
    }

    #[tokio::test]
    async fn test_branching_falls_back_to_default() {
        let inv = invoker(registry());
        let outcome = branching(Some("B1"), false, false)
            .run("go", &RequestContext::new(), &ChainScope::new(&inv))
            .await;
        assert_eq!(outcome.branch.as_deref(), Some("B1"));
        assert_eq!(outcome.result, Ok("GO".to_string()));

        let unknown_default = branching(Some("B9"), false, false)
            .run("go", &RequestContext::new(), &ChainScope::new(&inv))
            .await;
        assert_eq!(unknown_default.result.unwrap_err().code(), "NoBranchMatched");
    }

    #[tokio::test]
    async fn test_registered_chain_runs_through_invoker() {
        let registry = registry();
        registry.register_chain(Arc::new(SequentialChain::new("shout", ["upper", "exclaim"])));
        let inv = invoker(registry.clone());

        let out = inv
            .execute("shout", &Value::String("hey".into()), &RequestContext::new())
            .await;
        assert_eq!(out, Ok("HEY!".to_string()));
        assert!(registry.info("shout").unwrap().is_chain);
        assert!(registry.capability("shout").is_none());
    }

    #[tokio::test]
    async fn test_self_referencing_chain_fails_soft() {
        let registry = registry();
        registry.register_chain(Arc::new(SequentialChain::new("loop", ["upper", "loop"])));
        let inv = invoker(registry);

        let selection = crate::types::SelectionResult::new("loop", 1.0, "").with_arguments(Value::String("x".into()));
        let out = inv.invoke(&selection, &RequestContext::new()).await;
        assert!(out.starts_with("Error [ChainCycle]"), "{out}");
        assert!(out.contains("loop -> loop"), "{out}");
    }

    #[tokio::test]
    async fn test_mutually_recursive_chains_are_rejected() {
        let registry = registry();
        registry.register_chain(Arc::new(SequentialChain::new("ping", ["upper", "pong"])));
        registry.register_chain(Arc::new(SequentialChain::new("pong", ["exclaim", "ping"])));
        let inv = invoker(registry);

        let err = inv
            .execute("ping", &Value::String("hi".into()), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::ChainCycle {
                chain: "ping".to_string(),
                path: "ping -> pong -> ping".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_nested_chains_within_depth_limit() {
        let registry = registry();
        registry.register_chain(Arc::new(SequentialChain::new("inner", ["upper"])));
        registry.register_chain(Arc::new(SequentialChain::new("outer", ["inner", "exclaim"])));
        let inv = invoker(registry.clone());
        let out = inv
            .execute("outer", &Value::String("ok".into()), &RequestContext::new())
            .await;
        assert_eq!(out, Ok("OK!".to_string()));

        let shallow = crate::testing::invoker_with_settings(
            registry,
            crate::invoker::InvokerSettings {
                max_chain_depth: 1,
                ..Default::default()
            },
        );
        let err = shallow
            .execute("outer", &Value::String("ok".into()), &RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ChainCycle");
    }
}
