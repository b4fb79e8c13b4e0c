//! Task planner: decides when a request needs a multi-step plan and asks the oracle for one.
//!
//! Responsibilities:
//! - Planning heuristic (sequencing cues, request length)
//! - Plan generation and strict parsing
//! - Plan progress tracking ([`AgentPlan`])

use serde::{Deserialize, Serialize};

use crate::capability::{render_catalogue, tokenize, CapabilityInfo};
use crate::error::{DispatchError, DispatchResult};
use crate::llm::{extract_json_block, OracleClient};
use crate::types::RequestContext;

/// Words and phrases that suggest an ordered, multi-step request.
pub const SEQUENCING_CUES: &[&str] = &[
    "then",
    "after that",
    "afterwards",
    "first",
    "next",
    "finally",
    "step by step",
    "and then",
    "followed by",
];

const PLANNING_SYSTEM: &str = r#"You break a user request into an ordered plan.

Each step must be a self-contained instruction that can be handled with the available capabilities.
Use as few steps as possible (at most 6). Reply with a single JSON object and nothing else:
{"goal": "<overall goal>", "steps": ["<step 1>", "<step 2>"]}"#;

/// Ordered plan with a forward-only cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPlan {
    pub goal: String,
    pub steps: Vec<String>,
    cursor: usize,
    completed: Vec<String>,
}

impl AgentPlan {
    pub fn new(goal: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            cursor: 0,
            completed: Vec::new(),
        }
    }

    /// Fallback plan: the request itself as the only step.
    pub fn single_step(request: &str) -> Self {
        Self::new(request, vec![request.to_string()])
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Results of the steps completed so far, in order.
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Done once every step has a result.
    pub fn is_done(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.cursor).map(String::as_str)
    }

    /// Record the current step's result and move on. No effect once done.
    pub fn advance(&mut self, result: impl Into<String>) -> bool {
        if self.is_done() {
            return false;
        }
        self.completed.push(result.into());
        self.cursor += 1;
        true
    }
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    goal: String,
    steps: Vec<PlanStepReply>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanStepReply {
    Text(String),
    Detailed { description: String },
}

impl PlanStepReply {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) | Self::Detailed { description: s } => s.trim().to_string(),
        }
    }
}

fn plan_error(message: impl Into<String>) -> DispatchError {
    DispatchError::PlanParseFailure {
        message: message.into(),
    }
}

pub struct TaskPlanner {
    oracle: Option<OracleClient>,
    length_threshold: usize,
}

impl TaskPlanner {
    pub fn new(oracle: Option<OracleClient>, length_threshold: usize) -> Self {
        Self {
            oracle,
            length_threshold,
        }
    }

    /// Sequencing cue present, or request longer than the length threshold (in chars).
    pub fn needs_planning(&self, request: &str) -> bool {
        if request.trim().chars().count() > self.length_threshold {
            return true;
        }
        let padded = format!(" {} ", tokenize(request).join(" "));
        SEQUENCING_CUES
            .iter()
            .any(|cue| padded.contains(&format!(" {} ", cue)))
    }

    /// Ask the oracle for a plan.
    pub async fn build_plan(
        &self,
        request: &str,
        ctx: &RequestContext,
        capabilities: &[CapabilityInfo],
    ) -> DispatchResult<AgentPlan> {
        let oracle = self.oracle.as_ref().ok_or_else(|| DispatchError::OracleUnavailable {
            message: "no oracle configured".to_string(),
        })?;

        let mut prompt = format!(
            "## Available capabilities\n{}\n\n## Request\n{}",
            render_catalogue(capabilities),
            request
        );
        if !ctx.is_empty() {
            prompt.push_str("\n\n## Context\n");
            prompt.push_str(&ctx.render());
        }

        let reply = oracle.ask(PLANNING_SYSTEM, &prompt).await?;
        let plan = Self::parse_plan(&reply, request)?;
        tracing::info!(goal = %plan.goal, steps = plan.len(), "Plan generated");
        Ok(plan)
    }

    /// Strict parse of a plan reply; an empty goal becomes the request.
    pub(crate) fn parse_plan(raw: &str, request: &str) -> DispatchResult<AgentPlan> {
        let block = extract_json_block(raw).ok_or_else(|| plan_error("no JSON object in plan reply"))?;
        let reply: PlanReply = serde_json::from_str(block).map_err(|e| plan_error(e.to_string()))?;
        let steps: Vec<String> = reply
            .steps
            .into_iter()
            .map(PlanStepReply::into_text)
            .filter(|s| !s.is_empty())
            .collect();
        if steps.is_empty() {
            return Err(plan_error("plan has no steps"));
        }
        let goal = if reply.goal.trim().is_empty() {
            request.to_string()
        } else {
            reply.goal.trim().to_string()
        };
        Ok(AgentPlan::new(goal, steps))
    }
}

impl std::fmt::Debug for TaskPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPlanner")
            .field("length_threshold", &self.length_threshold)
            .field("has_oracle", &self.oracle.is_some())
            .finish()
    }
}
