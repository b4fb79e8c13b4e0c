//! Prompt building and reply parsing for the reasoning loop.

use serde::Deserialize;
use serde_json::Value;

use crate::capability::{render_catalogue, CapabilityInfo};
use crate::error::{DispatchError, DispatchResult};
use crate::llm::parse_json_reply;
use crate::types::{safe_truncate, AgentAction, RequestContext};

/// Reserved action name that ends the loop.
pub const FINAL_ANSWER: &str = "final_answer";

pub(super) const REACT_SYSTEM: &str = r#"You solve the user's task by reasoning step by step and calling capabilities.

On every turn reply with a single JSON object and nothing else:
{"thought": "<your reasoning>", "action": "<capability name or final_answer>", "action_input": <JSON input for the capability>, "answer": "<only when action is final_answer>"}

Call one capability per turn. When the observations are enough, use action "final_answer" and put the answer in "answer"."#;

pub(super) const SYNTHESIS_SYSTEM: &str = r#"You write the final answer for the user.

Use only the information gathered so far. If it is incomplete, give the best answer possible and say what is missing. Reply with plain text."#;

pub(crate) const DIRECT_ANSWER_SYSTEM: &str =
    "You are a helpful assistant. Answer the user's message directly and concisely.";

/// One parsed Think step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(super) struct ReactStep {
    #[serde(default)]
    pub thought: String,
    pub action: String,
    #[serde(default)]
    pub action_input: Value,
    #[serde(default)]
    pub answer: Option<String>,
}

impl ReactStep {
    pub fn is_final(&self) -> bool {
        self.action.trim().eq_ignore_ascii_case(FINAL_ANSWER)
    }

    /// The final answer text: `answer`, else a string `action_input`, else the thought.
    pub fn final_text(&self) -> String {
        if let Some(answer) = self.answer.as_deref().filter(|a| !a.trim().is_empty()) {
            return answer.to_string();
        }
        match &self.action_input {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Null => self.thought.clone(),
            other => other.to_string(),
        }
    }
}

pub(super) fn parse_step(reply: &str) -> DispatchResult<ReactStep> {
    let step: ReactStep = parse_json_reply(reply)?;
    if step.action.trim().is_empty() {
        return Err(DispatchError::parse("empty action"));
    }
    Ok(step)
}

/// Render the action history; long observations are cut at `max_chars` bytes.
pub(super) fn render_history(actions: &[AgentAction], max_chars: usize) -> String {
    if actions.is_empty() {
        return "None yet.".to_string();
    }
    actions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let observation = a.result.as_deref().unwrap_or("(none)");
            let shown = safe_truncate(observation, max_chars);
            let ellipsis = if shown.len() < observation.len() { "..." } else { "" };
            format!(
                "{}. Thought: {}\n   Action: {}({})\n   Observation: {}{}",
                i + 1,
                a.thought,
                a.capability,
                a.args,
                shown,
                ellipsis
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(super) fn react_prompt(
    task: &str,
    ctx: &RequestContext,
    capabilities: &[CapabilityInfo],
    history: &[AgentAction],
    max_chars: usize,
) -> String {
    let mut prompt = format!(
        "## Task\n{}\n\n## Capabilities\n{}",
        task,
        render_catalogue(capabilities)
    );
    if !ctx.is_empty() {
        prompt.push_str("\n\n## Context\n");
        prompt.push_str(&ctx.render());
    }
    prompt.push_str("\n\n## History\n");
    prompt.push_str(&render_history(history, max_chars));
    prompt
}

pub(super) fn synthesis_prompt(task: &str, history: &[AgentAction], max_chars: usize) -> String {
    format!(
        "## Task\n{}\n\n## What was done\n{}\n\nWrite the final answer.",
        task,
        render_history(history, max_chars)
    )
}

pub(super) fn plan_synthesis_prompt(goal: &str, steps: &[String], results: &[String]) -> String {
    let body = steps
        .iter()
        .zip(results)
        .enumerate()
        .map(|(i, (step, result))| format!("### Step {}: {}\n{}", i + 1, step, result))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("## Goal\n{}\n\n## Step results\n{}\n\nCombine the results into one answer.", goal, body)
}

/// Best-effort answer from history when the oracle cannot synthesize one.
pub(super) fn fallback_answer(history: &[AgentAction], reason: &str) -> String {
    match history.iter().rev().find_map(|a| a.result.as_deref()) {
        Some(last) => format!("{}\n\n(Incomplete: {})", last, reason),
        None => format!("I could not complete the request: {}", reason),
    }
}
