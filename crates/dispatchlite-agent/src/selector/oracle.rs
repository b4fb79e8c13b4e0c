//! Oracle-backed strategies: single choice and score-everything.

use serde::Deserialize;
use serde_json::Value;

use super::Selection;
use crate::capability::{render_catalogue, CapabilityInfo};
use crate::error::DispatchResult;
use crate::llm::OracleClient;
use crate::types::{RequestContext, SelectionResult};

const CHOOSE_SYSTEM: &str = r#"You route user requests to capabilities.

Pick exactly one capability from the list, or "none" if no capability fits.
Reply with a single JSON object and nothing else:
{"capability": "<name or none>", "confidence": <0.0-1.0>, "rationale": "<one sentence>", "arguments": <optional JSON value for the capability>}"#;

const SCORE_SYSTEM: &str = r#"You rate how well each capability fits a user request.

Score EVERY capability in the list. Reply with a single JSON array and nothing else:
[{"capability": "<name>", "confidence": <0.0-1.0>, "rationale": "<short reason>"}]"#;

#[derive(Debug, Deserialize)]
struct OracleChoice {
    capability: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CapabilityScore {
    capability: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

fn user_prompt(infos: &[CapabilityInfo], request: &str, ctx: &RequestContext) -> String {
    let mut prompt = format!(
        "## Capabilities\n{}\n\n## Request\n{}",
        render_catalogue(infos),
        request
    );
    if !ctx.is_empty() {
        prompt.push_str("\n\n## Context\n");
        prompt.push_str(&ctx.render());
    }
    prompt
}

/// Ask the oracle to choose one capability.
///
/// "none", an unregistered name, or a confidence below `threshold` is a decline; an
/// unparsable reply is an `OracleParseFailure` error.
pub(crate) async fn choose(
    client: &OracleClient,
    infos: &[CapabilityInfo],
    request: &str,
    ctx: &RequestContext,
    threshold: f64,
) -> DispatchResult<Selection> {
    let choice: OracleChoice = client
        .ask_json(CHOOSE_SYSTEM, &user_prompt(infos, request, ctx))
        .await?;

    let name = choice.capability.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("none") {
        return Ok(Selection::declined(format!("oracle declined: {}", choice.rationale)));
    }
    if !infos.iter().any(|i| i.name == name) {
        return Ok(Selection::declined(format!(
            "oracle chose unregistered capability '{}'",
            name
        )));
    }

    let mut result = SelectionResult::new(name, choice.confidence, choice.rationale);
    if let Some(args) = choice.arguments.filter(|a| !a.is_null()) {
        result = result.with_arguments(args);
    }
    Ok(Selection::gate(result, threshold))
}

/// Ask the oracle to score every capability. Unregistered names are dropped; the result
/// is sorted best first.
pub(crate) async fn score_all(
    client: &OracleClient,
    infos: &[CapabilityInfo],
    request: &str,
    ctx: &RequestContext,
) -> DispatchResult<Vec<SelectionResult>> {
    let scores: Vec<CapabilityScore> = client
        .ask_json(SCORE_SYSTEM, &user_prompt(infos, request, ctx))
        .await?;

    let mut results: Vec<SelectionResult> = Vec::new();
    for score in scores {
        if !infos.iter().any(|i| i.name == score.capability) {
            tracing::debug!(capability = %score.capability, "Oracle scored unknown capability");
            continue;
        }
        if results.iter().any(|r| r.capability == score.capability) {
            continue;
        }
        results.push(SelectionResult::new(
            score.capability,
            score.confidence,
            score.rationale,
        ));
    }
    results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(results)
}

/// Confidence strategy: score everything, take the best, apply the threshold.
pub(crate) async fn best_scored(
    client: &OracleClient,
    infos: &[CapabilityInfo],
    request: &str,
    ctx: &RequestContext,
    threshold: f64,
) -> DispatchResult<Selection> {
    let scores = score_all(client, infos, request, ctx).await?;
    match scores.into_iter().next() {
        Some(best) => Ok(Selection::gate(best, threshold)),
        None => Ok(Selection::declined("oracle scored no registered capability")),
    }
}
