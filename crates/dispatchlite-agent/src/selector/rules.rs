//! Rule-based scoring: name matching, description overlap, context hints and keyword cues.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::capability::{description_words, name_parts, tokenize, CapabilityInfo};
use crate::types::{clamp_confidence, normalize_request, RequestContext};

const EXACT_NAME: f64 = 0.9;
const NAME_IN_REQUEST: f64 = 0.5;
const NAME_PARTS_TOTAL: f64 = 0.3;
const DESCRIPTION_OVERLAP: f64 = 0.4;
const SUGGESTED_BONUS: f64 = 0.4;
const DOMAIN_BONUS: f64 = 0.2;
const RECENT_BONUS: f64 = 0.1;
const KEYWORD_BONUS: f64 = 0.3;

/// Cue words that boost capabilities whose name contains `capability_hint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordBoost {
    pub cues: Vec<String>,
    pub capability_hint: String,
}

impl KeywordBoost {
    pub fn new<I, S>(cues: I, capability_hint: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cues: cues.into_iter().map(Into::into).collect(),
            capability_hint: capability_hint.into(),
        }
    }

    fn matching_cue(&self, request: &str, tokens: &HashSet<String>) -> Option<&str> {
        self.cues
            .iter()
            .find(|cue| {
                if cue.contains(' ') {
                    request.contains(cue.as_str())
                } else {
                    tokens.contains(cue.as_str())
                }
            })
            .map(String::as_str)
    }
}

/// Built-in cues for calculation, weather, search and time capabilities.
pub fn default_keyword_boosts() -> Vec<KeywordBoost> {
    vec![
        KeywordBoost::new(
            ["calculate", "compute", "sum", "multiply", "divide", "plus", "minus", "math"],
            "calc",
        ),
        KeywordBoost::new(["weather", "temperature", "forecast", "rain", "sunny"], "weather"),
        KeywordBoost::new(["search", "look up", "find", "google", "lookup"], "search"),
        KeywordBoost::new(["time", "date", "clock", "today", "timezone"], "time"),
    ]
}

/// Score of one capability against one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleScore {
    pub capability: String,
    pub score: f64,
    pub rationale: String,
}

/// Score `info` against `request`. Always within [0, 1].
pub fn score_capability(
    info: &CapabilityInfo,
    request: &str,
    ctx: &RequestContext,
    boosts: &[KeywordBoost],
) -> RuleScore {
    let request = normalize_request(request);
    let tokens: HashSet<String> = tokenize(&request).into_iter().collect();
    let name = info.name.to_lowercase();
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if request == name {
        score += EXACT_NAME;
        reasons.push("exact name match".to_string());
    } else if !name.is_empty() && request.contains(&name) {
        score += NAME_IN_REQUEST;
        reasons.push("name appears in request".to_string());
    } else {
        let parts = name_parts(&name);
        let found = parts.iter().filter(|p| tokens.contains(p.as_str())).count();
        if found > 0 {
            score += NAME_PARTS_TOTAL / parts.len() as f64 * found as f64;
            reasons.push(format!("{}/{} name parts in request", found, parts.len()));
        }
    }

    let words: HashSet<String> = description_words(&info.description).into_iter().collect();
    if !words.is_empty() {
        let overlap = words.iter().filter(|w| tokens.contains(w.as_str())).count();
        if overlap > 0 {
            score += DESCRIPTION_OVERLAP * overlap as f64 / words.len() as f64;
            reasons.push(format!("{}/{} description words match", overlap, words.len()));
        }
    }

    if ctx.suggested_capability() == Some(info.name.as_str()) {
        score += SUGGESTED_BONUS;
        reasons.push("suggested by context".to_string());
    }
    if let Some(domain) = ctx.domain() {
        let domain = domain.to_lowercase();
        if !domain.is_empty() && info.description.to_lowercase().contains(&domain) {
            score += DOMAIN_BONUS;
            reasons.push(format!("domain '{}' fits", domain));
        }
    }
    if ctx.recent_capabilities().contains(&info.name.as_str()) {
        score += RECENT_BONUS;
        reasons.push("recently used".to_string());
    }

    for boost in boosts {
        if !name.contains(&boost.capability_hint.to_lowercase()) {
            continue;
        }
        if let Some(cue) = boost.matching_cue(&request, &tokens) {
            score += KEYWORD_BONUS;
            reasons.push(format!("keyword cue '{}'", cue));
            break;
        }
    }

    let rationale = if reasons.is_empty() {
        "no matching signals".to_string()
    } else {
        reasons.join("; ")
    };
    RuleScore {
        capability: info.name.clone(),
        score: clamp_confidence(score),
        rationale,
    }
}

/// Score every capability, best first. Equal scores keep the input order.
pub fn rank(
    infos: &[CapabilityInfo],
    request: &str,
    ctx: &RequestContext,
    boosts: &[KeywordBoost],
) -> Vec<RuleScore> {
    let mut scores: Vec<RuleScore> = infos
        .iter()
        .map(|info| score_capability(info, request, ctx, boosts))
        .collect();
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}
