//! Tool selector: picks the capability (or chain) that should handle a request.
//!
//! Strategies:
//!   - **rule**: keyword/context scoring over the index candidates
//!   - **oracle**: the oracle chooses one capability or declines
//!   - **confidence**: the oracle scores every capability, best one wins
//!   - **hybrid** (default): rule first, oracle when rules decline
//!   - **ensemble**: all three vote, agreement boosts the winner
//!
//! Successful selections go through the shared [`SelectionCache`]; declines are never
//! cached.

mod ensemble;
mod oracle;
mod rules;

use std::str::FromStr;
use std::sync::Arc;

use dispatchlite_core::observability::audit_selection;
use serde::{Deserialize, Serialize};

use crate::cache::{ranking_key, selection_key, CachedSelection, SelectionCache};
use crate::capability::{CapabilityInfo, CapabilityRegistry};
use crate::error::{DispatchError, DispatchResult};
use crate::llm::OracleClient;
use crate::types::{RequestContext, SelectionResult};

pub use ensemble::{tally, AgreementBoost, BoostPolicy, NoBoost};
pub use rules::{default_keyword_boosts, rank, score_capability, KeywordBoost, RuleScore};

// ─── Strategy ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    RuleBased,
    OracleBased,
    ConfidenceBased,
    #[default]
    Hybrid,
    Ensemble,
}

impl SelectionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RuleBased => "rule",
            Self::OracleBased => "oracle",
            Self::ConfidenceBased => "confidence",
            Self::Hybrid => "hybrid",
            Self::Ensemble => "ensemble",
        }
    }

    /// Whether the strategy consults the oracle for single selections.
    pub fn uses_oracle(self) -> bool {
        !matches!(self, Self::RuleBased)
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown selection strategy '{0}' (expected rule, oracle, confidence, hybrid or ensemble)")]
pub struct UnknownStrategy(pub String);

impl FromStr for SelectionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "rule" | "rules" | "rule_based" => Ok(Self::RuleBased),
            "oracle" | "llm" | "oracle_based" | "llm_based" => Ok(Self::OracleBased),
            "confidence" | "confidence_based" => Ok(Self::ConfidenceBased),
            "hybrid" => Ok(Self::Hybrid),
            "ensemble" => Ok(Self::Ensemble),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

// ─── Selection outcome ──────────────────────────────────────────────────────

/// Outcome of a strategy run. A decline is a valid answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Chosen(SelectionResult),
    Declined { rationale: String },
}

impl Selection {
    pub fn declined(rationale: impl Into<String>) -> Self {
        Self::Declined {
            rationale: rationale.into(),
        }
    }

    /// Chosen when `result.confidence >= threshold`, declined otherwise.
    pub fn gate(result: SelectionResult, threshold: f64) -> Self {
        if result.confidence >= threshold {
            Self::Chosen(result)
        } else {
            Self::declined(format!(
                "best candidate '{}' scored {:.2} (threshold {:.2}): {}",
                result.capability, result.confidence, threshold, result.rationale
            ))
        }
    }

    pub fn chosen(&self) -> Option<&SelectionResult> {
        match self {
            Self::Chosen(r) => Some(r),
            Self::Declined { .. } => None,
        }
    }

    pub fn into_chosen(self) -> Option<SelectionResult> {
        match self {
            Self::Chosen(r) => Some(r),
            Self::Declined { .. } => None,
        }
    }

    /// Declines become `NoCapabilitySelected`.
    pub fn into_result(self, threshold: f64) -> DispatchResult<SelectionResult> {
        match self {
            Self::Chosen(r) => Ok(r),
            Self::Declined { rationale } => Err(DispatchError::NoCapabilitySelected {
                threshold,
                rationale,
            }),
        }
    }
}

// ─── Selector ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub strategy: SelectionStrategy,
    /// Minimum confidence for `select`.
    pub confidence_threshold: f64,
    /// Minimum confidence for `select_many`.
    pub relaxed_threshold: f64,
    pub keyword_boosts: Vec<KeywordBoost>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Hybrid,
            confidence_threshold: 0.5,
            relaxed_threshold: 0.3,
            keyword_boosts: default_keyword_boosts(),
        }
    }
}

pub struct ToolSelector {
    registry: Arc<CapabilityRegistry>,
    cache: Arc<SelectionCache>,
    oracle: Option<OracleClient>,
    config: SelectorConfig,
    boost: Arc<dyn BoostPolicy>,
}

impl ToolSelector {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        cache: Arc<SelectionCache>,
        oracle: Option<OracleClient>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            oracle,
            config,
            boost: Arc::new(AgreementBoost::default()),
        }
    }

    /// Replace the ensemble boost policy.
    #[must_use]
    pub fn with_boost_policy(mut self, policy: Arc<dyn BoostPolicy>) -> Self {
        self.boost = policy;
        self
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SelectionCache> {
        &self.cache
    }

    /// Fail-soft selection: `None` on decline or on oracle failure.
    pub async fn select(&self, request: &str, ctx: &RequestContext) -> Option<SelectionResult> {
        match self.try_select(request, ctx).await {
            Ok(selection) => selection.into_chosen(),
            Err(e) => {
                tracing::warn!(error = %e, strategy = %self.config.strategy, "Selection failed");
                None
            }
        }
    }

    /// Cached selection with the configured strategy.
    ///
    /// `Ok(Declined)` means the strategy ran and found nothing good enough; `Err` means
    /// the strategy could not run (oracle unavailable or unparsable reply).
    pub async fn try_select(&self, request: &str, ctx: &RequestContext) -> DispatchResult<Selection> {
        let key = selection_key(request, ctx);
        if let Some(CachedSelection::One(hit)) = self.cache.get(&key) {
            tracing::debug!(capability = %hit.capability, "Selection cache hit");
            audit_selection(&hit.capability, self.config.strategy.as_str(), hit.confidence, true);
            return Ok(Selection::Chosen(hit));
        }

        let selection = self.select_with(self.config.strategy, request, ctx).await?;
        let result = match selection {
            Selection::Chosen(result) => result,
            declined @ Selection::Declined { .. } => {
                tracing::debug!(strategy = %self.config.strategy, "Selection declined");
                return Ok(declined);
            }
        };

        let result = match self
            .cache
            .insert_if_absent(key, CachedSelection::One(result.clone()))
        {
            CachedSelection::One(stored) => stored,
            CachedSelection::Many(_) => result,
        };
        tracing::info!(
            capability = %result.capability,
            confidence = result.confidence,
            strategy = %self.config.strategy,
            "Capability selected"
        );
        audit_selection(&result.capability, self.config.strategy.as_str(), result.confidence, false);
        Ok(Selection::Chosen(result))
    }

    /// Run one strategy without touching the cache.
    pub async fn select_with(
        &self,
        strategy: SelectionStrategy,
        request: &str,
        ctx: &RequestContext,
    ) -> DispatchResult<Selection> {
        if self.registry.is_empty() {
            return Ok(Selection::declined("no capabilities registered"));
        }
        let threshold = self.config.confidence_threshold;
        match strategy {
            SelectionStrategy::RuleBased => Ok(self.rule_select(request, ctx)),
            SelectionStrategy::OracleBased => {
                let client = self.require_oracle()?;
                oracle::choose(client, &self.registry.infos(), request, ctx, threshold).await
            }
            SelectionStrategy::ConfidenceBased => {
                let client = self.require_oracle()?;
                oracle::best_scored(client, &self.registry.infos(), request, ctx, threshold).await
            }
            SelectionStrategy::Hybrid => {
                let rule = self.rule_select(request, ctx);
                if rule.chosen().is_some() {
                    return Ok(rule);
                }
                match &self.oracle {
                    Some(client) => {
                        tracing::debug!("Rules declined, consulting oracle");
                        oracle::choose(client, &self.registry.infos(), request, ctx, threshold)
                            .await
                    }
                    None => Ok(rule),
                }
            }
            SelectionStrategy::Ensemble => self.ensemble_select(request, ctx).await,
        }
    }

    fn require_oracle(&self) -> DispatchResult<&OracleClient> {
        self.oracle.as_ref().ok_or_else(|| DispatchError::OracleUnavailable {
            message: "no oracle configured".to_string(),
        })
    }

    /// Index candidates plus any capability the context hints at.
    fn rule_candidates(&self, request: &str, ctx: &RequestContext) -> Vec<CapabilityInfo> {
        let mut candidates = self.registry.candidates(request);
        let hinted = ctx
            .suggested_capability()
            .into_iter()
            .chain(ctx.recent_capabilities());
        for name in hinted {
            if candidates.iter().any(|c| c.name == name) {
                continue;
            }
            if let Some(info) = self.registry.info(name) {
                candidates.push(info);
            }
        }
        candidates
    }

    fn rule_select(&self, request: &str, ctx: &RequestContext) -> Selection {
        let candidates = self.rule_candidates(request, ctx);
        let ranked = rank(&candidates, request, ctx, &self.config.keyword_boosts);
        match ranked.into_iter().next() {
            Some(best) => Selection::gate(
                SelectionResult::new(best.capability, best.score, best.rationale),
                self.config.confidence_threshold,
            ),
            None => Selection::declined("no candidates"),
        }
    }

    async fn ensemble_select(&self, request: &str, ctx: &RequestContext) -> DispatchResult<Selection> {
        let threshold = self.config.confidence_threshold;
        let mut votes = Vec::new();
        let mut last_error = None;
        let mut ran = 0usize;

        match self.rule_select(request, ctx) {
            Selection::Chosen(r) => votes.push(r),
            Selection::Declined { .. } => {}
        }
        ran += 1;

        if let Some(client) = &self.oracle {
            let infos = self.registry.infos();
            let outcomes = [
                oracle::choose(client, &infos, request, ctx, threshold).await,
                oracle::best_scored(client, &infos, request, ctx, threshold).await,
            ];
            for outcome in outcomes {
                match outcome {
                    Ok(selection) => {
                        ran += 1;
                        if let Selection::Chosen(r) = selection {
                            votes.push(r);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ensemble member failed");
                        last_error = Some(e);
                    }
                }
            }
        }

        let Some((winner, count)) = tally(&votes) else {
            // Rules declined and every oracle member failed: report the failure.
            if let (1, Some(e)) = (ran, last_error) {
                return Err(e);
            }
            return Ok(Selection::declined(format!(
                "no strategy reached threshold {:.2} ({} of the strategies ran)",
                threshold, ran
            )));
        };

        let boosted = self.boost.boost(winner.confidence, count);
        tracing::debug!(
            capability = %winner.capability,
            votes = count,
            policy = self.boost.name(),
            "Ensemble winner"
        );
        let mut result = SelectionResult::new(
            winner.capability,
            boosted,
            format!("{}/{} strategies agreed: {}", count, ran, winner.rationale),
        );
        result.arguments = winner.arguments;
        Ok(Selection::Chosen(result))
    }

    /// Rule scores for every registered capability, best first.
    pub fn rank_rules(&self, request: &str, ctx: &RequestContext) -> Vec<SelectionResult> {
        rank(&self.registry.infos(), request, ctx, &self.config.keyword_boosts)
            .into_iter()
            .map(|s| SelectionResult::new(s.capability, s.score, s.rationale))
            .collect()
    }

    /// Up to `top_k` capabilities at or above the relaxed threshold, best first.
    ///
    /// Oracle strategies rank with one scoring call and fall back to rule scores when the
    /// oracle is missing or fails.
    pub async fn select_many(
        &self,
        request: &str,
        ctx: &RequestContext,
        top_k: usize,
    ) -> Vec<SelectionResult> {
        if top_k == 0 || self.registry.is_empty() {
            return Vec::new();
        }
        let key = ranking_key(request, ctx, top_k);
        if let Some(CachedSelection::Many(hit)) = self.cache.get(&key) {
            tracing::debug!(results = hit.len(), "Ranking cache hit");
            return hit;
        }

        let mut ranked = match (&self.oracle, self.config.strategy.uses_oracle()) {
            (Some(client), true) => {
                match oracle::score_all(client, &self.registry.infos(), request, ctx).await {
                    Ok(scores) if !scores.is_empty() => scores,
                    Ok(_) => self.rank_rules(request, ctx),
                    Err(e) => {
                        tracing::warn!(error = %e, "Oracle ranking failed, using rule scores");
                        self.rank_rules(request, ctx)
                    }
                }
            }
            _ => self.rank_rules(request, ctx),
        };
        ranked.retain(|r| r.confidence >= self.config.relaxed_threshold);
        ranked.truncate(top_k);

        if !ranked.is_empty() {
            self.cache.put(key, CachedSelection::Many(ranked.clone()));
        }
        ranked
    }
}

impl std::fmt::Debug for ToolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSelector")
            .field("config", &self.config)
            .field("has_oracle", &self.oracle.is_some())
            .field("boost", &self.boost.name())
            .finish()
    }
}
