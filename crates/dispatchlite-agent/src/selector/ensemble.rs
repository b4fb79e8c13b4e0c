//! Ensemble vote tally and the agreement boost policy.

use crate::types::{clamp_confidence, SelectionResult};

/// Adjusts the winning confidence by the number of strategies that agreed.
///
/// Implementations must be non-decreasing in `votes` and stay within [0, 1].
pub trait BoostPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn boost(&self, confidence: f64, votes: usize) -> f64;
}

/// `min(1, confidence * (1 + per_vote * (votes - 1)))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgreementBoost {
    pub per_vote: f64,
}

impl Default for AgreementBoost {
    fn default() -> Self {
        Self { per_vote: 0.1 }
    }
}

impl BoostPolicy for AgreementBoost {
    fn name(&self) -> &str {
        "agreement"
    }

    fn boost(&self, confidence: f64, votes: usize) -> f64 {
        let extra = votes.saturating_sub(1) as f64 * self.per_vote.max(0.0);
        clamp_confidence(clamp_confidence(confidence) * (1.0 + extra)).min(1.0)
    }
}

/// Leaves the winner's confidence untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBoost;

impl BoostPolicy for NoBoost {
    fn name(&self) -> &str {
        "none"
    }

    fn boost(&self, confidence: f64, _votes: usize) -> f64 {
        clamp_confidence(confidence)
    }
}

/// Tally votes per capability. Most votes wins; ties go to the higher confidence, then to
/// the capability voted for first. Returns the winner's best vote and its vote count.
pub fn tally(votes: &[SelectionResult]) -> Option<(SelectionResult, usize)> {
    let mut groups: Vec<(SelectionResult, usize)> = Vec::new();
    for vote in votes {
        match groups.iter_mut().find(|(best, _)| best.capability == vote.capability) {
            Some((best, count)) => {
                *count += 1;
                if vote.confidence > best.confidence {
                    *best = vote.clone();
                }
            }
            None => groups.push((vote.clone(), 1)),
        }
    }

    let mut winner: Option<(SelectionResult, usize)> = None;
    for (best, count) in groups {
        let better = match &winner {
            None => true,
            Some((w, wc)) => count > *wc || (count == *wc && best.confidence > w.confidence),
        };
        if better {
            winner = Some((best, count));
        }
    }
    winner
}
