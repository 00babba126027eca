//! Per-affinity placement strategies consulted by a Bucket when choosing
//! among candidate children.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// Round-robin across candidates. Default.
    #[default]
    Spread,
    /// Prefer the current child until it cannot host, then advance.
    Pack,
}

/// Per-affinity rotation/preference state for one Bucket.
///
/// Kept separate from `Bucket` itself so it can be unit tested against
/// plain candidate-index lists without a real node tree.
#[derive(Debug, Clone)]
pub struct StrategyState {
    default: Strategy,
    strategies: HashMap<String, Strategy>,
    /// Spread: next candidate index to try, per affinity.
    rotation: HashMap<String, usize>,
    /// Pack: index of the last successfully used candidate, per affinity.
    preferred: HashMap<String, usize>,
}

impl Default for StrategyState {
    fn default() -> Self {
        Self::with_default(Strategy::default())
    }
}

impl StrategyState {
    /// A fresh strategy state whose affinities fall back to `default`
    /// until overridden by `set_strategy`, following `SchedulerConfig`'s
    /// `default_strategy` for newly created buckets.
    pub fn with_default(default: Strategy) -> Self {
        Self {
            default,
            strategies: HashMap::new(),
            rotation: HashMap::new(),
            preferred: HashMap::new(),
        }
    }

    pub fn set_strategy(&mut self, affinity: impl Into<String>, strategy: Strategy) {
        self.strategies.insert(affinity.into(), strategy);
    }

    pub fn strategy_for(&self, affinity: &str) -> Strategy {
        self.strategies.get(affinity).copied().unwrap_or(self.default)
    }

    /// Return candidate indices (into the caller's candidate list) in the
    /// order they should be attempted for this affinity.
    pub fn ordering(&self, affinity: &str, candidate_count: usize) -> Vec<usize> {
        if candidate_count == 0 {
            return Vec::new();
        }
        match self.strategy_for(affinity) {
            Strategy::Spread => {
                let start = self.rotation.get(affinity).copied().unwrap_or(0) % candidate_count;
                (0..candidate_count).map(|i| (start + i) % candidate_count).collect()
            }
            Strategy::Pack => {
                let start = self.preferred.get(affinity).copied().unwrap_or(0) % candidate_count;
                (0..candidate_count).map(|i| (start + i) % candidate_count).collect()
            }
        }
    }

    /// Record that `candidate_index` (from the most recent `ordering`
    /// call) was the one that actually succeeded, advancing rotation state
    /// for next time.
    pub fn record_success(&mut self, affinity: &str, candidate_index: usize, candidate_count: usize) {
        match self.strategy_for(affinity) {
            Strategy::Spread => {
                let next = (candidate_index + 1) % candidate_count.max(1);
                self.rotation.insert(affinity.to_string(), next);
            }
            Strategy::Pack => {
                self.preferred.insert(affinity.to_string(), candidate_index);
            }
        }
    }
}
