//! Inner node: aggregates a set of children (Buckets or Servers).

use super::NodeHandle;
use crate::node::strategy::{Strategy, StrategyState};
use crate::resources::ResourceVector;
use crate::traits::TraitSet;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct Bucket {
    pub(crate) name: String,
    pub(crate) level: String,
    pub(crate) children: Vec<NodeHandle>,
    pub(crate) traits: TraitSet,
    pub(crate) free_capacity: ResourceVector,
    pub(crate) valid_until: f64,
    pub(crate) affinity_counters: HashMap<String, u32>,
    pub(crate) labels_present: HashSet<Option<String>>,
    pub(crate) strategy: StrategyState,
}

impl Bucket {
    /// Build a bucket whose per-affinity strategies fall back to Spread
    /// until configured otherwise, via `Strategy::default()`.
    pub fn new(name: impl Into<String>, level: impl Into<String>, dimensions: usize) -> Self {
        Self::with_default_strategy(name, level, dimensions, Strategy::default())
    }

    pub fn with_default_strategy(
        name: impl Into<String>,
        level: impl Into<String>,
        dimensions: usize,
        default_strategy: Strategy,
    ) -> Self {
        Self {
            name: name.into(),
            level: level.into(),
            children: Vec::new(),
            traits: TraitSet::default(),
            free_capacity: ResourceVector::zero(dimensions),
            valid_until: 0.0,
            affinity_counters: HashMap::new(),
            labels_present: HashSet::new(),
            strategy: StrategyState::with_default(default_strategy),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn set_level(&mut self, level: impl Into<String>) {
        self.level = level.into();
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    pub fn free_capacity(&self) -> &ResourceVector {
        &self.free_capacity
    }

    pub fn valid_until(&self) -> f64 {
        self.valid_until
    }

    pub fn traits(&self) -> &TraitSet {
        &self.traits
    }

    pub fn affinity_count(&self, affinity: &str) -> u32 {
        self.affinity_counters.get(affinity).copied().unwrap_or(0)
    }

    pub fn labels_present(&self) -> &HashSet<Option<String>> {
        &self.labels_present
    }

    pub fn set_strategy(&mut self, affinity: impl Into<String>, strategy: Strategy) {
        self.strategy.set_strategy(affinity, strategy);
    }

    pub fn strategy_for(&self, affinity: &str) -> Strategy {
        self.strategy.strategy_for(affinity)
    }
}
