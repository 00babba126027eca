//! Scheduler configuration.
//!
//! Everything here is static, process-wide configuration for a `Cell`,
//! not a per-cycle input. Dimension count in particular is fixed once at
//! construction (see the DESIGN notes on the open question of whether it
//! may vary between cycles).

use crate::node::Strategy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of components in every resource vector (CPU, memory, disk, …).
    pub dimensions: usize,
    /// Strategy newly created buckets start with for affinities that
    /// haven't been configured explicitly.
    pub default_strategy: Strategy,
    /// Whether `schedule()` may evict lower-priority apps to make room.
    /// Disabling this turns failed placements into permanently pending
    /// apps instead of triggering preemption.
    pub eviction_enabled: bool,
    /// Name given to the root bucket of a freshly constructed cell.
    pub root_name: String,
    /// Level tag given to the root bucket.
    pub root_level: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dimensions: 2,
            default_strategy: Strategy::Spread,
            eviction_enabled: true,
            root_name: "top".to_string(),
            root_level: "cell".to_string(),
        }
    }
}
