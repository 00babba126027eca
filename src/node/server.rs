//! Leaf node: a physical host.

use crate::resources::ResourceVector;
use crate::traits::{TraitMask, TraitSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A server's availability state. New placements are forbidden once a
/// server leaves `Up`, but existing apps remain until retention expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Up,
    Down,
    Frozen,
}

/// Level tag reported for a leaf node, used when matching
/// `affinity_limits` keys (e.g. `{"server": 1}`).
pub const SERVER_LEVEL: &str = "server";

/// A single app occupying capacity on a server. Enough is cached here
/// (demand, affinity) to undo the placement on removal without a lookup
/// back into the owning allocation.
#[derive(Debug, Clone)]
pub(crate) struct Occupant {
    pub demand: ResourceVector,
    pub affinity: String,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub(crate) name: String,
    pub(crate) total_capacity: ResourceVector,
    pub(crate) free_capacity: ResourceVector,
    pub(crate) traits: TraitSet,
    pub(crate) label: Option<String>,
    pub(crate) state: ServerState,
    pub(crate) valid_until: f64,
    pub(crate) apps: HashMap<String, Occupant>,
    pub(crate) affinity_counters: HashMap<String, u32>,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        total_capacity: ResourceVector,
        traits: TraitMask,
        label: Option<String>,
        valid_until: f64,
    ) -> Self {
        let free_capacity = total_capacity.clone();
        Self {
            name: name.into(),
            total_capacity,
            free_capacity,
            traits: TraitSet::new(traits),
            label,
            state: ServerState::Up,
            valid_until,
            apps: HashMap::new(),
            affinity_counters: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn set_state(&mut self, state: ServerState) {
        self.state = state;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn total_capacity(&self) -> &ResourceVector {
        &self.total_capacity
    }

    pub fn free_capacity(&self) -> &ResourceVector {
        &self.free_capacity
    }

    pub fn valid_until(&self) -> f64 {
        self.valid_until
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(|s| s.as_str())
    }

    pub fn has_app(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    pub fn affinity_count(&self, affinity: &str) -> u32 {
        self.affinity_counters.get(affinity).copied().unwrap_or(0)
    }

    pub(crate) fn can_host_traits(&self, demand: TraitMask) -> bool {
        self.traits.satisfies(demand)
    }

    pub(crate) fn traits_effective(&self) -> TraitMask {
        self.traits.effective()
    }

    /// Whether this server could host a demand satisfying `trait_demand`
    /// and `label`, ignoring current free capacity. Used when looking
    /// for an eviction candidate sitting on a server the evicting app
    /// could itself use.
    pub(crate) fn can_host_traits_and_label(&self, trait_demand: TraitMask, label: &Option<String>) -> bool {
        self.state == ServerState::Up && self.traits.satisfies(trait_demand) && &self.label == label
    }

    pub(crate) fn occupant(&self, app_name: &str) -> Option<&Occupant> {
        self.apps.get(app_name)
    }

    /// Whether this server alone can accept `demand`/`trait_demand`/`label`,
    /// ignoring ancestor affinity limits (those are checked by the Arena
    /// while walking up from this node).
    pub(crate) fn can_host(
        &self,
        demand: &ResourceVector,
        trait_demand: TraitMask,
        label: &Option<String>,
    ) -> bool {
        self.state == ServerState::Up
            && self.traits.satisfies(trait_demand)
            && &self.label == label
            && demand.fits_in(&self.free_capacity)
    }

    /// Subtract `demand`, record the occupant, and bump its affinity
    /// counter. Caller must have already verified `can_host`.
    pub(crate) fn occupy(&mut self, app_name: &str, demand: ResourceVector, affinity: &str) {
        self.free_capacity = &self.free_capacity - &demand;
        self.apps.insert(
            app_name.to_string(),
            Occupant {
                demand,
                affinity: affinity.to_string(),
            },
        );
        *self.affinity_counters.entry(affinity.to_string()).or_insert(0) += 1;
    }

    /// Undo `occupy`, returning the freed occupant if the app was present.
    pub(crate) fn vacate(&mut self, app_name: &str) -> Option<Occupant> {
        let occupant = self.apps.remove(app_name)?;
        self.free_capacity = &self.free_capacity + &occupant.demand;
        if let Some(counter) = self.affinity_counters.get_mut(&occupant.affinity) {
            *counter = counter.saturating_sub(1);
        }
        Some(occupant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(a: f64, b: f64) -> ResourceVector {
        ResourceVector::new(vec![a, b]).unwrap()
    }

    #[test]
    fn occupy_subtracts_demand_and_tracks_affinity() {
        let mut srv = Server::new("n1", cap(10.0, 5.0), 0, None, 500.0);
        assert!(srv.can_host(&cap(1.0, 1.0), 0, &None));
        srv.occupy("app1", cap(1.0, 1.0), "app");
        assert_eq!(srv.free_capacity().components(), &[9.0, 4.0]);
        assert_eq!(srv.affinity_count("app"), 1);
    }

    #[test]
    fn vacate_restores_capacity_and_counter() {
        let mut srv = Server::new("n1", cap(10.0, 5.0), 0, None, 500.0);
        srv.occupy("app1", cap(1.0, 1.0), "app");
        srv.vacate("app1");
        assert_eq!(srv.free_capacity().components(), &[10.0, 5.0]);
        assert_eq!(srv.affinity_count("app"), 0);
    }

    #[test]
    fn down_server_cannot_host() {
        let mut srv = Server::new("n1", cap(10.0, 5.0), 0, None, 500.0);
        srv.set_state(ServerState::Down);
        assert!(!srv.can_host(&cap(1.0, 1.0), 0, &None));
    }

    #[test]
    fn label_mismatch_rejects() {
        let srv = Server::new("n1", cap(10.0, 5.0), 0, Some("xx".into()), 500.0);
        assert!(!srv.can_host(&cap(1.0, 1.0), 0, &None));
        assert!(srv.can_host(&cap(1.0, 1.0), 0, &Some("xx".into())));
    }
}
