//! Cell: root of the topology tree and owner of allocations and identity
//! groups.

use crate::allocation::Allocation;
use crate::application::Application;
use crate::clock::{Clock, SharedClock, SystemClock, Time};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::identity::IdentityGroup;
use crate::node::{Arena, Server, ServerState, Strategy};
use crate::placement::{self, PlacementChange};
use crate::resources::ResourceVector;
use crate::traits::TraitMask;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Root of one scheduler instance: topology, allocations, identity
/// registry, and the clock everything reads `now` through.
pub struct Cell {
    pub(crate) tree: Arena,
    pub(crate) allocations: HashMap<Option<String>, Allocation>,
    pub(crate) identity_groups: HashMap<String, Rc<RefCell<IdentityGroup>>>,
    pub(crate) name_to_label: HashMap<String, Option<String>>,
    pub(crate) next_sequence: u64,
    pub(crate) next_event_at: Time,
    pub(crate) clock: SharedClock,
    pub(crate) dimensions: usize,
    pub(crate) config: SchedulerConfig,
}

impl Cell {
    pub fn new(root_name: impl Into<String>, dimensions: usize) -> Self {
        let mut config = SchedulerConfig::default();
        config.root_name = root_name.into();
        config.dimensions = dimensions;
        Self::from_config(config)
    }

    /// Build a Cell from a `SchedulerConfig`: dimension count, root naming,
    /// the default per-affinity strategy new buckets start with, and
    /// whether `schedule()` may evict to make room.
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(config: SchedulerConfig, clock: SharedClock) -> Self {
        let tree = Arena::with_default_strategy(
            config.root_name.clone(),
            config.root_level.clone(),
            config.dimensions,
            config.default_strategy,
        );
        let dimensions = config.dimensions;
        Self {
            tree,
            allocations: HashMap::new(),
            identity_groups: HashMap::new(),
            name_to_label: HashMap::new(),
            next_sequence: 0,
            next_event_at: f64::INFINITY,
            clock,
            dimensions,
            config,
        }
    }

    pub fn with_clock(root_name: impl Into<String>, dimensions: usize, clock: SharedClock) -> Self {
        let mut config = SchedulerConfig::default();
        config.root_name = root_name.into();
        config.dimensions = dimensions;
        Self::from_config_with_clock(config, clock)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = clock;
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn next_event_at(&self) -> Time {
        self.next_event_at
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn root_name(&self) -> &str {
        self.tree.bucket(self.tree.root()).expect("root always exists").name()
    }

    /// Run one scheduling cycle. See `placement::schedule` for the full
    /// algorithm; this is the single driver operation exposed to callers.
    pub fn schedule(&mut self) -> Result<Vec<PlacementChange>> {
        placement::schedule(self)
    }

    // -- topology mutators --------------------------------------------

    pub fn add_bucket(&mut self, parent_name: &str, name: impl Into<String>, level: impl Into<String>) -> Result<()> {
        self.tree.add_bucket(parent_name, name, level)?;
        Ok(())
    }

    pub fn add_server(
        &mut self,
        parent_name: &str,
        name: impl Into<String>,
        total_capacity: ResourceVector,
        traits: TraitMask,
        label: Option<String>,
        valid_until: Time,
    ) -> Result<()> {
        self.tree.add_server(parent_name, name, total_capacity, traits, label, valid_until)?;
        Ok(())
    }

    pub fn remove_node(&mut self, name: &str) -> Result<()> {
        self.tree.remove_node(name)
    }

    pub fn set_affinity_strategy(&mut self, bucket_name: &str, affinity: &str, strategy: Strategy) -> Result<()> {
        self.tree.set_affinity_strategy(bucket_name, affinity, strategy)
    }

    pub fn mark_server_state(&mut self, server_name: &str, state: ServerState) -> Result<()> {
        self.tree.mark_server_state(server_name, state)
    }

    pub fn set_level(&mut self, bucket_name: &str, level: impl Into<String>) -> Result<()> {
        self.tree.set_level(bucket_name, level)
    }

    pub fn server(&self, name: &str) -> Result<&Server> {
        let handle = self.tree.handle_of(name).ok_or_else(|| SchedulerError::NodeNotFound(name.to_string()))?;
        self.tree.server(handle)
    }

    pub fn members(&self, name: &str) -> Result<Vec<String>> {
        self.tree.members(name)
    }

    pub fn size(&self, name: &str, label: &Option<String>) -> Result<usize> {
        self.tree.size(name, label)
    }

    /// Free capacity at any Bucket or Server, by name.
    pub fn free_capacity(&self, name: &str) -> Result<ResourceVector> {
        self.tree.free_capacity_of(name)
    }

    /// Affinity counter at any Bucket or Server, by name.
    pub fn affinity_counter(&self, name: &str, affinity: &str) -> Result<u32> {
        self.tree.affinity_count_of(name, affinity)
    }

    // -- allocations -----------------------------------------------------

    /// Get (creating if absent) the allocation for `label`.
    pub fn allocation_mut(&mut self, label: Option<String>) -> &mut Allocation {
        let dimensions = self.dimensions;
        self.allocations
            .entry(label)
            .or_insert_with(|| Allocation::new(dimensions, None))
    }

    pub fn allocation(&self, label: &Option<String>) -> Option<&Allocation> {
        self.allocations.get(label)
    }

    /// Remove the allocation owning `label` (and every application and
    /// sub-allocation it still holds). The caller is responsible for
    /// vacating any servers those applications occupied first; this is a
    /// bookkeeping removal, not a placement change.
    pub fn remove_allocation(&mut self, label: &Option<String>) -> Result<Allocation> {
        self.allocations
            .remove(label)
            .ok_or_else(|| SchedulerError::AllocationNotFound(label.clone().unwrap_or_default()))
    }

    /// Add a sub-allocation at `path` under the allocation for `label`.
    /// Errors if `path` is already in use under that allocation.
    pub fn add_sub_allocation(&mut self, label: Option<String>, path: impl Into<String>, sub: Allocation) -> Result<()> {
        let path = path.into();
        let alloc = self.allocation_mut(label);
        if alloc.sub_alloc_mut(&path).is_some() {
            return Err(SchedulerError::DuplicateAllocation(path));
        }
        alloc.add_sub_alloc(path, sub);
        Ok(())
    }

    pub fn sub_allocation_mut(&mut self, label: &Option<String>, path: &str) -> Result<&mut Allocation> {
        self.allocations
            .get_mut(label)
            .ok_or_else(|| SchedulerError::AllocationNotFound(label.clone().unwrap_or_default()))?
            .sub_alloc_mut(path)
            .ok_or_else(|| SchedulerError::AllocationNotFound(path.to_string()))
    }

    // -- queries over placement state -------------------------------------

    /// Every known application's current server, `None` if unplaced.
    pub fn placements(&self) -> Vec<(String, Option<String>)> {
        let mut out = Vec::new();
        for alloc in self.allocations.values() {
            collect_placements(alloc, &mut out);
        }
        out
    }

    /// Names of applications with no current server that have not been
    /// marked `evicted` (still eligible for placement on the next cycle).
    pub fn pending_apps(&self) -> Vec<String> {
        self.placements()
            .into_iter()
            .filter_map(|(name, server)| (server.is_none() && !self.is_evicted(&name)).then_some(name))
            .collect()
    }

    /// Names of `schedule_once` applications displaced and never re-placed.
    pub fn evicted_apps(&self) -> Vec<String> {
        let mut out = Vec::new();
        for alloc in self.allocations.values() {
            collect_evicted(alloc, &mut out);
        }
        out
    }

    fn is_evicted(&self, name: &str) -> bool {
        self.name_to_label
            .get(name)
            .and_then(|label| self.allocations.get(label))
            .and_then(|alloc| alloc.find_app(name))
            .map(|app| app.evicted())
            .unwrap_or(false)
    }

    // -- identity groups ---------------------------------------------------

    pub fn configure_identity_group(&mut self, name: impl Into<String>, count: usize) {
        let name = name.into();
        match self.identity_groups.get(&name) {
            Some(group) => group.borrow_mut().adjust(count),
            None => {
                self.identity_groups.insert(name.clone(), Rc::new(RefCell::new(IdentityGroup::new(name, count))));
            }
        }
    }

    fn identity_group_ref(&self, name: &str) -> Rc<RefCell<IdentityGroup>> {
        self.identity_groups
            .get(name)
            .cloned()
            .unwrap_or_else(|| Rc::new(RefCell::new(IdentityGroup::new(name, 0))))
    }

    /// Ids currently available for acquisition in the named group.
    pub fn identity_group_available(&self, name: &str) -> Result<std::collections::BTreeSet<usize>> {
        let group = self
            .identity_groups
            .get(name)
            .ok_or_else(|| SchedulerError::IdentityGroupNotFound(name.to_string()))?;
        Ok(group.borrow().available().clone())
    }

    // -- applications ------------------------------------------------------

    /// Add an application to the allocation for `label`, assigning it the
    /// next insertion sequence number and binding its identity group
    /// reference if it declares one.
    pub fn add_app(&mut self, label: Option<String>, mut app: Application) -> Result<()> {
        if self.name_to_label.contains_key(app.name()) {
            return Err(SchedulerError::DuplicateApplication(app.name().to_string()));
        }
        app.sequence_no = self.next_sequence;
        self.next_sequence += 1;

        if let Some(group_name) = app.identity_group.clone() {
            let group_ref = self.identity_group_ref(&group_name);
            if !self.identity_groups.contains_key(&group_name) {
                self.identity_groups.insert(group_name.clone(), group_ref.clone());
            }
            app.bind_identity_group(group_name, group_ref);
        }

        self.name_to_label.insert(app.name().to_string(), label.clone());
        self.allocation_mut(label).add(app);
        Ok(())
    }

    /// Remove an application by name: releases its identity, vacates its
    /// server if placed, and drops it from its owning allocation.
    pub fn remove_app(&mut self, name: &str) -> Result<()> {
        let label = self
            .name_to_label
            .remove(name)
            .ok_or_else(|| SchedulerError::ApplicationNotFound(name.to_string()))?;

        let alloc = self.allocations.get_mut(&label).ok_or_else(|| SchedulerError::ApplicationNotFound(name.to_string()))?;
        let mut app = alloc.remove_app(name).ok_or_else(|| SchedulerError::ApplicationNotFound(name.to_string()))?;

        if let Some(server_name) = app.server.take() {
            if self.tree.handle_of(&server_name).is_some() {
                let _ = self.tree.vacate(&server_name, name);
            }
        }
        app.release_identity();
        Ok(())
    }

    /// Total capacity visible at the root, used as `parent_available` for
    /// top-level allocations.
    pub(crate) fn root_available(&self) -> Result<ResourceVector> {
        Ok(self.tree.bucket(self.tree.root())?.free_capacity().clone())
    }
}

fn collect_placements(alloc: &Allocation, out: &mut Vec<(String, Option<String>)>) {
    for app in alloc.apps() {
        out.push((app.name().to_string(), app.server().map(str::to_string)));
    }
    for (_, sub) in alloc.sub_allocations() {
        collect_placements(sub, out);
    }
}

fn collect_evicted(alloc: &Allocation, out: &mut Vec<String>) {
    for app in alloc.apps() {
        if app.evicted() {
            out.push(app.name().to_string());
        }
    }
    for (_, sub) in alloc.sub_allocations() {
        collect_evicted(sub, out);
    }
}
