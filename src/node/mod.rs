//! The Node tree: an arena of Buckets and Servers addressed by integer
//! handles, avoiding the parent/child reference cycles a tree with owned
//! pointers would need.

pub mod bucket;
pub mod server;
pub mod strategy;

pub use bucket::Bucket;
pub use server::{Server, ServerState, SERVER_LEVEL};
pub use strategy::{Strategy, StrategyState};

use crate::error::{Result, SchedulerError};
use crate::resources::ResourceVector;
use crate::traits::TraitMask;
use std::collections::HashMap;

pub type NodeHandle = usize;

#[derive(Debug, Clone)]
pub(crate) enum NodeData {
    Bucket(Bucket),
    Server(Server),
}

impl NodeData {
    pub fn name(&self) -> &str {
        match self {
            NodeData::Bucket(b) => b.name(),
            NodeData::Server(s) => s.name(),
        }
    }

    pub fn level(&self) -> &str {
        match self {
            NodeData::Bucket(b) => b.level(),
            NodeData::Server(_) => SERVER_LEVEL,
        }
    }

    pub fn free_capacity(&self) -> &ResourceVector {
        match self {
            NodeData::Bucket(b) => b.free_capacity(),
            NodeData::Server(s) => s.free_capacity(),
        }
    }

    pub fn valid_until(&self) -> f64 {
        match self {
            NodeData::Bucket(b) => b.valid_until(),
            NodeData::Server(s) => s.valid_until(),
        }
    }

    pub fn satisfies_traits(&self, demand: TraitMask) -> bool {
        match self {
            NodeData::Bucket(b) => b.traits().satisfies(demand),
            NodeData::Server(s) => s.can_host_traits(demand),
        }
    }

    pub fn has_label(&self, label: &Option<String>) -> bool {
        match self {
            NodeData::Bucket(b) => b.labels_present().contains(label),
            NodeData::Server(s) => s.label() == label.as_deref(),
        }
    }

    pub fn affinity_count(&self, affinity: &str) -> u32 {
        match self {
            NodeData::Bucket(b) => b.affinity_count(affinity),
            NodeData::Server(s) => s.affinity_count(affinity),
        }
    }

    fn as_bucket(&self) -> Option<&Bucket> {
        match self {
            NodeData::Bucket(b) => Some(b),
            NodeData::Server(_) => None,
        }
    }

    fn as_bucket_mut(&mut self) -> Option<&mut Bucket> {
        match self {
            NodeData::Bucket(b) => Some(b),
            NodeData::Server(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    parent: Option<NodeHandle>,
    data: NodeData,
}

/// What a candidate Server must provide, and what must be checked at each
/// ancestor on the way down, for one placement attempt.
pub struct PlaceRequest<'a> {
    pub demand: &'a ResourceVector,
    pub trait_demand: TraitMask,
    pub label: &'a Option<String>,
    pub affinity: &'a str,
    pub affinity_limits: Option<&'a HashMap<String, u32>>,
}

/// Arena holding the whole Node tree, rooted at a single Bucket.
#[derive(Debug, Clone)]
pub struct Arena {
    entries: Vec<Option<NodeEntry>>,
    name_to_handle: HashMap<String, NodeHandle>,
    root: NodeHandle,
    dimensions: usize,
    default_strategy: Strategy,
}

impl Arena {
    pub fn new(root_name: impl Into<String>, root_level: impl Into<String>, dimensions: usize) -> Self {
        Self::with_default_strategy(root_name, root_level, dimensions, Strategy::default())
    }

    /// Like `new`, but every Bucket subsequently created (including the
    /// root) falls back to `default_strategy` for affinities that haven't
    /// been configured explicitly, per `SchedulerConfig::default_strategy`.
    pub fn with_default_strategy(
        root_name: impl Into<String>,
        root_level: impl Into<String>,
        dimensions: usize,
        default_strategy: Strategy,
    ) -> Self {
        let root_name = root_name.into();
        let root_bucket = Bucket::with_default_strategy(root_name.clone(), root_level, dimensions, default_strategy);
        let mut name_to_handle = HashMap::new();
        name_to_handle.insert(root_name, 0);
        Self {
            entries: vec![Some(NodeEntry {
                parent: None,
                data: NodeData::Bucket(root_bucket),
            })],
            name_to_handle,
            root: 0,
            dimensions,
            default_strategy,
        }
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn handle_of(&self, name: &str) -> Option<NodeHandle> {
        self.name_to_handle.get(name).copied()
    }

    fn entry(&self, handle: NodeHandle) -> Result<&NodeEntry> {
        self.entries
            .get(handle)
            .and_then(|e| e.as_ref())
            .ok_or_else(|| SchedulerError::NodeNotFound(handle.to_string()))
    }

    fn entry_mut(&mut self, handle: NodeHandle) -> Result<&mut NodeEntry> {
        self.entries
            .get_mut(handle)
            .and_then(|e| e.as_mut())
            .ok_or_else(|| SchedulerError::NodeNotFound(handle.to_string()))
    }

    pub fn data(&self, handle: NodeHandle) -> Result<&NodeData> {
        Ok(&self.entry(handle)?.data)
    }

    pub fn bucket(&self, handle: NodeHandle) -> Result<&Bucket> {
        self.data(handle)?
            .as_bucket()
            .ok_or_else(|| SchedulerError::NodeNotFound(handle.to_string()))
    }

    pub fn server(&self, handle: NodeHandle) -> Result<&Server> {
        match &self.entry(handle)?.data {
            NodeData::Server(s) => Ok(s),
            NodeData::Bucket(_) => Err(SchedulerError::NodeNotFound(handle.to_string())),
        }
    }

    pub fn server_mut(&mut self, handle: NodeHandle) -> Result<&mut Server> {
        match &mut self.entry_mut(handle)?.data {
            NodeData::Server(s) => Ok(s),
            NodeData::Bucket(_) => Err(SchedulerError::NodeNotFound(handle.to_string())),
        }
    }

    /// Add a Bucket under `parent_name`.
    pub fn add_bucket(&mut self, parent_name: &str, name: impl Into<String>, level: impl Into<String>) -> Result<NodeHandle> {
        let name = name.into();
        if self.name_to_handle.contains_key(&name) {
            return Err(SchedulerError::DuplicateNode(name));
        }
        let parent = self.handle_of(parent_name).ok_or_else(|| SchedulerError::NodeNotFound(parent_name.to_string()))?;
        let bucket = Bucket::with_default_strategy(name.clone(), level, self.dimensions, self.default_strategy);
        let handle = self.insert(parent, NodeData::Bucket(bucket))?;
        self.name_to_handle.insert(name, handle);
        Ok(handle)
    }

    /// Add a Server under `parent_name`.
    pub fn add_server(
        &mut self,
        parent_name: &str,
        name: impl Into<String>,
        total_capacity: ResourceVector,
        traits: TraitMask,
        label: Option<String>,
        valid_until: f64,
    ) -> Result<NodeHandle> {
        let name = name.into();
        if self.name_to_handle.contains_key(&name) {
            return Err(SchedulerError::DuplicateNode(name));
        }
        if total_capacity.dimensions() != self.dimensions {
            return Err(SchedulerError::DimensionMismatch {
                expected: self.dimensions,
                actual: total_capacity.dimensions(),
            });
        }
        let parent = self.handle_of(parent_name).ok_or_else(|| SchedulerError::NodeNotFound(parent_name.to_string()))?;
        let server = Server::new(name.clone(), total_capacity, traits, label, valid_until);
        let handle = self.insert(parent, NodeData::Server(server))?;
        self.name_to_handle.insert(name, handle);
        Ok(handle)
    }

    fn insert(&mut self, parent: NodeHandle, data: NodeData) -> Result<NodeHandle> {
        let contribution_name = data.name().to_string();
        let entry = NodeEntry { parent: Some(parent), data };
        let handle = self.entries.len();
        self.entries.push(Some(entry));

        let parent_bucket = self
            .entry_mut(parent)?
            .data
            .as_bucket_mut()
            .ok_or(SchedulerError::NodeNotFound(contribution_name.clone()))?;
        parent_bucket.children.push(handle);
        let child_mask = self.data(handle)?.effective_trait_mask();
        self.bucket_mut(parent)?.traits.add(contribution_name, child_mask);

        self.recompute_upward(parent)?;
        Ok(handle)
    }

    fn bucket_mut(&mut self, handle: NodeHandle) -> Result<&mut Bucket> {
        self.entry_mut(handle)?
            .data
            .as_bucket_mut()
            .ok_or_else(|| SchedulerError::NodeNotFound(handle.to_string()))
    }

    /// Remove a node (and, if a Bucket, its whole subtree) by name.
    pub fn remove_node(&mut self, name: &str) -> Result<()> {
        let handle = self.handle_of(name).ok_or_else(|| SchedulerError::NodeNotFound(name.to_string()))?;
        if handle == self.root {
            return Err(SchedulerError::NodeNotFound(name.to_string()));
        }
        let parent = self.entry(handle)?.parent;
        self.drop_subtree(handle);
        if let Some(parent) = parent {
            self.bucket_mut(parent)?.children.retain(|&h| h != handle);
            self.bucket_mut(parent)?.traits.remove(name);
            self.recompute_upward(parent)?;
        }
        Ok(())
    }

    fn drop_subtree(&mut self, handle: NodeHandle) {
        let children: Vec<NodeHandle> = match &self.entries[handle] {
            Some(entry) => match &entry.data {
                NodeData::Bucket(b) => b.children.clone(),
                NodeData::Server(_) => Vec::new(),
            },
            None => Vec::new(),
        };
        for child in children {
            self.drop_subtree(child);
        }
        if let Some(entry) = self.entries[handle].take() {
            self.name_to_handle.remove(entry.data.name());
        }
    }

    /// Recompute `handle`'s own aggregates (if it's a Bucket) from its
    /// current children, then its parent's, up to the root.
    fn recompute_upward(&mut self, mut handle: NodeHandle) -> Result<()> {
        loop {
            self.recompute_one(handle)?;
            match self.entry(handle)?.parent {
                Some(parent) => handle = parent,
                None => return Ok(()),
            }
        }
    }

    fn recompute_one(&mut self, handle: NodeHandle) -> Result<()> {
        let children = match self.data(handle)? {
            NodeData::Bucket(b) => b.children.clone(),
            NodeData::Server(_) => return Ok(()),
        };
        let dimensions = self.dimensions;

        let mut free_caps = Vec::with_capacity(children.len());
        let mut valid_until = 0.0_f64;
        let mut affinity_counters: HashMap<String, u32> = HashMap::new();
        let mut labels_present = std::collections::HashSet::new();

        for &child in &children {
            let data = self.data(child)?;
            free_caps.push(data.free_capacity().clone());
            if data.valid_until() > valid_until {
                valid_until = data.valid_until();
            }
            match data {
                NodeData::Bucket(b) => {
                    for (affinity, count) in &b.affinity_counters {
                        *affinity_counters.entry(affinity.clone()).or_insert(0) += count;
                    }
                    labels_present.extend(b.labels_present.iter().cloned());
                }
                NodeData::Server(s) => {
                    for affinity in s.apps.values().map(|o| o.affinity.clone()) {
                        *affinity_counters.entry(affinity).or_insert(0) += 1;
                    }
                    labels_present.insert(s.label().map(|s| s.to_string()));
                }
            }
        }

        let free_capacity = ResourceVector::componentwise_max(free_caps.into_iter(), dimensions);
        let bucket = self.bucket_mut(handle)?;
        bucket.free_capacity = free_capacity;
        bucket.valid_until = valid_until;
        bucket.affinity_counters = affinity_counters;
        bucket.labels_present = labels_present;
        Ok(())
    }

    pub fn set_affinity_strategy(&mut self, bucket_name: &str, affinity: &str, strategy: Strategy) -> Result<()> {
        let handle = self.handle_of(bucket_name).ok_or_else(|| SchedulerError::NodeNotFound(bucket_name.to_string()))?;
        self.bucket_mut(handle)?.set_strategy(affinity, strategy);
        Ok(())
    }

    pub fn mark_server_state(&mut self, server_name: &str, state: ServerState) -> Result<()> {
        let handle = self.handle_of(server_name).ok_or_else(|| SchedulerError::NodeNotFound(server_name.to_string()))?;
        self.server_mut(handle)?.set_state(state);
        Ok(())
    }

    pub fn set_level(&mut self, bucket_name: &str, level: impl Into<String>) -> Result<()> {
        let handle = self.handle_of(bucket_name).ok_or_else(|| SchedulerError::NodeNotFound(bucket_name.to_string()))?;
        self.bucket_mut(handle)?.set_level(level);
        Ok(())
    }

    /// Free capacity at any node (Bucket or Server), by name.
    pub fn free_capacity_of(&self, name: &str) -> Result<ResourceVector> {
        let handle = self.handle_of(name).ok_or_else(|| SchedulerError::NodeNotFound(name.to_string()))?;
        Ok(self.data(handle)?.free_capacity().clone())
    }

    /// Affinity counter at any node (Bucket or Server), by name.
    pub fn affinity_count_of(&self, name: &str, affinity: &str) -> Result<u32> {
        let handle = self.handle_of(name).ok_or_else(|| SchedulerError::NodeNotFound(name.to_string()))?;
        Ok(self.data(handle)?.affinity_count(affinity))
    }

    /// Names of every Server in the subtree rooted at `name`.
    pub fn members(&self, name: &str) -> Result<Vec<String>> {
        let handle = self.handle_of(name).ok_or_else(|| SchedulerError::NodeNotFound(name.to_string()))?;
        let mut out = Vec::new();
        self.collect_members(handle, &mut out)?;
        Ok(out)
    }

    fn collect_members(&self, handle: NodeHandle, out: &mut Vec<String>) -> Result<()> {
        match self.data(handle)? {
            NodeData::Server(s) => out.push(s.name().to_string()),
            NodeData::Bucket(b) => {
                for &child in &b.children.clone() {
                    self.collect_members(child, out)?;
                }
            }
        }
        Ok(())
    }

    /// Count of Servers in the subtree rooted at `name` carrying `label`.
    pub fn size(&self, name: &str, label: &Option<String>) -> Result<usize> {
        let handle = self.handle_of(name).ok_or_else(|| SchedulerError::NodeNotFound(name.to_string()))?;
        let mut count = 0;
        self.count_labelled(handle, label, &mut count)?;
        Ok(count)
    }

    fn count_labelled(&self, handle: NodeHandle, label: &Option<String>, count: &mut usize) -> Result<()> {
        match self.data(handle)? {
            NodeData::Server(s) => {
                if s.label() == label.as_deref() {
                    *count += 1;
                }
            }
            NodeData::Bucket(b) => {
                for &child in &b.children.clone() {
                    self.count_labelled(child, label, count)?;
                }
            }
        }
        Ok(())
    }

    /// A node is worth descending into for `req` iff its aggregate traits
    /// could satisfy the demand, it has at least one descendant server
    /// carrying the requested label, and (if this node's level carries an
    /// affinity cap) the cap isn't already saturated.
    fn candidate_ok(&self, handle: NodeHandle, req: &PlaceRequest) -> Result<bool> {
        let data = self.data(handle)?;
        if !data.satisfies_traits(req.trait_demand) {
            return Ok(false);
        }
        if !data.has_label(req.label) {
            return Ok(false);
        }
        if let Some(limits) = req.affinity_limits {
            if let Some(&cap) = limits.get(data.level()) {
                if data.affinity_count(req.affinity) >= cap {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Attempt to place `req` starting at `handle`, descending recursively.
    /// Returns the accepting Server's handle without mutating any state
    /// (dry run); callers that accept the result call `occupy_at`.
    pub fn try_place(&mut self, handle: NodeHandle, req: &PlaceRequest) -> Result<Option<NodeHandle>> {
        if !self.candidate_ok(handle, req)? {
            return Ok(None);
        }
        match self.data(handle)?.clone() {
            NodeData::Server(s) => {
                if s.can_host(req.demand, req.trait_demand, req.label) {
                    Ok(Some(handle))
                } else {
                    Ok(None)
                }
            }
            NodeData::Bucket(bucket) => {
                let mut candidates = Vec::new();
                for &child in &bucket.children {
                    if self.candidate_ok(child, req)? {
                        candidates.push(child);
                    }
                }
                let ordering = bucket.strategy.ordering(req.affinity, candidates.len());
                for idx in ordering {
                    let child = candidates[idx];
                    if let Some(server) = self.try_place(child, req)? {
                        self.bucket_mut(handle)?.strategy.record_success(req.affinity, idx, candidates.len());
                        return Ok(Some(server));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Commit a placement decided by `try_place`: subtract demand on the
    /// target server and recompute aggregates up to the root.
    pub fn occupy_at(&mut self, server_handle: NodeHandle, app_name: &str, demand: ResourceVector, affinity: &str) -> Result<String> {
        let name = {
            let server = self.server_mut(server_handle)?;
            server.occupy(app_name, demand, affinity);
            server.name().to_string()
        };
        self.recompute_upward(server_handle)?;
        Ok(name)
    }

    /// Undo a placement on `server_name`, recomputing upward.
    pub fn vacate(&mut self, server_name: &str, app_name: &str) -> Result<()> {
        let handle = self.handle_of(server_name).ok_or_else(|| SchedulerError::NodeNotFound(server_name.to_string()))?;
        self.server_mut(handle)?.vacate(app_name);
        self.recompute_upward(handle)
    }
}

impl NodeData {
    /// Effective trait mask a parent should OR in as this child's
    /// contribution.
    fn effective_trait_mask(&self) -> TraitMask {
        match self {
            NodeData::Bucket(b) => b.traits().effective(),
            NodeData::Server(s) => s.traits_effective(),
        }
    }
}
