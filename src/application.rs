//! Applications: the unit of placement.

use crate::clock::Time;
use crate::identity::IdentityGroup;
use crate::resources::ResourceVector;
use crate::traits::TraitMask;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A workload awaiting or holding a placement.
#[derive(Debug, Clone)]
pub struct Application {
    pub(crate) name: String,
    pub(crate) priority: u32,
    pub(crate) demand: ResourceVector,
    pub(crate) affinity: String,
    pub(crate) trait_demand: TraitMask,
    pub(crate) affinity_limits: Option<HashMap<String, u32>>,
    pub(crate) identity_group: Option<String>,
    pub(crate) identity_group_ref: Option<Rc<RefCell<IdentityGroup>>>,
    pub(crate) identity: Option<usize>,
    pub(crate) schedule_once: bool,
    pub(crate) data_retention_timeout: f64,
    pub(crate) server: Option<String>,
    pub(crate) evicted: bool,
    pub(crate) placement_expiry: Option<Time>,
    pub(crate) sequence_no: u64,
    pub(crate) ever_placed: bool,
}

impl Application {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        demand: ResourceVector,
        affinity: impl Into<String>,
        sequence_no: u64,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            demand,
            affinity: affinity.into(),
            trait_demand: 0,
            affinity_limits: None,
            identity_group: None,
            identity_group_ref: None,
            identity: None,
            schedule_once: false,
            data_retention_timeout: 0.0,
            server: None,
            evicted: false,
            placement_expiry: None,
            sequence_no,
            ever_placed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    pub fn demand(&self) -> &ResourceVector {
        &self.demand
    }

    pub fn affinity(&self) -> &str {
        &self.affinity
    }

    pub fn trait_demand(&self) -> TraitMask {
        self.trait_demand
    }

    pub fn set_trait_demand(&mut self, mask: TraitMask) {
        self.trait_demand = mask;
    }

    pub fn affinity_limits(&self) -> Option<&HashMap<String, u32>> {
        self.affinity_limits.as_ref()
    }

    pub fn set_affinity_limits(&mut self, limits: HashMap<String, u32>) {
        self.affinity_limits = Some(limits);
    }

    pub fn set_schedule_once(&mut self, schedule_once: bool) {
        self.schedule_once = schedule_once;
    }

    pub fn schedule_once(&self) -> bool {
        self.schedule_once
    }

    pub fn set_data_retention_timeout(&mut self, timeout: f64) {
        self.data_retention_timeout = timeout;
    }

    pub fn data_retention_timeout(&self) -> f64 {
        self.data_retention_timeout
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn evicted(&self) -> bool {
        self.evicted
    }

    pub fn placement_expiry(&self) -> Option<Time> {
        self.placement_expiry
    }

    pub fn identity(&self) -> Option<usize> {
        self.identity
    }

    /// Attach this app to an identity group; does not acquire an id yet.
    pub(crate) fn bind_identity_group(&mut self, name: impl Into<String>, group: Rc<RefCell<IdentityGroup>>) {
        self.identity_group = Some(name.into());
        self.identity_group_ref = Some(group);
    }

    pub fn identity_group(&self) -> Option<&str> {
        self.identity_group.as_deref()
    }

    /// Declare which identity group this app should draw an id from. Takes
    /// effect once the app is added to a `Cell`, which binds the live group
    /// reference; has no effect on an app that's already been added.
    pub fn set_identity_group(&mut self, name: impl Into<String>) {
        self.identity_group = Some(name.into());
    }

    /// If this app belongs to a group and has no identity yet, try to
    /// acquire one. Returns true if the app now holds an identity (either
    /// already did, or just acquired one, or doesn't need one).
    pub(crate) fn acquire_identity(&mut self) -> bool {
        if self.identity.is_some() {
            return true;
        }
        match &self.identity_group_ref {
            None => true,
            Some(group) => match group.borrow_mut().acquire() {
                Some(id) => {
                    self.identity = Some(id);
                    true
                }
                None => false,
            },
        }
    }

    /// True if this app is bound to a group but has no identity, or its
    /// held identity has fallen out of the group's current range.
    pub(crate) fn is_unidentified_or_overcapacity(&self) -> bool {
        match (&self.identity_group_ref, self.identity) {
            (Some(_), None) => true,
            (Some(group), Some(id)) => group.borrow().is_over_capacity(id),
            (None, _) => false,
        }
    }

    pub(crate) fn release_identity(&mut self) {
        if let (Some(group), Some(id)) = (&self.identity_group_ref, self.identity.take()) {
            group.borrow_mut().release(id);
        }
    }
}
