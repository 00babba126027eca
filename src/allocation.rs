//! Allocations: reservation buckets that own applications and may nest
//! sub-allocations.

use crate::application::Application;
use crate::resources::ResourceVector;
use crate::traits::TraitMask;
use ordered_float::OrderedFloat;
use std::collections::HashMap;

/// One entry in a merged utilization queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub rank: u32,
    pub utilization: f64,
    pub sequence_no: u64,
    pub app_name: String,
}

fn ordering_key(entry: &QueueEntry) -> (std::cmp::Reverse<u32>, OrderedFloat<f64>, u64) {
    (std::cmp::Reverse(entry.rank), OrderedFloat(entry.utilization), entry.sequence_no)
}

#[derive(Debug, Clone)]
pub struct Allocation {
    dimensions: usize,
    reserved: Option<ResourceVector>,
    max_utilization: Option<f64>,
    trait_demand: TraitMask,
    label: Option<String>,
    apps: HashMap<String, Application>,
    sub_allocations: HashMap<String, Allocation>,
}

impl Allocation {
    pub fn new(dimensions: usize, reserved: Option<ResourceVector>) -> Self {
        Self {
            dimensions,
            reserved,
            max_utilization: None,
            trait_demand: 0,
            label: None,
            apps: HashMap::new(),
            sub_allocations: HashMap::new(),
        }
    }

    pub fn reserved(&self) -> Option<&ResourceVector> {
        self.reserved.as_ref()
    }

    pub fn set_reserved(&mut self, reserved: Option<ResourceVector>) {
        self.reserved = reserved;
    }

    pub fn max_utilization(&self) -> Option<f64> {
        self.max_utilization
    }

    pub fn set_max_utilization(&mut self, max_utilization: Option<f64>) {
        self.max_utilization = max_utilization;
    }

    pub fn trait_demand(&self) -> TraitMask {
        self.trait_demand
    }

    pub fn set_trait_demand(&mut self, mask: TraitMask) {
        self.trait_demand = mask;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    pub fn apps(&self) -> impl Iterator<Item = &Application> {
        self.apps.values()
    }

    pub fn apps_mut(&mut self) -> impl Iterator<Item = &mut Application> {
        self.apps.values_mut()
    }

    pub fn app(&self, name: &str) -> Option<&Application> {
        self.apps.get(name)
    }

    pub fn app_mut(&mut self, name: &str) -> Option<&mut Application> {
        self.apps.get_mut(name)
    }

    /// Look up an application by name anywhere in this allocation's tree.
    pub fn find_app(&self, name: &str) -> Option<&Application> {
        if let Some(app) = self.apps.get(name) {
            return Some(app);
        }
        for sub in self.sub_allocations.values() {
            if let Some(app) = sub.find_app(name) {
                return Some(app);
            }
        }
        None
    }

    /// Look up an application by name anywhere in this allocation's tree.
    pub fn find_app_mut(&mut self, name: &str) -> Option<&mut Application> {
        if self.apps.contains_key(name) {
            return self.apps.get_mut(name);
        }
        for sub in self.sub_allocations.values_mut() {
            if let Some(app) = sub.find_app_mut(name) {
                return Some(app);
            }
        }
        None
    }

    /// Visit every application owned anywhere in this allocation's tree.
    pub fn for_each_app_mut(&mut self, f: &mut impl FnMut(&mut Application)) {
        for app in self.apps.values_mut() {
            f(app);
        }
        for sub in self.sub_allocations.values_mut() {
            sub.for_each_app_mut(f);
        }
    }

    pub fn sub_allocations(&self) -> impl Iterator<Item = (&String, &Allocation)> {
        self.sub_allocations.iter()
    }

    pub fn sub_alloc_mut(&mut self, path: &str) -> Option<&mut Allocation> {
        self.sub_allocations.get_mut(path)
    }

    /// Insert or replace (by name) an owned application.
    pub fn add(&mut self, app: Application) {
        self.apps.insert(app.name().to_string(), app);
    }

    pub fn add_sub_alloc(&mut self, path: impl Into<String>, alloc: Allocation) {
        self.sub_allocations.insert(path.into(), alloc);
    }

    /// Remove an application by name, searching sub-allocations too.
    pub fn remove_app(&mut self, name: &str) -> Option<Application> {
        if let Some(app) = self.apps.remove(name) {
            return Some(app);
        }
        for sub in self.sub_allocations.values_mut() {
            if let Some(app) = sub.remove_app(name) {
                return Some(app);
            }
        }
        None
    }

    /// This allocation's own reserved plus the recursive sum of every
    /// sub-allocation's total reserved.
    pub fn total_reserved(&self) -> ResourceVector {
        let mut total = self
            .reserved
            .clone()
            .unwrap_or_else(|| ResourceVector::zero(self.dimensions));
        for sub in self.sub_allocations.values() {
            total = &total + &sub.total_reserved();
        }
        total
    }

    /// Sorted, merged queue across this allocation and every descendant
    /// sub-allocation, scored against a shared `reserved_l1` (this
    /// allocation's `total_reserved()`) and `avail_l1` (the
    /// `parent_available` passed in here, unchanged for the whole
    /// subtree). Each sub-allocation still runs its own stopping rule on
    /// its own apps via its own `max_utilization`.
    pub fn utilization_queue(&self, parent_available: &ResourceVector) -> Vec<QueueEntry> {
        let reserved_l1 = self.total_reserved().l1_norm();
        let avail_l1 = parent_available.l1_norm();
        let mut entries = Vec::new();
        self.collect_stream(reserved_l1, avail_l1, &mut entries);
        entries.sort_by_key(ordering_key);
        entries
    }

    fn collect_stream(&self, reserved_l1: f64, avail_l1: f64, out: &mut Vec<QueueEntry>) {
        let mut apps: Vec<&Application> = self.apps.values().collect();
        apps.sort_by_key(|app| {
            let status_rank = if app.server().is_some() { 0 } else { 1 };
            (std::cmp::Reverse(app.priority()), status_rank, app.sequence_no)
        });

        let mut consumed = ResourceVector::zero(self.dimensions);
        for app in apps {
            let projected = &consumed + app.demand();
            let utilization = if app.priority() == 0 {
                f64::INFINITY
            } else {
                (projected.l1_norm() - reserved_l1) / (reserved_l1 + avail_l1)
            };

            if let Some(max) = self.max_utilization {
                if utilization > max {
                    break;
                }
            }

            out.push(QueueEntry {
                rank: app.priority(),
                utilization,
                sequence_no: app.sequence_no,
                app_name: app.name().to_string(),
            });
            consumed = projected;
        }

        for sub in self.sub_allocations.values() {
            sub.collect_stream(reserved_l1, avail_l1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec2(a: f64, b: f64) -> ResourceVector {
        ResourceVector::new(vec![a, b]).unwrap()
    }

    fn app(name: &str, priority: u32, demand: ResourceVector, seq: u64) -> Application {
        Application::new(name, priority, demand, "app1", seq)
    }

    #[test]
    fn utilization_ordering_matches_running_consumption() {
        let mut alloc = Allocation::new(2, Some(vec2(10.0, 10.0)));
        alloc.add(app("app1", 100, vec2(1.0, 1.0), 0));
        alloc.add(app("app2", 100, vec2(2.0, 2.0), 1));
        alloc.add(app("app3", 100, vec2(3.0, 3.0), 2));

        let queue = alloc.utilization_queue(&vec2(20.0, 20.0));
        let names: Vec<&str> = queue.iter().map(|e| e.app_name.as_str()).collect();
        assert_eq!(names, vec!["app1", "app2", "app3"]);
        assert_eq!(queue[0].utilization, -9.0 / 30.0);
        assert_eq!(queue[1].utilization, -7.0 / 30.0);
        assert_eq!(queue[2].utilization, -4.0 / 30.0);
    }

    #[test]
    fn running_app_sorts_before_unplaced_at_equal_priority() {
        let mut alloc = Allocation::new(2, Some(vec2(10.0, 10.0)));
        alloc.add(app("app1", 5, vec2(1.0, 1.0), 0));
        alloc.add(app("app2", 5, vec2(2.0, 2.0), 1));
        alloc.add(app("app3", 5, vec2(3.0, 3.0), 2));

        let queue = alloc.utilization_queue(&vec2(20.0, 20.0));
        assert_eq!(queue[0].app_name, "app1");

        alloc.app_mut("app2").unwrap().server = Some("abc".to_string());
        let queue = alloc.utilization_queue(&vec2(20.0, 20.0));
        assert_eq!(queue[0].app_name, "app2");
    }

    #[test]
    fn duplicate_add_is_upsert_not_accumulation() {
        let mut alloc = Allocation::new(2, None);
        alloc.add(app("app1", 0, vec2(1.0, 1.0), 0));
        assert_eq!(alloc.utilization_queue(&vec2(5.0, 5.0)).len(), 1);
        alloc.add(app("app1", 0, vec2(1.0, 1.0), 1));
        assert_eq!(alloc.utilization_queue(&vec2(5.0, 5.0)).len(), 1);
    }

    #[test]
    fn zero_priority_apps_sort_last_with_infinite_utilization() {
        let mut alloc = Allocation::new(2, Some(vec2(3.0, 3.0)));
        alloc.add(app("1-zero", 0, vec2(2.0, 2.0), 0));
        alloc.add(app("real", 1, vec2(1.0, 1.0), 1));

        let queue = alloc.utilization_queue(&vec2(20.0, 20.0));
        assert_eq!(queue.last().unwrap().app_name, "1-zero");
        assert!(queue.last().unwrap().utilization.is_infinite());
    }

    #[test]
    fn sub_allocations_score_against_shared_total_reserved() {
        let mut alloc = Allocation::new(2, Some(vec2(3.0, 3.0)));
        alloc.add(app("1", 3, vec2(2.0, 2.0), 0));
        alloc.add(app("2", 2, vec2(1.0, 1.0), 1));
        alloc.add(app("3", 1, vec2(3.0, 3.0), 2));

        let mut sub_a = Allocation::new(2, Some(vec2(5.0, 5.0)));
        sub_a.add(app("1a", 3, vec2(2.0, 2.0), 3));
        sub_a.add(app("2a", 2, vec2(3.0, 3.0), 4));
        sub_a.add(app("3a", 1, vec2(5.0, 5.0), 5));
        alloc.add_sub_alloc("a1/a", sub_a);

        assert_eq!(alloc.total_reserved().components(), &[8.0, 8.0]);

        let queue = alloc.utilization_queue(&vec2(20.0, 20.0));
        assert_eq!(queue[0].app_name, "1a");
        // reserved_l1 = 16, avail_l1 = 40, C_l1 for first sub_a app = 4.
        assert_eq!(queue[0].utilization, (4.0 - 16.0) / (16.0 + 40.0));

        let mut sub_b = Allocation::new(2, Some(vec2(10.0, 10.0)));
        sub_b.add(app("1b", 3, vec2(2.0, 2.0), 6));
        sub_b.add(app("2b", 2, vec2(3.0, 3.0), 7));
        sub_b.add(app("3b", 1, vec2(5.0, 5.0), 8));
        alloc.add_sub_alloc("a1/b", sub_b);

        assert_eq!(alloc.total_reserved().components(), &[18.0, 18.0]);
        let queue = alloc.utilization_queue(&vec2(20.0, 20.0));
        assert_eq!(queue.len(), 9);
        assert_eq!(queue[0].app_name, "1b");
    }
}
