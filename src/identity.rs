//! Identity groups: bounded pools of integer identities.

use std::collections::BTreeSet;

/// A named pool of `count` integer identities, at most one per app that
/// references the group.
#[derive(Debug, Clone)]
pub struct IdentityGroup {
    name: String,
    count: usize,
    available: BTreeSet<usize>,
}

impl IdentityGroup {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            available: (0..count).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn available(&self) -> &BTreeSet<usize> {
        &self.available
    }

    /// Remove and return the smallest available id, or `None` if the
    /// group is exhausted.
    pub fn acquire(&mut self) -> Option<usize> {
        let id = *self.available.iter().next()?;
        self.available.remove(&id);
        Some(id)
    }

    /// Re-add `id` to the available set, provided it is still within the
    /// group's current count (an id freed after a shrink is simply
    /// dropped, per spec).
    pub fn release(&mut self, id: usize) {
        if id < self.count {
            self.available.insert(id);
        }
    }

    /// Set the group's count to `new_count`. Growing adds the newly
    /// opened ids to `available`; shrinking drops any available id that
    /// is now out of range. Ids currently held (not in `available`) that
    /// end up `>= new_count` are not forcibly revoked here; the caller
    /// (the placement engine) is responsible for noticing at the next
    /// cycle and un-placing their holders.
    pub fn adjust(&mut self, new_count: usize) {
        if new_count > self.count {
            self.available.extend(self.count..new_count);
        } else if new_count < self.count {
            self.available.retain(|&id| id < new_count);
        }
        self.count = new_count;
    }

    /// True if `id` is no longer a legal identity under the current count.
    pub fn is_over_capacity(&self, id: usize) -> bool {
        id >= self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_cycle() {
        let mut group = IdentityGroup::new("g", 3);
        assert_eq!(group.acquire(), Some(0));
        assert_eq!(group.acquire(), Some(1));
        assert_eq!(group.acquire(), Some(2));
        assert_eq!(group.acquire(), None);

        group.release(1);
        assert_eq!(group.acquire(), Some(1));
    }

    #[test]
    fn adjust_grows_and_shrinks_available() {
        let mut group = IdentityGroup::new("g", 5);
        group.available = [1, 3].into_iter().collect();

        group.adjust(7);
        assert_eq!(group.available, [1, 3, 5, 6].into_iter().collect());

        group.adjust(3);
        assert_eq!(group.available, [1].into_iter().collect());
    }

    #[test]
    fn held_ids_past_new_count_are_flagged_but_not_forcibly_revoked() {
        let mut group = IdentityGroup::new("g", 5);
        group.acquire(); // 0
        group.acquire(); // 1
        group.adjust(1);
        assert!(group.is_over_capacity(1));
        assert!(!group.is_over_capacity(0));
    }
}
