//! Keyed List Differ
//!
//! [`KeyedDiffer`] decides, for a new list of keys, which existing
//! instances are reused, which are created, and which are removed. It knows
//! nothing about nodes; [`KeyedList`](super::KeyedList) applies the plan.
//!
//! # Matching
//!
//! Live instances are pooled per key in creation order. Each new key takes
//! the oldest unclaimed instance from its pool, so a key that appears
//! several times maps its n-th occurrence to the n-th surviving instance
//! for that key. Instance identity is therefore `(key, ordinal)` and no two
//! live instances ever share one.
//!
//! Whatever is left in the pools after matching is removed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one rendered list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What to do for one position of the new list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Reuse(InstanceId),
    Create(InstanceId),
}

impl Slot {
    pub fn id(&self) -> InstanceId {
        match self {
            Self::Reuse(id) | Self::Create(id) => *id,
        }
    }
}

/// The outcome of one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// One slot per new item, in new order.
    pub slots: Vec<Slot>,
    /// Instances with no place in the new list, in their old order.
    pub removed: Vec<InstanceId>,
}

impl DiffPlan {
    pub fn stats(&self) -> DiffStats {
        let created = self.slots.iter().filter(|s| matches!(s, Slot::Create(_))).count();
        DiffStats {
            created,
            reused: self.slots.len() - created,
            removed: self.removed.len(),
            moved: 0,
        }
    }
}

/// Counters for list reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub created: usize,
    pub reused: usize,
    pub removed: usize,
    pub moved: usize,
}

impl std::ops::AddAssign for DiffStats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.reused += other.reused;
        self.removed += other.removed;
        self.moved += other.moved;
    }
}

/// Tracks the live instances of a keyed list across updates.
#[derive(Debug)]
pub struct KeyedDiffer<K> {
    live: Vec<(K, InstanceId)>,
}

impl<K> Default for KeyedDiffer<K> {
    fn default() -> Self {
        Self { live: Vec::new() }
    }
}

impl<K> KeyedDiffer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Live instances in list order.
    pub fn live(&self) -> impl Iterator<Item = &(K, InstanceId)> {
        self.live.iter()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Match `keys` against the live instances and adopt the result as the
    /// new live set.
    pub fn plan(&mut self, keys: &[K]) -> DiffPlan {
        let mut pools: HashMap<&K, VecDeque<InstanceId>> = HashMap::with_capacity(self.live.len());
        for (key, id) in &self.live {
            pools.entry(key).or_default().push_back(*id);
        }

        let mut claimed = HashSet::with_capacity(keys.len());
        let slots: Vec<Slot> = keys
            .iter()
            .map(|key| match pools.get_mut(key).and_then(VecDeque::pop_front) {
                Some(id) => {
                    claimed.insert(id);
                    Slot::Reuse(id)
                }
                None => Slot::Create(InstanceId::new()),
            })
            .collect();

        let removed = self
            .live
            .iter()
            .map(|(_, id)| *id)
            .filter(|id| !claimed.contains(id))
            .collect();

        self.live = keys.iter().cloned().zip(slots.iter().map(Slot::id)).collect();
        DiffPlan { slots, removed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(plan: &DiffPlan) -> Vec<InstanceId> {
        plan.slots.iter().map(Slot::id).collect()
    }

    #[test]
    fn first_plan_creates_everything() {
        let mut differ = KeyedDiffer::new();
        let plan = differ.plan(&["a", "b", "c"]);
        assert!(plan.slots.iter().all(|s| matches!(s, Slot::Create(_))));
        assert!(plan.removed.is_empty());
        assert_eq!(differ.len(), 3);
    }

    #[test]
    fn rotation_reuses_every_instance() {
        let mut differ = KeyedDiffer::new();
        let first = ids(&differ.plan(&["a", "b", "c"]));
        let plan = differ.plan(&["c", "a", "b"]);

        assert_eq!(plan.slots, vec![Slot::Reuse(first[2]), Slot::Reuse(first[0]), Slot::Reuse(first[1])]);
        assert_eq!(plan.stats(), DiffStats { created: 0, reused: 3, removed: 0, moved: 0 });
    }

    #[test]
    fn unseen_keys_create_and_leftovers_are_removed() {
        let mut differ = KeyedDiffer::new();
        let first = ids(&differ.plan(&[1, 2, 3]));
        let plan = differ.plan(&[3, 4]);

        assert_eq!(plan.slots[0], Slot::Reuse(first[2]));
        assert!(matches!(plan.slots[1], Slot::Create(_)));
        assert_eq!(plan.removed, vec![first[0], first[1]]);
    }

    #[test]
    fn duplicate_keys_reuse_in_creation_order() {
        let mut differ = KeyedDiffer::new();
        let first = ids(&differ.plan(&["x", "y", "x"]));
        let plan = differ.plan(&["x", "x"]);

        assert_eq!(plan.slots, vec![Slot::Reuse(first[0]), Slot::Reuse(first[2])]);
        assert_eq!(plan.removed, vec![first[1]]);

        let plan = differ.plan(&["x"]);
        assert_eq!(plan.slots, vec![Slot::Reuse(first[0])]);
        assert_eq!(plan.removed, vec![first[2]]);
        assert_eq!(differ.live().cloned().collect::<Vec<_>>(), vec![("x", first[0])]);
    }

    proptest! {
        #[test]
        fn plans_account_for_every_instance(
            before in prop::collection::vec(0u8..6, 0..12),
            after in prop::collection::vec(0u8..6, 0..12),
        ) {
            let mut differ = KeyedDiffer::new();
            let old_ids: HashSet<_> = differ.plan(&before).slots.iter().map(Slot::id).collect();
            let plan = differ.plan(&after);
            let stats = plan.stats();

            prop_assert_eq!(stats.created + stats.reused, after.len());
            prop_assert_eq!(stats.reused + stats.removed, before.len());

            let mut seen = HashSet::new();
            for slot in &plan.slots {
                prop_assert!(seen.insert(slot.id()));
                if let Slot::Reuse(id) = slot {
                    prop_assert!(old_ids.contains(id));
                }
            }
            for id in &plan.removed {
                prop_assert!(old_ids.contains(id));
                prop_assert!(!seen.contains(id));
            }

            let shared: usize = (0u8..6)
                .map(|k| {
                    let a = before.iter().filter(|x| **x == k).count();
                    let b = after.iter().filter(|x| **x == k).count();
                    a.min(b)
                })
                .sum();
            prop_assert_eq!(stats.reused, shared);
        }
    }
}
