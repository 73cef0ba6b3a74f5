//! Per-executor vector clocks, used by the `vector-clock` conflict
//! resolution policy to establish causal ordering between operations.

use std::collections::HashMap;
use uuid::Uuid;

/// A vector clock keyed by executor id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorClock {
    clocks: HashMap<Uuid, u64>,
}

impl VectorClock {
    /// An empty clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `executor`.
    pub fn increment(&mut self, executor: Uuid) {
        *self.clocks.entry(executor).or_insert(0) += 1;
    }

    /// Merge another clock into this one, taking the pointwise maximum.
    pub fn merge(&mut self, other: &VectorClock) {
        for (executor, value) in &other.clocks {
            let entry = self.clocks.entry(*executor).or_insert(0);
            *entry = (*entry).max(*value);
        }
    }

    /// Whether `self` causally happened strictly before `other`.
    #[must_use]
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;
        for (executor, ours) in &self.clocks {
            let theirs = other.clocks.get(executor).copied().unwrap_or(0);
            if *ours > theirs {
                return false;
            }
            if *ours < theirs {
                strictly_less = true;
            }
        }
        for (executor, theirs) in &other.clocks {
            if !self.clocks.contains_key(executor) && *theirs > 0 {
                strictly_less = true;
            }
        }
        strictly_less
    }

    /// Whether neither clock happened before the other.
    #[must_use]
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incrementing_establishes_happens_before() {
        let a1 = Uuid::new_v4();
        let mut earlier = VectorClock::new();
        earlier.increment(a1);

        let mut later = earlier.clone();
        later.increment(a1);

        assert!(earlier.happens_before(&later));
        assert!(!later.happens_before(&earlier));
    }

    #[test]
    fn independent_increments_are_concurrent() {
        let mut a = VectorClock::new();
        a.increment(Uuid::new_v4());
        let mut b = VectorClock::new();
        b.increment(Uuid::new_v4());
        assert!(a.concurrent(&b));
    }
}
