//! Bounded record of trigger ids that have already been acted upon.
//!
//! The agent writes the same trigger to several paths, so one logical trigger
//! usually shows up more than once. Once the set grows past the high-water
//! mark the oldest half is evicted; an id that old will not be re-sent.

use std::collections::{HashSet, VecDeque};

pub const DEFAULT_HIGH_WATER: usize = 100;

#[derive(Debug)]
pub struct ProcessedTriggers {
    order: VecDeque<String>,
    ids: HashSet<String>,
    high_water: usize,
}

impl Default for ProcessedTriggers {
    fn default() -> Self {
        Self::with_high_water(DEFAULT_HIGH_WATER)
    }
}

impl ProcessedTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_high_water(high_water: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            high_water: high_water.max(2),
        }
    }

    pub fn contains(&self, trigger_id: &str) -> bool {
        self.ids.contains(trigger_id)
    }

    /// Records `trigger_id`. Returns false if it was already present.
    pub fn mark(&mut self, trigger_id: &str) -> bool {
        if !self.ids.insert(trigger_id.to_string()) {
            return false;
        }
        self.order.push_back(trigger_id.to_string());

        if self.order.len() > self.high_water {
            let evict = self.order.len() - self.high_water / 2;
            for old in self.order.drain(..evict) {
                self.ids.remove(&old);
            }
            tracing::debug!(
                evicted = evict,
                remaining = self.order.len(),
                "Evicted oldest processed trigger ids"
            );
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
