use std::collections::HashMap;

use rand::prelude::*;

use super::Policy;
use crate::traits::ContentId;

/// Evicts a uniformly random resident item. The generator is seeded so a run
/// is reproducible.
#[derive(Debug, Clone)]
pub struct RandomEviction {
    capacity: usize,
    slots: Vec<ContentId>,
    index: HashMap<ContentId, usize>,
    rng: StdRng,
}

impl RandomEviction {
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomEviction {
    fn len(&self) -> usize {
        self.slots.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.index.contains_key(&k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        self.has(k)
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.has(k) {
            return None;
        }
        if self.slots.len() < self.capacity {
            self.index.insert(k, self.slots.len());
            self.slots.push(k);
            return None;
        }
        let slot = self.rng.gen_range(0..self.slots.len());
        let evicted = std::mem::replace(&mut self.slots[slot], k);
        self.index.remove(&evicted);
        self.index.insert(k, slot);
        Some(evicted)
    }

    fn remove(&mut self, k: ContentId) -> bool {
        let Some(slot) = self.index.remove(&k) else {
            return false;
        };
        self.slots.swap_remove(slot);
        if let Some(&moved) = self.slots.get(slot) {
            self.index.insert(moved, slot);
        }
        true
    }

    fn dump(&self) -> Vec<ContentId> {
        self.slots.clone()
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }
}
