use std::collections::{HashSet, VecDeque};

use super::Policy;
use crate::traits::ContentId;

/// First In First Out: the earliest inserted item goes first, accesses never
/// reorder anything.
#[derive(Debug, Clone)]
pub struct Fifo {
    capacity: usize,
    members: HashSet<ContentId>,
    // Front is the newest insertion.
    order: VecDeque<ContentId>,
}

impl Fifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }
}

impl Policy for Fifo {
    fn len(&self) -> usize {
        self.members.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.members.contains(&k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        self.has(k)
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.members.contains(&k) {
            return None;
        }
        let evicted = if self.members.len() >= self.capacity {
            let victim = self.order.pop_back();
            if let Some(v) = victim {
                self.members.remove(&v);
            }
            victim
        } else {
            None
        };
        self.members.insert(k);
        self.order.push_front(k);
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        if !self.members.remove(&k) {
            return false;
        }
        self.order.retain(|&x| x != k);
        true
    }

    fn dump(&self) -> Vec<ContentId> {
        self.order.iter().copied().collect()
    }

    fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}
