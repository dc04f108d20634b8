use std::collections::HashSet;
use std::sync::Arc;

use super::Policy;
use crate::context::TraceCursor;
use crate::traits::ContentId;
use crate::workload::NextReferenceIndex;

/// Belady's MIN: on overflow, drop whatever is requested again the latest.
///
/// If the incoming item itself is the one needed latest it is not admitted,
/// which is what keeps MIN an upper bound on every other policy. Only usable
/// offline since it reads the next-reference index of the whole workload.
#[derive(Debug, Clone)]
pub struct BeladyMin {
    capacity: usize,
    resident: HashSet<ContentId>,
    index: Arc<NextReferenceIndex>,
    cursor: TraceCursor,
}

impl BeladyMin {
    pub fn new(capacity: usize, index: Arc<NextReferenceIndex>, cursor: TraceCursor) -> Self {
        Self {
            capacity,
            resident: HashSet::with_capacity(capacity),
            index,
            cursor,
        }
    }

    fn next_use(&self, k: ContentId) -> u64 {
        self.index.next_after(k, self.cursor.position())
    }
}

impl Policy for BeladyMin {
    fn len(&self) -> usize {
        self.resident.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.resident.contains(&k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        self.has(k)
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.resident.contains(&k) {
            return None;
        }
        if self.resident.len() < self.capacity {
            self.resident.insert(k);
            return None;
        }
        // Ties (several items never used again) go to the largest id.
        let (victim, victim_next) = self
            .resident
            .iter()
            .map(|&v| (v, self.next_use(v)))
            .max_by_key(|&(v, next)| (next, v))?;
        if self.next_use(k) < victim_next {
            self.resident.remove(&victim);
            self.resident.insert(k);
            Some(victim)
        } else {
            None
        }
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.resident.remove(&k)
    }

    fn dump(&self) -> Vec<ContentId> {
        let mut items: Vec<_> = self
            .resident
            .iter()
            .map(|&k| (self.next_use(k), k))
            .collect();
        items.sort_unstable();
        items.into_iter().map(|(_, k)| k).collect()
    }

    fn clear(&mut self) {
        self.resident.clear();
    }
}
