use std::collections::{BTreeSet, HashMap};

use super::Policy;
use crate::traits::ContentId;

/// Frequency table ordered by `(count, insertion sequence)`, so the first
/// element is the victim: lowest count, earliest insertion among ties.
#[derive(Debug, Clone, Default)]
struct FrequencyTable {
    entries: HashMap<ContentId, (u64, u64)>,
    order: BTreeSet<(u64, u64, ContentId)>,
}

impl FrequencyTable {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, k: ContentId) -> bool {
        self.entries.contains_key(&k)
    }

    fn insert(&mut self, k: ContentId, count: u64, seq: u64) {
        if let Some((c, s)) = self.entries.insert(k, (count, seq)) {
            self.order.remove(&(c, s, k));
        }
        self.order.insert((count, seq, k));
    }

    fn update(&mut self, k: ContentId, f: impl FnOnce(u64) -> u64) -> bool {
        let Some(&(count, seq)) = self.entries.get(&k) else {
            return false;
        };
        self.insert(k, f(count), seq);
        true
    }

    fn min(&self) -> Option<(u64, u64, ContentId)> {
        self.order.first().copied()
    }

    fn pop_min(&mut self) -> Option<ContentId> {
        let (_, _, k) = self.order.pop_first()?;
        self.entries.remove(&k);
        Some(k)
    }

    fn remove(&mut self, k: ContentId) -> bool {
        match self.entries.remove(&k) {
            Some((c, s)) => {
                self.order.remove(&(c, s, k));
                true
            }
            None => false,
        }
    }

    fn dump(&self) -> Vec<ContentId> {
        self.order.iter().rev().map(|&(_, _, k)| k).collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// In-cache LFU. Counters live only while the item is resident.
#[derive(Debug, Clone)]
pub struct Lfu {
    capacity: usize,
    table: FrequencyTable,
    seq: u64,
}

impl Lfu {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            table: FrequencyTable::default(),
            seq: 0,
        }
    }

    pub fn count(&self, k: ContentId) -> Option<u64> {
        self.table.entries.get(&k).map(|&(c, _)| c)
    }
}

impl Policy for Lfu {
    fn len(&self) -> usize {
        self.table.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.table.contains(k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        self.table.update(k, |c| c + 1)
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.table.contains(k) {
            return None;
        }
        let evicted = if self.table.len() >= self.capacity {
            self.table.pop_min()
        } else {
            None
        };
        self.seq += 1;
        self.table.insert(k, 1, self.seq);
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.table.remove(k)
    }

    fn dump(&self) -> Vec<ContentId> {
        self.table.dump()
    }

    fn clear(&mut self) {
        self.table.clear();
    }
}

/// Perfect LFU. Every lookup and every offer is counted, resident or not,
/// and counters survive eviction so a re-admitted item keeps its rank.
#[derive(Debug, Clone)]
pub struct PerfectLfu {
    capacity: usize,
    counters: HashMap<ContentId, (u64, u64)>,
    resident: FrequencyTable,
    seq: u64,
}

impl PerfectLfu {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counters: HashMap::new(),
            resident: FrequencyTable::default(),
            seq: 0,
        }
    }

    pub fn count(&self, k: ContentId) -> Option<u64> {
        self.counters.get(&k).map(|&(c, _)| c)
    }
}

impl Policy for PerfectLfu {
    fn len(&self) -> usize {
        self.resident.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.resident.contains(k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        self.seq += 1;
        let seq = self.seq;
        let entry = self.counters.entry(k).or_insert((0, seq));
        entry.0 += 1;
        let count = entry.0;
        self.resident.update(k, |_| count)
    }

    /// Counts the offer, then keeps the `capacity` best ranked items among
    /// the residents and `k`. A newcomer ranked below every resident is not
    /// admitted.
    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.resident.contains(k) {
            return None;
        }
        self.seq += 1;
        let seq = self.seq;
        let entry = self.counters.entry(k).or_insert((0, seq));
        entry.0 += 1;
        let (count, first_seen) = *entry;
        if self.resident.len() < self.capacity {
            self.resident.insert(k, count, first_seen);
            return None;
        }
        match self.resident.min() {
            Some(weakest) if (count, first_seen, k) < weakest => None,
            _ => {
                let evicted = self.resident.pop_min();
                self.resident.insert(k, count, first_seen);
                evicted
            }
        }
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.resident.remove(k)
    }

    fn dump(&self) -> Vec<ContentId> {
        self.resident.dump()
    }

    fn clear(&mut self) {
        self.resident.clear();
        self.counters.clear();
    }
}

/// Approximate in-cache LFU with small saturating counters that are halved
/// every `aging_period` lookups, so stale popularity fades out.
#[derive(Debug, Clone)]
pub struct ApproxLfu {
    capacity: usize,
    max_count: u64,
    aging_period: u64,
    lookups: u64,
    table: FrequencyTable,
    seq: u64,
}

impl ApproxLfu {
    pub fn new(capacity: usize, max_count: u64, aging_period: u64) -> Self {
        Self {
            capacity,
            max_count: max_count.max(1),
            aging_period: aging_period.max(1),
            lookups: 0,
            table: FrequencyTable::default(),
            seq: 0,
        }
    }

    pub fn count(&self, k: ContentId) -> Option<u64> {
        self.table.entries.get(&k).map(|&(c, _)| c)
    }

    fn age(&mut self) {
        let aged: Vec<_> = self
            .table
            .entries
            .iter()
            .map(|(&k, &(c, s))| (k, (c / 2).max(1), s))
            .collect();
        self.table.clear();
        for (k, c, s) in aged {
            self.table.insert(k, c, s);
        }
    }
}

impl Policy for ApproxLfu {
    fn len(&self) -> usize {
        self.table.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.table.contains(k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        let max = self.max_count;
        let hit = self.table.update(k, |c| (c + 1).min(max));
        self.lookups += 1;
        if self.lookups % self.aging_period == 0 {
            self.age();
        }
        hit
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.table.contains(k) {
            return None;
        }
        let evicted = if self.table.len() >= self.capacity {
            self.table.pop_min()
        } else {
            None
        };
        self.seq += 1;
        self.table.insert(k, 1, self.seq);
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.table.remove(k)
    }

    fn dump(&self) -> Vec<ContentId> {
        self.table.dump()
    }

    fn clear(&mut self) {
        self.table.clear();
        self.lookups = 0;
    }
}
