use std::collections::{BTreeSet, HashMap};

use super::lru::Lru;
use super::Policy;
use crate::context::SimClock;
use crate::traits::{ContentId, SimTime};

/// LRU cache whose items expire `ttl` microseconds after insertion.
///
/// An item whose expiry is at or before the current simulated time is gone:
/// it is dropped lazily when touched, when space is needed, or when an
/// expiry event asks for a purge. Capacity evictions fall back to LRU.
#[derive(Debug, Clone)]
pub struct Ttl {
    lru: Lru,
    ttl: SimTime,
    refresh_on_hit: bool,
    clock: SimClock,
    expiry: HashMap<ContentId, SimTime>,
    deadlines: BTreeSet<(SimTime, ContentId)>,
}

impl Ttl {
    pub fn new(capacity: usize, ttl: SimTime, refresh_on_hit: bool, clock: SimClock) -> Self {
        Self {
            lru: Lru::new(capacity),
            ttl,
            refresh_on_hit,
            clock,
            expiry: HashMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    pub fn ttl(&self) -> SimTime {
        self.ttl
    }

    pub fn expiry_of(&self, k: ContentId) -> Option<SimTime> {
        self.expiry.get(&k).copied()
    }

    fn is_live(&self, k: ContentId, now: SimTime) -> bool {
        self.expiry.get(&k).is_some_and(|&e| e > now)
    }

    fn set_expiry(&mut self, k: ContentId, at: SimTime) {
        if let Some(old) = self.expiry.insert(k, at) {
            self.deadlines.remove(&(old, k));
        }
        self.deadlines.insert((at, k));
    }

    fn forget(&mut self, k: ContentId) {
        if let Some(old) = self.expiry.remove(&k) {
            self.deadlines.remove(&(old, k));
        }
    }

    /// Drops every item expired at `now`, returning them oldest deadline
    /// first.
    pub fn purge(&mut self, now: SimTime) -> Vec<ContentId> {
        let mut purged = Vec::new();
        while let Some(&(at, k)) = self.deadlines.first() {
            if at > now {
                break;
            }
            self.deadlines.pop_first();
            self.expiry.remove(&k);
            self.lru.remove(k);
            purged.push(k);
        }
        purged
    }
}

impl Policy for Ttl {
    fn len(&self) -> usize {
        self.lru.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.lru.has(k) && self.is_live(k, self.clock.now())
    }

    fn get(&mut self, k: ContentId) -> bool {
        let now = self.clock.now();
        if !self.lru.has(k) {
            return false;
        }
        if !self.is_live(k, now) {
            self.remove(k);
            return false;
        }
        self.lru.get(k);
        if self.refresh_on_hit {
            self.set_expiry(k, now.saturating_add(self.ttl));
        }
        true
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        let now = self.clock.now();
        if self.lru.has(k) && !self.is_live(k, now) {
            self.remove(k);
        }
        if !self.lru.has(k) && self.lru.len() >= self.lru.capacity() {
            self.purge(now);
        }
        let evicted = self.lru.put(k);
        if let Some(v) = evicted {
            self.forget(v);
        }
        self.set_expiry(k, now.saturating_add(self.ttl));
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.forget(k);
        self.lru.remove(k)
    }

    fn dump(&self) -> Vec<ContentId> {
        let now = self.clock.now();
        self.lru
            .dump()
            .into_iter()
            .filter(|&k| self.is_live(k, now))
            .collect()
    }

    fn clear(&mut self) {
        self.lru.clear();
        self.expiry.clear();
        self.deadlines.clear();
    }
}
