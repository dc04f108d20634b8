//! Caches made of several member caches behind a single node, plus the null
//! cache that stores nothing.

use rand::distributions::WeightedIndex;
use rand::prelude::*;

use super::{EvictionPolicy, Policy};
use crate::traits::ContentId;

/// Splits `capacity` slots over `members` caches. The first
/// `capacity % members` members get one extra slot.
pub(crate) fn split_capacity(capacity: usize, members: usize) -> Vec<usize> {
    let base = capacity / members;
    let extra = capacity % members;
    (0..members).map(|i| base + usize::from(i < extra)).collect()
}

fn dump_all<'a>(members: impl IntoIterator<Item = &'a EvictionPolicy>) -> Vec<ContentId> {
    members.into_iter().flat_map(|m| m.dump()).collect()
}

/// Never stores anything. Every lookup misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

impl Policy for NullCache {
    fn len(&self) -> usize {
        0
    }

    fn has(&self, _k: ContentId) -> bool {
        false
    }

    fn get(&mut self, _k: ContentId) -> bool {
        false
    }

    fn put(&mut self, _k: ContentId) -> Option<ContentId> {
        None
    }

    fn remove(&mut self, _k: ContentId) -> bool {
        false
    }

    fn dump(&self) -> Vec<ContentId> {
        Vec::new()
    }

    fn clear(&mut self) {}
}

/// Shards coordinately storing contents: content `k` can only live in shard
/// `k % shards`.
#[derive(Debug, Clone)]
pub struct ShardedCache {
    shards: Vec<EvictionPolicy>,
}

impl ShardedCache {
    pub fn new(shards: Vec<EvictionPolicy>) -> Self {
        Self { shards }
    }

    pub fn shard_of(&self, k: ContentId) -> usize {
        (k % self.shards.len() as u64) as usize
    }

    pub fn shards(&self) -> &[EvictionPolicy] {
        &self.shards
    }
}

impl Policy for ShardedCache {
    fn len(&self) -> usize {
        self.shards.iter().map(Policy::len).sum()
    }

    fn has(&self, k: ContentId) -> bool {
        self.shards[self.shard_of(k)].has(k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        let i = self.shard_of(k);
        self.shards[i].get(k)
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        let i = self.shard_of(k);
        self.shards[i].put(k)
    }

    fn remove(&mut self, k: ContentId) -> bool {
        let i = self.shard_of(k);
        self.shards[i].remove(k)
    }

    fn dump(&self) -> Vec<ContentId> {
        dump_all(&self.shards)
    }

    fn clear(&mut self) {
        self.shards.iter_mut().for_each(Policy::clear);
    }
}

/// Independent caches with each lookup handed to a randomly picked one.
///
/// Read-through only: a `put` goes to the member picked by the last `get`.
/// A `put` with no `get` before it picks a member of its own.
#[derive(Debug, Clone)]
pub struct ArrayCache {
    members: Vec<EvictionPolicy>,
    weights: Option<WeightedIndex<f64>>,
    rng: StdRng,
    selected: Option<usize>,
}

impl ArrayCache {
    pub fn new(members: Vec<EvictionPolicy>, weights: Option<WeightedIndex<f64>>, seed: u64) -> Self {
        Self {
            members,
            weights,
            rng: StdRng::seed_from_u64(seed),
            selected: None,
        }
    }

    pub fn members(&self) -> &[EvictionPolicy] {
        &self.members
    }

    /// Member that served the last lookup.
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    fn pick(&mut self) -> usize {
        let i = match &self.weights {
            Some(w) => w.sample(&mut self.rng),
            None => self.rng.gen_range(0..self.members.len()),
        };
        self.selected = Some(i);
        i
    }
}

impl Policy for ArrayCache {
    fn len(&self) -> usize {
        self.members.iter().map(Policy::len).sum()
    }

    fn has(&self, k: ContentId) -> bool {
        self.members.iter().any(|m| m.has(k))
    }

    fn get(&mut self, k: ContentId) -> bool {
        let i = self.pick();
        self.members[i].get(k)
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        let i = match self.selected {
            Some(i) => i,
            None => self.pick(),
        };
        self.members[i].put(k)
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.members
            .iter_mut()
            .fold(false, |removed, m| m.remove(k) || removed)
    }

    fn dump(&self) -> Vec<ContentId> {
        dump_all(&self.members)
    }

    fn clear(&mut self) {
        self.members.iter_mut().for_each(Policy::clear);
        self.selected = None;
    }
}

/// Chain of caches looked up in order. A hit at one level copies the
/// content into every level looked up before it.
#[derive(Debug, Clone)]
pub struct PathCache {
    levels: Vec<EvictionPolicy>,
}

impl PathCache {
    pub fn new(levels: Vec<EvictionPolicy>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[EvictionPolicy] {
        &self.levels
    }
}

impl Policy for PathCache {
    fn len(&self) -> usize {
        self.levels.iter().map(Policy::len).sum()
    }

    fn has(&self, k: ContentId) -> bool {
        self.levels.iter().any(|c| c.has(k))
    }

    fn get(&mut self, k: ContentId) -> bool {
        let Some(hit) = self.levels.iter_mut().position(|c| c.get(k)) else {
            return false;
        };
        for level in &mut self.levels[..hit] {
            level.put(k);
        }
        true
    }

    /// Offers `k` to every level. Returns what the first level evicted.
    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        let mut evicted = None;
        for (i, level) in self.levels.iter_mut().enumerate() {
            let out = level.put(k);
            if i == 0 {
                evicted = out;
            }
        }
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.levels
            .iter_mut()
            .fold(false, |removed, c| c.remove(k) || removed)
    }

    fn dump(&self) -> Vec<ContentId> {
        dump_all(&self.levels)
    }

    fn clear(&mut self) {
        self.levels.iter_mut().for_each(Policy::clear);
    }
}

/// Leaf caches in front of a shared root. Each lookup goes to a random leaf
/// and falls through to the root; a root hit is copied into the leaf.
#[derive(Debug, Clone)]
pub struct TreeCache {
    leaves: Vec<EvictionPolicy>,
    root: Box<EvictionPolicy>,
    rng: StdRng,
    selected: Option<usize>,
}

impl TreeCache {
    pub fn new(leaves: Vec<EvictionPolicy>, root: EvictionPolicy, seed: u64) -> Self {
        Self {
            leaves,
            root: Box::new(root),
            rng: StdRng::seed_from_u64(seed),
            selected: None,
        }
    }

    pub fn leaves(&self) -> &[EvictionPolicy] {
        &self.leaves
    }

    pub fn root(&self) -> &EvictionPolicy {
        &self.root
    }

    fn pick(&mut self) -> usize {
        let i = self.rng.gen_range(0..self.leaves.len());
        self.selected = Some(i);
        i
    }
}

impl Policy for TreeCache {
    fn len(&self) -> usize {
        self.leaves.iter().map(Policy::len).sum::<usize>() + self.root.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.leaves.iter().any(|c| c.has(k)) || self.root.has(k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        let leaf = self.pick();
        if self.leaves[leaf].get(k) {
            return true;
        }
        if self.root.get(k) {
            self.leaves[leaf].put(k);
            return true;
        }
        false
    }

    /// Stores `k` in the last picked leaf and in the root. Returns what the
    /// leaf evicted.
    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        let leaf = match self.selected {
            Some(i) => i,
            None => self.pick(),
        };
        let evicted = self.leaves[leaf].put(k);
        self.root.put(k);
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        let in_leaves = self
            .leaves
            .iter_mut()
            .fold(false, |removed, c| c.remove(k) || removed);
        self.root.remove(k) || in_leaves
    }

    fn dump(&self) -> Vec<ContentId> {
        dump_all(self.leaves.iter().chain(std::iter::once(self.root.as_ref())))
    }

    fn clear(&mut self) {
        self.leaves.iter_mut().for_each(Policy::clear);
        self.root.clear();
        self.selected = None;
    }
}
