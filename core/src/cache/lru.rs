use super::list::RankList;
use super::Policy;
use crate::traits::ContentId;

/// Least Recently Used: hits and re-insertions move an item to the top, the
/// bottom item is evicted.
#[derive(Debug, Clone)]
pub struct Lru {
    capacity: usize,
    list: RankList,
}

impl Lru {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            list: RankList::new(),
        }
    }

    /// Position from the top (0 is most recently used), without touching
    /// recency.
    pub fn position(&self, k: ContentId) -> Option<usize> {
        self.list.iter().position(|x| x == k)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Policy for Lru {
    fn len(&self) -> usize {
        self.list.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.list.contains(k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        if !self.list.contains(k) {
            return false;
        }
        self.list.move_to_top(k);
        true
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.list.contains(k) {
            self.list.move_to_top(k);
            return None;
        }
        let evicted = if self.list.len() >= self.capacity {
            self.list.pop_bottom()
        } else {
            None
        };
        self.list.push_top(k);
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        self.list.remove(k)
    }

    fn dump(&self) -> Vec<ContentId> {
        self.list.iter().collect()
    }

    fn clear(&mut self) {
        self.list.clear();
    }
}
