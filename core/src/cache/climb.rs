use super::list::RankList;
use super::Policy;
use crate::traits::ContentId;

/// CLIMB: a hit moves the item one rank up, new items replace the bottom one.
///
/// While the cache is not full new items enter at the bottom as well.
#[derive(Debug, Clone)]
pub struct Climb {
    capacity: usize,
    list: RankList,
}

impl Climb {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            list: RankList::new(),
        }
    }

    pub fn position(&self, k: ContentId) -> Option<usize> {
        self.list.iter().position(|x| x == k)
    }
}

impl Policy for Climb {
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
        self.list.move_up(k);
        true
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if self.list.contains(k) {
            self.list.move_up(k);
            return None;
        }
        let evicted = if self.list.len() >= self.capacity {
            self.list.pop_bottom()
        } else {
            None
        };
        self.list.push_bottom(k);
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
