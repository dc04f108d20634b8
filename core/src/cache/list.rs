use std::collections::HashMap;

use crate::traits::ContentId;

#[derive(Debug, Clone, Copy)]
struct Link {
    up: Option<ContentId>,
    down: Option<ContentId>,
}

/// Doubly linked list of content ids with O(1) lookup, top to bottom.
///
/// Top is the most relevant end (MRU for LRU, highest rank for CLIMB).
#[derive(Debug, Clone, Default)]
pub(crate) struct RankList {
    links: HashMap<ContentId, Link>,
    top: Option<ContentId>,
    bottom: Option<ContentId>,
}

impl RankList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn contains(&self, k: ContentId) -> bool {
        self.links.contains_key(&k)
    }

    pub fn bottom(&self) -> Option<ContentId> {
        self.bottom
    }

    fn unlink(&mut self, k: ContentId) {
        let Some(link) = self.links.get(&k).copied() else {
            return;
        };
        match link.up {
            Some(up) => {
                if let Some(l) = self.links.get_mut(&up) {
                    l.down = link.down;
                }
            }
            None => self.top = link.down,
        }
        match link.down {
            Some(down) => {
                if let Some(l) = self.links.get_mut(&down) {
                    l.up = link.up;
                }
            }
            None => self.bottom = link.up,
        }
    }

    fn link_top(&mut self, k: ContentId) {
        let old_top = self.top;
        self.links.insert(
            k,
            Link {
                up: None,
                down: old_top,
            },
        );
        match old_top {
            Some(t) => {
                if let Some(l) = self.links.get_mut(&t) {
                    l.up = Some(k);
                }
            }
            None => self.bottom = Some(k),
        }
        self.top = Some(k);
    }

    fn link_bottom(&mut self, k: ContentId) {
        let old_bottom = self.bottom;
        self.links.insert(
            k,
            Link {
                up: old_bottom,
                down: None,
            },
        );
        match old_bottom {
            Some(b) => {
                if let Some(l) = self.links.get_mut(&b) {
                    l.down = Some(k);
                }
            }
            None => self.top = Some(k),
        }
        self.bottom = Some(k);
    }

    /// Inserts `k` on top. Caller guarantees it is not present.
    pub fn push_top(&mut self, k: ContentId) {
        debug_assert!(!self.contains(k));
        self.link_top(k);
    }

    /// Inserts `k` at the bottom. Caller guarantees it is not present.
    pub fn push_bottom(&mut self, k: ContentId) {
        debug_assert!(!self.contains(k));
        self.link_bottom(k);
    }

    pub fn pop_bottom(&mut self) -> Option<ContentId> {
        let k = self.bottom?;
        self.unlink(k);
        self.links.remove(&k);
        Some(k)
    }

    pub fn remove(&mut self, k: ContentId) -> bool {
        if !self.contains(k) {
            return false;
        }
        self.unlink(k);
        self.links.remove(&k);
        true
    }

    pub fn move_to_top(&mut self, k: ContentId) {
        if self.top == Some(k) || !self.contains(k) {
            return;
        }
        self.unlink(k);
        self.link_top(k);
    }

    /// Swaps `k` with the item right above it.
    pub fn move_up(&mut self, k: ContentId) {
        let Some(above) = self.links.get(&k).and_then(|l| l.up) else {
            return;
        };
        // Re-link `above` right below `k`: unlink it, then splice after k.
        self.unlink(above);
        let below = self.links.get(&k).and_then(|l| l.down);
        self.links.insert(
            above,
            Link {
                up: Some(k),
                down: below,
            },
        );
        if let Some(l) = self.links.get_mut(&k) {
            l.down = Some(above);
        }
        match below {
            Some(b) => {
                if let Some(l) = self.links.get_mut(&b) {
                    l.up = Some(above);
                }
            }
            None => self.bottom = Some(above),
        }
    }

    pub fn iter(&self) -> RankIter<'_> {
        RankIter {
            list: self,
            next: self.top,
        }
    }

    pub fn clear(&mut self) {
        self.links.clear();
        self.top = None;
        self.bottom = None;
    }
}

pub(crate) struct RankIter<'a> {
    list: &'a RankList,
    next: Option<ContentId>,
}

impl Iterator for RankIter<'_> {
    type Item = ContentId;

    fn next(&mut self) -> Option<ContentId> {
        let k = self.next?;
        self.next = self.list.links.get(&k).and_then(|l| l.down);
        Some(k)
    }
}
