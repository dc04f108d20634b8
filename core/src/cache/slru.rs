use std::collections::HashMap;

use super::list::RankList;
use super::Policy;
use crate::error::ConfigError;
use crate::traits::ContentId;

/// Segmented LRU.
///
/// Segment 0 is the most protected one, the last segment is probationary.
/// New items enter the top of the probationary segment, a hit promotes an item
/// to the top of the segment above, and an item overflowing a segment is
/// demoted to the top of the segment below. Items overflowing the
/// probationary segment leave the cache.
#[derive(Debug, Clone)]
pub struct SegmentedLru {
    capacity: usize,
    segments: Vec<RankList>,
    segment_capacity: Vec<usize>,
    location: HashMap<ContentId, usize>,
}

impl SegmentedLru {
    pub fn new(
        capacity: usize,
        segments: usize,
        alloc: Option<&[f64]>,
    ) -> Result<Self, ConfigError> {
        if segments == 0 || segments > capacity {
            return Err(ConfigError::invalid(
                "segments",
                format!("must be between 1 and the capacity ({capacity}), got {segments}"),
            ));
        }
        let fractions: Vec<f64> = match alloc {
            Some(a) => {
                if a.len() != segments {
                    return Err(ConfigError::invalid(
                        "alloc",
                        format!("expected {segments} entries, got {}", a.len()),
                    ));
                }
                if (a.iter().sum::<f64>() - 1.0).abs() > 1e-3 || a.iter().any(|&f| f < 0.0) {
                    return Err(ConfigError::invalid(
                        "alloc",
                        "entries must be non-negative and sum to 1",
                    ));
                }
                a.to_vec()
            }
            None => vec![1.0 / segments as f64; segments],
        };
        let segment_capacity = apportionment(capacity, &fractions);
        if segment_capacity.contains(&0) {
            return Err(ConfigError::invalid(
                "alloc",
                format!("every segment needs at least one slot, got {segment_capacity:?}"),
            ));
        }
        Ok(Self {
            capacity,
            segments: (0..segments).map(|_| RankList::new()).collect(),
            segment_capacity,
            location: HashMap::new(),
        })
    }

    pub fn segment_of(&self, k: ContentId) -> Option<usize> {
        self.location.get(&k).copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn promote(&mut self, k: ContentId, seg: usize) {
        if seg == 0 {
            self.segments[0].move_to_top(k);
            return;
        }
        let upper = seg - 1;
        self.segments[seg].remove(k);
        self.segments[upper].push_top(k);
        self.location.insert(k, upper);
        if self.segments[upper].len() > self.segment_capacity[upper] {
            if let Some(demoted) = self.segments[upper].pop_bottom() {
                self.segments[seg].push_top(demoted);
                self.location.insert(demoted, seg);
            }
        }
    }
}

impl Policy for SegmentedLru {
    fn len(&self) -> usize {
        self.location.len()
    }

    fn has(&self, k: ContentId) -> bool {
        self.location.contains_key(&k)
    }

    fn get(&mut self, k: ContentId) -> bool {
        match self.location.get(&k).copied() {
            Some(seg) => {
                self.promote(k, seg);
                true
            }
            None => false,
        }
    }

    fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if let Some(seg) = self.location.get(&k).copied() {
            self.promote(k, seg);
            return None;
        }
        let last = self.segments.len() - 1;
        let evicted = if self.segments[last].len() >= self.segment_capacity[last] {
            let victim = self.segments[last].pop_bottom();
            if let Some(v) = victim {
                self.location.remove(&v);
            }
            victim
        } else {
            None
        };
        self.segments[last].push_top(k);
        self.location.insert(k, last);
        evicted
    }

    fn remove(&mut self, k: ContentId) -> bool {
        match self.location.remove(&k) {
            Some(seg) => self.segments[seg].remove(k),
            None => false,
        }
    }

    fn dump(&self) -> Vec<ContentId> {
        self.segments.iter().flat_map(|s| s.iter()).collect()
    }

    fn clear(&mut self) {
        self.location.clear();
        for s in &mut self.segments {
            s.clear();
        }
    }
}

/// Largest remainder apportionment of `n` slots over `fractions`.
pub(crate) fn apportionment(n: usize, fractions: &[f64]) -> Vec<usize> {
    let mut ints: Vec<usize> = Vec::with_capacity(fractions.len());
    let mut remainders: Vec<(f64, usize)> = Vec::with_capacity(fractions.len());
    for (i, f) in fractions.iter().enumerate() {
        let share = n as f64 * f;
        ints.push(share.floor() as usize);
        remainders.push((share - share.floor(), i));
    }
    let to_alloc = n.saturating_sub(ints.iter().sum());
    // Largest remainder first, lower index wins ties.
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    for &(_, i) in remainders.iter().take(to_alloc) {
        ints[i] += 1;
    }
    ints
}
