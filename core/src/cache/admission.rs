use std::collections::HashMap;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use super::list::RankList;
use crate::error::ConfigError;
use crate::traits::ContentId;

/// Filter deciding whether a `put` reaches the eviction policy at all.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionConfig {
    #[default]
    Always,
    /// Admit with probability `p`.
    Probabilistic { p: f64 },
    /// Admit on the `k`-th offer. Offers are counted in a FIFO metacache of
    /// at most `memory` entries, unbounded when absent.
    AfterKHits {
        k: u32,
        #[serde(default)]
        memory: Option<usize>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Admission {
    Always,
    Probabilistic {
        p: f64,
        rng: StdRng,
    },
    AfterKHits {
        k: u32,
        memory: Option<usize>,
        hits: HashMap<ContentId, u32>,
        queue: RankList,
    },
}

impl Admission {
    pub fn new(config: &AdmissionConfig, seed: u64) -> Result<Self, ConfigError> {
        Ok(match *config {
            AdmissionConfig::Always => Admission::Always,
            AdmissionConfig::Probabilistic { p } => {
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::invalid("p", format!("{p} is not in [0, 1]")));
                }
                Admission::Probabilistic {
                    p,
                    rng: StdRng::seed_from_u64(seed),
                }
            }
            AdmissionConfig::AfterKHits { k, memory } => {
                if k == 0 {
                    return Err(ConfigError::invalid("k", "must be positive"));
                }
                if memory == Some(0) {
                    return Err(ConfigError::invalid("memory", "must be positive"));
                }
                if k == 1 {
                    Admission::Always
                } else {
                    Admission::AfterKHits {
                        k,
                        memory,
                        hits: HashMap::new(),
                        queue: RankList::new(),
                    }
                }
            }
        })
    }

    pub fn admit(&mut self, item: ContentId) -> bool {
        match self {
            Admission::Always => true,
            Admission::Probabilistic { p, rng } => rng.gen::<f64>() < *p,
            Admission::AfterKHits {
                k,
                memory,
                hits,
                queue,
            } => {
                if let Some(count) = hits.get_mut(&item) {
                    *count += 1;
                    if *count < *k {
                        return false;
                    }
                    hits.remove(&item);
                    queue.remove(item);
                    return true;
                }
                hits.insert(item, 1);
                queue.push_top(item);
                if memory.is_some_and(|m| queue.len() > m) {
                    if let Some(forgotten) = queue.pop_bottom() {
                        hits.remove(&forgotten);
                    }
                }
                false
            }
        }
    }

    pub fn clear(&mut self) {
        if let Admission::AfterKHits { hits, queue, .. } = self {
            hits.clear();
            queue.clear();
        }
    }
}
