//! Node-local caches and their eviction policies.
//!
//! A [`Cache`] is a bounded set of content ids. Which item leaves when a new
//! one arrives is decided by an [`EvictionPolicy`], a closed enumeration of
//! the supported algorithms that all implement the [`Policy`] contract.

use std::str::FromStr;

use rand::distributions::WeightedIndex;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::ConfigError;
use crate::traits::{ContentId, NodeId, SimTime};

mod admission;
mod belady;
mod climb;
mod fifo;
mod lfu;
mod list;
mod lru;
mod random;
mod slru;
mod system;
mod ttl;

pub use admission::AdmissionConfig;
pub use belady::BeladyMin;
pub use climb::Climb;
pub use fifo::Fifo;
pub use lfu::{ApproxLfu, Lfu, PerfectLfu};
pub use lru::Lru;
pub use random::RandomEviction;
pub use slru::SegmentedLru;
pub use system::{ArrayCache, NullCache, PathCache, ShardedCache, TreeCache};
pub use ttl::Ttl;

use admission::Admission;
use system::split_capacity;

/// Contract every eviction policy implements.
pub trait Policy {
    /// Number of resident items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership test that leaves the policy state untouched.
    fn has(&self, k: ContentId) -> bool;

    /// Lookup counted as an access. Returns `true` on a hit.
    fn get(&mut self, k: ContentId) -> bool;

    /// Inserts `k` if absent, evicting at most one resident item first.
    /// Returns the evicted item. MIN and perfect LFU may instead decline a
    /// newcomer that ranks below every resident.
    fn put(&mut self, k: ContentId) -> Option<ContentId>;

    fn remove(&mut self, k: ContentId) -> bool;

    /// Resident items, most relevant first as defined by the policy.
    fn dump(&self) -> Vec<ContentId>;

    fn clear(&mut self);
}

macro_rules! register_policies {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// One of the known eviction policies.
        #[derive(Debug, Clone)]
        pub enum EvictionPolicy {
            $($variant($ty)),*
        }

        impl Policy for EvictionPolicy {
            fn len(&self) -> usize {
                match self { $(Self::$variant(p) => p.len()),* }
            }
            fn has(&self, k: ContentId) -> bool {
                match self { $(Self::$variant(p) => p.has(k)),* }
            }
            fn get(&mut self, k: ContentId) -> bool {
                match self { $(Self::$variant(p) => p.get(k)),* }
            }
            fn put(&mut self, k: ContentId) -> Option<ContentId> {
                match self { $(Self::$variant(p) => p.put(k)),* }
            }
            fn remove(&mut self, k: ContentId) -> bool {
                match self { $(Self::$variant(p) => p.remove(k)),* }
            }
            fn dump(&self) -> Vec<ContentId> {
                match self { $(Self::$variant(p) => p.dump()),* }
            }
            fn clear(&mut self) {
                match self { $(Self::$variant(p) => p.clear()),* }
            }
        }
    };
}

register_policies!(
    Lru(Lru),
    Fifo(Fifo),
    Random(RandomEviction),
    Lfu(Lfu),
    PerfectLfu(PerfectLfu),
    ApproxLfu(ApproxLfu),
    Slru(SegmentedLru),
    Climb(Climb),
    Ttl(Ttl),
    Min(BeladyMin),
    Null(NullCache),
    Shard(ShardedCache),
    Array(ArrayCache),
    Path(PathCache),
    Tree(TreeCache),
);

fn default_max_count() -> u64 {
    15
}

fn default_segments() -> usize {
    2
}

fn default_members() -> usize {
    2
}

/// Eviction policy as it appears in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyConfig {
    Lru,
    Fifo,
    #[serde(rename = "RAND")]
    Random,
    #[serde(rename = "IN_CACHE_LFU", alias = "LFU")]
    Lfu,
    PerfectLfu,
    ApproxLfu {
        #[serde(default = "default_max_count")]
        max_count: u64,
        /// Lookups between two agings, ten times the capacity when absent.
        #[serde(default)]
        aging_period: Option<u64>,
    },
    Slru {
        #[serde(default = "default_segments")]
        segments: usize,
        #[serde(default)]
        alloc: Option<Vec<f64>>,
    },
    Climb,
    Ttl {
        ttl: SimTime,
        #[serde(default)]
        refresh_on_hit: bool,
        #[serde(default)]
        proactive_expiry: bool,
    },
    Min,
    Null,
    /// Content `k` lives in shard `k % shards`.
    Shard {
        #[serde(default = "default_members")]
        shards: usize,
        #[serde(default)]
        policy: Box<PolicyConfig>,
    },
    /// Each lookup goes to one member picked at random, optionally weighted.
    Array {
        #[serde(default = "default_members")]
        caches: usize,
        #[serde(default)]
        policy: Box<PolicyConfig>,
        #[serde(default)]
        weights: Option<Vec<f64>>,
    },
    Path {
        #[serde(default = "default_members")]
        levels: usize,
        #[serde(default)]
        policy: Box<PolicyConfig>,
    },
    Tree {
        #[serde(default = "default_members")]
        leaves: usize,
        #[serde(default)]
        policy: Box<PolicyConfig>,
    },
}

impl PolicyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyConfig::Lru => "LRU",
            PolicyConfig::Fifo => "FIFO",
            PolicyConfig::Random => "RAND",
            PolicyConfig::Lfu => "IN_CACHE_LFU",
            PolicyConfig::PerfectLfu => "PERFECT_LFU",
            PolicyConfig::ApproxLfu { .. } => "APPROX_LFU",
            PolicyConfig::Slru { .. } => "SLRU",
            PolicyConfig::Climb => "CLIMB",
            PolicyConfig::Ttl { .. } => "TTL",
            PolicyConfig::Min => "MIN",
            PolicyConfig::Null => "NULL",
            PolicyConfig::Shard { .. } => "SHARD",
            PolicyConfig::Array { .. } => "ARRAY",
            PolicyConfig::Path { .. } => "PATH",
            PolicyConfig::Tree { .. } => "TREE",
        }
    }

    pub fn needs_trace(&self) -> bool {
        match self {
            PolicyConfig::Min => true,
            PolicyConfig::Shard { policy, .. }
            | PolicyConfig::Array { policy, .. }
            | PolicyConfig::Path { policy, .. }
            | PolicyConfig::Tree { policy, .. } => policy.needs_trace(),
            _ => false,
        }
    }

    /// Whether this policy is built out of member caches.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            PolicyConfig::Shard { .. }
                | PolicyConfig::Array { .. }
                | PolicyConfig::Path { .. }
                | PolicyConfig::Tree { .. }
        )
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::Lru
    }
}

impl FromStr for PolicyConfig {
    type Err = ConfigError;

    /// Policy with default parameters from its bare name.
    fn from_str(name: &str) -> Result<Self, ConfigError> {
        Ok(match name.to_ascii_uppercase().as_str() {
            "LRU" => PolicyConfig::Lru,
            "FIFO" => PolicyConfig::Fifo,
            "RAND" | "RANDOM" => PolicyConfig::Random,
            "LFU" | "IN_CACHE_LFU" => PolicyConfig::Lfu,
            "PERFECT_LFU" => PolicyConfig::PerfectLfu,
            "APPROX_LFU" => PolicyConfig::ApproxLfu {
                max_count: default_max_count(),
                aging_period: None,
            },
            "SLRU" => PolicyConfig::Slru {
                segments: default_segments(),
                alloc: None,
            },
            "CLIMB" => PolicyConfig::Climb,
            "MIN" => PolicyConfig::Min,
            "NULL" => PolicyConfig::Null,
            "SHARD" => PolicyConfig::Shard {
                shards: default_members(),
                policy: Box::default(),
            },
            "ARRAY" => PolicyConfig::Array {
                caches: default_members(),
                policy: Box::default(),
                weights: None,
            },
            "PATH" => PolicyConfig::Path {
                levels: default_members(),
                policy: Box::default(),
            },
            "TREE" => PolicyConfig::Tree {
                leaves: default_members(),
                policy: Box::default(),
            },
            "TTL" => return Err(ConfigError::invalid("ttl", "the TTL policy needs an explicit ttl")),
            _ => return Err(ConfigError::UnknownPolicy(name.to_string())),
        })
    }
}

/// Everything needed to build the cache of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub capacity: usize,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl CacheSpec {
    pub fn new(capacity: usize, policy: PolicyConfig) -> Self {
        Self {
            capacity,
            policy,
            admission: AdmissionConfig::default(),
        }
    }

    pub fn lru(capacity: usize) -> Self {
        Self::new(capacity, PolicyConfig::Lru)
    }

    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_capacity(&self, capacity: usize) -> Self {
        Self {
            capacity,
            ..self.clone()
        }
    }

    pub fn build(&self, node: NodeId, ctx: &RunContext) -> Result<Cache, ConfigError> {
        Cache::new(node, self.capacity, &self.policy, &self.admission, ctx)
    }
}

/// Bounded content store attached to one node.
#[derive(Debug, Clone)]
pub struct Cache {
    node: NodeId,
    capacity: usize,
    policy: EvictionPolicy,
    admission: Admission,
    expiry_events: bool,
}

impl Cache {
    pub fn new(
        node: NodeId,
        capacity: usize,
        policy: &PolicyConfig,
        admission: &AdmissionConfig,
        ctx: &RunContext,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity { node });
        }
        let expiry_events = matches!(
            policy,
            PolicyConfig::Ttl {
                proactive_expiry: true,
                ..
            }
        );
        let policy = build_policy(node, capacity, policy, ctx, 0)?;
        Ok(Self {
            node,
            capacity,
            policy,
            admission: Admission::new(admission, ctx.node_seed(node, 2))?,
            expiry_events,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.policy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policy.is_empty()
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn has(&self, k: ContentId) -> bool {
        self.policy.has(k)
    }

    pub fn get(&mut self, k: ContentId) -> bool {
        self.policy.get(k)
    }

    /// Offers `k` to the cache. Returns the item evicted to make room, if
    /// any. Whether `k` ended up resident depends on the admission filter and
    /// the policy; check with [`Cache::has`].
    pub fn put(&mut self, k: ContentId) -> Option<ContentId> {
        if !self.policy.has(k) && !self.admission.admit(k) {
            return None;
        }
        let evicted = self.policy.put(k);
        debug_assert!(self.policy.len() <= self.capacity);
        evicted
    }

    pub fn remove(&mut self, k: ContentId) -> bool {
        self.policy.remove(k)
    }

    pub fn dump(&self) -> Vec<ContentId> {
        self.policy.dump()
    }

    pub fn clear(&mut self) {
        self.policy.clear();
        self.admission.clear();
    }

    /// Whether expiry events should be scheduled for items put here.
    pub fn wants_expiry_events(&self) -> bool {
        self.expiry_events
    }

    pub fn expiry_of(&self, k: ContentId) -> Option<SimTime> {
        match &self.policy {
            EvictionPolicy::Ttl(t) => t.expiry_of(k),
            _ => None,
        }
    }

    /// Drops items expired at `now`. A no-op for policies without expiry.
    pub fn purge_expired(&mut self, now: SimTime) -> Vec<ContentId> {
        match &mut self.policy {
            EvictionPolicy::Ttl(t) => t.purge(now),
            _ => Vec::new(),
        }
    }
}

/// Seed salt of RNG `stream` in member `member` of a node's cache. The
/// top-level policy is member 0.
fn member_salt(member: u64, stream: u64) -> u64 {
    (member << 4) | stream
}

fn build_members(
    node: NodeId,
    capacity: usize,
    members: usize,
    name: &'static str,
    policy: &PolicyConfig,
    ctx: &RunContext,
) -> Result<Vec<EvictionPolicy>, ConfigError> {
    if members == 0 || members > capacity {
        return Err(ConfigError::invalid(
            name,
            format!("must be between 1 and the capacity ({capacity})"),
        ));
    }
    if policy.is_composite() {
        return Err(ConfigError::invalid("policy", "member caches cannot be composite"));
    }
    if let PolicyConfig::Ttl {
        proactive_expiry: true,
        ..
    } = policy
    {
        return Err(ConfigError::invalid(
            "policy",
            "member caches cannot use proactive expiry",
        ));
    }
    split_capacity(capacity, members)
        .into_iter()
        .enumerate()
        .map(|(i, size)| build_policy(node, size, policy, ctx, i as u64 + 1))
        .collect()
}

fn build_policy(
    node: NodeId,
    capacity: usize,
    policy: &PolicyConfig,
    ctx: &RunContext,
    member: u64,
) -> Result<EvictionPolicy, ConfigError> {
    Ok(match policy {
        PolicyConfig::Lru => EvictionPolicy::Lru(Lru::new(capacity)),
        PolicyConfig::Fifo => EvictionPolicy::Fifo(Fifo::new(capacity)),
        PolicyConfig::Random => EvictionPolicy::Random(RandomEviction::new(
            capacity,
            ctx.node_seed(node, member_salt(member, 1)),
        )),
        PolicyConfig::Lfu => EvictionPolicy::Lfu(Lfu::new(capacity)),
        PolicyConfig::PerfectLfu => EvictionPolicy::PerfectLfu(PerfectLfu::new(capacity)),
        PolicyConfig::ApproxLfu {
            max_count,
            aging_period,
        } => {
            if *max_count == 0 {
                return Err(ConfigError::invalid("max_count", "must be positive"));
            }
            let period = aging_period.unwrap_or(10 * capacity as u64);
            if period == 0 {
                return Err(ConfigError::invalid("aging_period", "must be positive"));
            }
            EvictionPolicy::ApproxLfu(ApproxLfu::new(capacity, *max_count, period))
        }
        PolicyConfig::Slru { segments, alloc } => EvictionPolicy::Slru(SegmentedLru::new(
            capacity,
            *segments,
            alloc.as_deref(),
        )?),
        PolicyConfig::Climb => EvictionPolicy::Climb(Climb::new(capacity)),
        PolicyConfig::Ttl {
            ttl,
            refresh_on_hit,
            ..
        } => {
            if *ttl == 0 {
                return Err(ConfigError::invalid("ttl", "must be positive"));
            }
            EvictionPolicy::Ttl(Ttl::new(
                capacity,
                *ttl,
                *refresh_on_hit,
                ctx.clock().clone(),
            ))
        }
        PolicyConfig::Min => {
            let index = ctx.next_references().ok_or(ConfigError::MissingTrace)?;
            EvictionPolicy::Min(BeladyMin::new(
                capacity,
                index.clone(),
                ctx.cursor().clone(),
            ))
        }
        PolicyConfig::Null => EvictionPolicy::Null(NullCache),
        PolicyConfig::Shard { shards, policy } => EvictionPolicy::Shard(ShardedCache::new(
            build_members(node, capacity, *shards, "shards", policy, ctx)?,
        )),
        PolicyConfig::Array {
            caches,
            policy,
            weights,
        } => {
            let members = build_members(node, capacity, *caches, "caches", policy, ctx)?;
            let weights = match weights {
                None => None,
                Some(w) => {
                    if w.len() != *caches {
                        return Err(ConfigError::invalid(
                            "weights",
                            "need exactly one weight per cache",
                        ));
                    }
                    if (w.iter().sum::<f64>() - 1.0).abs() > 1e-4 {
                        return Err(ConfigError::invalid("weights", "must sum to 1"));
                    }
                    let index = WeightedIndex::new(w.iter().copied())
                        .map_err(|e| ConfigError::invalid("weights", e.to_string()))?;
                    Some(index)
                }
            };
            EvictionPolicy::Array(ArrayCache::new(
                members,
                weights,
                ctx.node_seed(node, member_salt(member, 3)),
            ))
        }
        PolicyConfig::Path { levels, policy } => EvictionPolicy::Path(PathCache::new(
            build_members(node, capacity, *levels, "levels", policy, ctx)?,
        )),
        PolicyConfig::Tree { leaves, policy } => {
            // The root takes the last share of the capacity.
            let mut members = build_members(node, capacity, *leaves + 1, "leaves", policy, ctx)?;
            let root = members.pop();
            let (Some(root), false) = (root, members.is_empty()) else {
                return Err(ConfigError::invalid("leaves", "must be positive"));
            };
            EvictionPolicy::Tree(TreeCache::new(
                members,
                root,
                ctx.node_seed(node, member_salt(member, 4)),
            ))
        }
    })
}
