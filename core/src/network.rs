use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use log::info;
use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CacheSpec};
use crate::context::RunContext;
use crate::error::ConfigError;
use crate::traits::{ClusterId, ContentId, NodeId, SimTime};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Source,
    Receiver,
    Router,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Source => "source",
            NodeRole::Receiver => "receiver",
            NodeRole::Router => "router",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    #[default]
    Internal,
    External,
}

/// A physical link between two nodes.
/// It carries the propagation delay of both directions.
/// Stored by canonical key (min_id, max_id).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Link {
    pub min_to_max: SimTime,
    pub max_to_min: SimTime,
    pub kind: LinkKind,
    #[serde(skip)]
    down: bool,
}

impl Link {
    pub fn symmetric(delay: SimTime, kind: LinkKind) -> Self {
        Self {
            min_to_max: delay,
            max_to_min: delay,
            kind,
            down: false,
        }
    }

    pub fn delay(&self, from: NodeId, to: NodeId) -> SimTime {
        if from < to {
            self.min_to_max
        } else {
            self.max_to_min
        }
    }

    fn delay_mut(&mut self, from: NodeId, to: NodeId) -> &mut SimTime {
        if from < to {
            &mut self.min_to_max
        } else {
            &mut self.max_to_min
        }
    }

    pub fn is_up(&self) -> bool {
        !self.down
    }
}

pub fn canonical_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Structural change applied while a run is in progress.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyChange {
    RemoveNode { node: NodeId },
    RestoreNode { node: NodeId },
    RemoveLink { a: NodeId, b: NodeId },
    RestoreLink { a: NodeId, b: NodeId },
}

#[derive(Debug)]
struct Node {
    role: NodeRole,
    cache: Option<Cache>,
    local: Option<Cache>,
    up: bool,
}

/// Shortest-path tree rooted at one node.
#[derive(Debug, Default)]
struct RouteTree {
    dist: HashMap<NodeId, (SimTime, u32)>,
    pred: HashMap<NodeId, NodeId>,
}

/// Collects nodes, links and cache sizes, then validates them into a
/// [`Network`].
#[derive(Debug, Default)]
pub struct NetworkBuilder {
    roles: BTreeMap<NodeId, NodeRole>,
    caches: BTreeMap<NodeId, CacheSpec>,
    contents: BTreeMap<NodeId, Vec<ContentId>>,
    links: BTreeMap<(NodeId, NodeId), Link>,
    clusters: BTreeMap<NodeId, ClusterId>,
    local_ratio: Option<f64>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, id: NodeId, role: NodeRole) -> Result<&mut Self, ConfigError> {
        if self.roles.insert(id, role).is_some() {
            return Err(ConfigError::DuplicateNode(id));
        }
        Ok(self)
    }

    /// Turns a router into a cache-router.
    pub fn cache(&mut self, id: NodeId, spec: CacheSpec) -> Result<&mut Self, ConfigError> {
        self.expect_role(id, NodeRole::Router)?;
        if spec.capacity == 0 {
            return Err(ConfigError::ZeroCapacity { node: id });
        }
        self.caches.insert(id, spec);
        Ok(self)
    }

    /// Pins the given contents to a source. Contents not pinned anywhere are
    /// spread over all sources by id.
    pub fn contents(
        &mut self,
        id: NodeId,
        contents: impl IntoIterator<Item = ContentId>,
    ) -> Result<&mut Self, ConfigError> {
        self.expect_role(id, NodeRole::Source)?;
        self.contents.entry(id).or_default().extend(contents);
        Ok(self)
    }

    /// Undirected link. `reverse` overrides the delay from the higher id to
    /// the lower one.
    pub fn link(
        &mut self,
        a: NodeId,
        b: NodeId,
        delay: SimTime,
        reverse: Option<SimTime>,
        kind: LinkKind,
    ) -> Result<&mut Self, ConfigError> {
        if a == b {
            return Err(ConfigError::SelfLoop(a));
        }
        for missing in [a, b] {
            if !self.roles.contains_key(&missing) {
                return Err(ConfigError::UnknownEdgeEndpoint {
                    from: a,
                    to: b,
                    missing,
                });
            }
        }
        let mut link = Link::symmetric(delay, kind);
        if let Some(back) = reverse {
            *link.delay_mut(b, a) = back;
        }
        self.links.insert(canonical_key(a, b), link);
        Ok(self)
    }

    /// Assigns a node to a cluster, the unit clustered hash-routing
    /// coordinates caches within.
    pub fn cluster(&mut self, id: NodeId, cluster: ClusterId) -> Result<&mut Self, ConfigError> {
        if !self.roles.contains_key(&id) {
            return Err(ConfigError::UnknownNode(id));
        }
        self.clusters.insert(id, cluster);
        Ok(self)
    }

    /// Splits every cache: a `ratio` share of its slots becomes a local cache
    /// that only serves the node's own receivers, the rest stays coordinated.
    pub fn reserve_local_caches(&mut self, ratio: f64) -> Result<&mut Self, ConfigError> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::invalid(
                "edge_cache_ratio",
                format!("{ratio} is not in [0, 1]"),
            ));
        }
        self.local_ratio = Some(ratio);
        Ok(self)
    }

    fn expect_role(&self, id: NodeId, expected: NodeRole) -> Result<(), ConfigError> {
        match self.roles.get(&id) {
            None => Err(ConfigError::UnknownNode(id)),
            Some(&role) if role != expected => Err(ConfigError::WrongRole {
                node: id,
                role: role.as_str(),
                expected: expected.as_str(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn build(self, ctx: &RunContext) -> Result<Network, ConfigError> {
        let sources: Vec<NodeId> = self
            .roles
            .iter()
            .filter(|(_, &r)| r == NodeRole::Source)
            .map(|(&id, _)| id)
            .collect();
        if sources.is_empty() {
            return Err(ConfigError::NoSource);
        }

        let mut pinned = HashMap::new();
        for (&source, contents) in &self.contents {
            for &content in contents {
                if let Some(other) = pinned.insert(content, source) {
                    if other != source {
                        return Err(ConfigError::ContentConflict { content });
                    }
                }
            }
        }

        let mut nodes = BTreeMap::new();
        for (&id, &role) in &self.roles {
            let (cache, local) = match self.caches.get(&id) {
                None => (None, None),
                Some(spec) => {
                    let (shared, private) = match self.local_ratio {
                        None => (spec.capacity, 0),
                        Some(ratio) => {
                            let private = (spec.capacity as f64 * ratio).round() as usize;
                            (spec.capacity - private, private)
                        }
                    };
                    let cache = (shared > 0).then(|| spec.with_capacity(shared).build(id, ctx));
                    let local = (private > 0).then(|| spec.with_capacity(private).build(id, ctx));
                    (cache.transpose()?, local.transpose()?)
                }
            };
            nodes.insert(
                id,
                Node {
                    role,
                    cache,
                    local,
                    up: true,
                },
            );
        }

        let mut adjacency: BTreeMap<NodeId, BTreeSet<NodeId>> =
            self.roles.keys().map(|&id| (id, BTreeSet::new())).collect();
        for &(a, b) in self.links.keys() {
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }

        let mut network = Network {
            nodes,
            links: self.links,
            adjacency,
            sources,
            pinned,
            clusters: self.clusters,
            routes: HashMap::new(),
            version: 0,
        };
        network.rebuild_routes();
        Ok(network)
    }
}

/// Read-mostly view of the topology and the caches deployed on it.
///
/// Shortest paths are precomputed for every live node pair and recomputed
/// after each [`TopologyChange`]. Paths are symmetric: the path from `t` to
/// `s` is always the reverse of the path from `s` to `t`.
#[derive(Debug)]
pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<(NodeId, NodeId), Link>,
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    sources: Vec<NodeId>,
    pinned: HashMap<ContentId, NodeId>,
    clusters: BTreeMap<NodeId, ClusterId>,
    routes: HashMap<NodeId, RouteTree>,
    version: u64,
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    /// Incremented on every applied topology change.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn role(&self, node: NodeId) -> Option<NodeRole> {
        self.nodes.get(&node).map(|n| n.role)
    }

    pub fn is_up(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.up)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn receivers(&self) -> Vec<NodeId> {
        self.with_role(NodeRole::Receiver)
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub fn cluster(&self, node: NodeId) -> Option<ClusterId> {
        self.clusters.get(&node).copied()
    }

    fn with_role(&self, role: NodeRole) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.role == role)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Neighbors reachable over live links, in id order.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(&node)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&v| self.link_usable(node, v))
            .collect()
    }

    /// Every link, live or not, by canonical key.
    pub fn links(&self) -> impl Iterator<Item = ((NodeId, NodeId), &Link)> + '_ {
        self.links.iter().map(|(&k, l)| (k, l))
    }

    pub fn link_delay(&self, from: NodeId, to: NodeId) -> Option<SimTime> {
        self.links
            .get(&canonical_key(from, to))
            .map(|l| l.delay(from, to))
    }

    pub fn link_kind(&self, from: NodeId, to: NodeId) -> Option<LinkKind> {
        self.links.get(&canonical_key(from, to)).map(|l| l.kind)
    }

    fn link_usable(&self, a: NodeId, b: NodeId) -> bool {
        self.is_up(a)
            && self.is_up(b)
            && self
                .links
                .get(&canonical_key(a, b))
                .is_some_and(Link::is_up)
    }

    /// Source responsible for `content`: a source it is pinned to, otherwise
    /// `sources[content % n_sources]`.
    pub fn content_source(&self, content: ContentId) -> Option<NodeId> {
        if let Some(&source) = self.pinned.get(&content) {
            return Some(source);
        }
        let n = self.sources.len() as u64;
        if n == 0 {
            return None;
        }
        self.sources.get((content % n) as usize).copied()
    }

    /// Cache-routers currently up, in id order.
    pub fn cache_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.up && n.cache.is_some())
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn has_cache(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.cache.is_some())
    }

    pub fn has_local_cache(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.local.is_some())
    }

    pub fn cache(&self, node: NodeId) -> Option<&Cache> {
        self.nodes.get(&node).and_then(|n| n.cache.as_ref())
    }

    pub fn local_cache(&self, node: NodeId) -> Option<&Cache> {
        self.nodes.get(&node).and_then(|n| n.local.as_ref())
    }

    pub(crate) fn cache_mut(&mut self, node: NodeId) -> Option<&mut Cache> {
        self.nodes
            .get_mut(&node)
            .filter(|n| n.up)
            .and_then(|n| n.cache.as_mut())
    }

    pub(crate) fn local_cache_mut(&mut self, node: NodeId) -> Option<&mut Cache> {
        self.nodes
            .get_mut(&node)
            .filter(|n| n.up)
            .and_then(|n| n.local.as_mut())
    }

    /// Membership test that does not count as an access.
    pub fn cache_lookup(&self, node: NodeId, content: ContentId) -> bool {
        self.is_up(node) && self.cache(node).is_some_and(|c| c.has(content))
    }

    pub fn cache_dump(&self, node: NodeId) -> Option<Vec<ContentId>> {
        self.cache(node).map(Cache::dump)
    }

    /// Live nodes able to serve `content`: caches holding it and its source.
    pub fn content_locations(&self, content: ContentId) -> Vec<NodeId> {
        let mut locations: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|&v| self.cache_lookup(v, content))
            .collect();
        if let Some(source) = self.content_source(content).filter(|&s| self.is_up(s)) {
            locations.push(source);
        }
        locations
    }

    /// Node sequence from `s` to `t` over live nodes and links, `None` when
    /// `t` cannot be reached.
    pub fn shortest_path(&self, s: NodeId, t: NodeId) -> Option<Vec<NodeId>> {
        if !self.is_up(s) || !self.is_up(t) {
            return None;
        }
        if s == t {
            return Some(vec![s]);
        }
        let (root, leaf) = canonical_key(s, t);
        let tree = self.routes.get(&root)?;
        tree.dist.get(&leaf)?;
        let mut path = vec![leaf];
        let mut at = leaf;
        while at != root {
            at = *tree.pred.get(&at)?;
            path.push(at);
        }
        if s == root {
            path.reverse();
        }
        Some(path)
    }

    /// Delay of the shortest path from `s` to `t`.
    pub fn distance(&self, s: NodeId, t: NodeId) -> Option<SimTime> {
        let path = self.shortest_path(s, t)?;
        path.windows(2)
            .map(|w| self.link_delay(w[0], w[1]))
            .sum::<Option<SimTime>>()
    }

    /// Applies a change, returning `false` when it was a no-op.
    pub(crate) fn apply(&mut self, change: TopologyChange) -> bool {
        let changed = match change {
            TopologyChange::RemoveNode { node } => match self.nodes.get_mut(&node) {
                Some(n) if n.up => {
                    n.up = false;
                    // A failed node loses whatever it stored.
                    if let Some(c) = n.cache.as_mut() {
                        c.clear();
                    }
                    if let Some(c) = n.local.as_mut() {
                        c.clear();
                    }
                    true
                }
                _ => false,
            },
            TopologyChange::RestoreNode { node } => match self.nodes.get_mut(&node) {
                Some(n) if !n.up => {
                    n.up = true;
                    true
                }
                _ => false,
            },
            TopologyChange::RemoveLink { a, b } => self.set_link_down(a, b, true),
            TopologyChange::RestoreLink { a, b } => self.set_link_down(a, b, false),
        };
        if changed {
            self.version += 1;
            self.rebuild_routes();
            info!("topology change {:?} applied, version {}", change, self.version);
        }
        changed
    }

    fn set_link_down(&mut self, a: NodeId, b: NodeId, down: bool) -> bool {
        match self.links.get_mut(&canonical_key(a, b)) {
            Some(link) if link.down != down => {
                link.down = down;
                true
            }
            _ => false,
        }
    }

    /// Drops items expired at `now` from both caches of `node`.
    pub(crate) fn purge_expired(&mut self, node: NodeId, now: SimTime) -> Vec<ContentId> {
        let mut purged = Vec::new();
        if let Some(n) = self.nodes.get_mut(&node) {
            for cache in [n.cache.as_mut(), n.local.as_mut()].into_iter().flatten() {
                purged.extend(cache.purge_expired(now));
            }
        }
        purged
    }

    fn rebuild_routes(&mut self) {
        let roots: Vec<NodeId> = self.nodes.keys().copied().filter(|&v| self.is_up(v)).collect();
        self.routes = roots.into_iter().map(|r| (r, self.dijkstra(r))).collect();
    }

    /// Dijkstra ordered by (delay, hops, node id) so equal-cost paths resolve
    /// the same way on every run.
    fn dijkstra(&self, root: NodeId) -> RouteTree {
        let mut tree = RouteTree::default();
        let mut heap = BinaryHeap::new();
        tree.dist.insert(root, (0, 0));
        heap.push(Reverse((0, 0u32, root)));
        while let Some(Reverse((d, h, u))) = heap.pop() {
            if tree.dist.get(&u).is_some_and(|&best| best < (d, h)) {
                continue;
            }
            for v in self.neighbors(u) {
                let Some(w) = self.link_delay(u, v) else {
                    continue;
                };
                let candidate = (d + w, h + 1);
                let better = match tree.dist.get(&v) {
                    None => true,
                    Some(&best) => candidate < best,
                };
                if better {
                    tree.dist.insert(v, candidate);
                    tree.pred.insert(v, u);
                    heap.push(Reverse((candidate.0, candidate.1, v)));
                }
            }
        }
        tree
    }
}
