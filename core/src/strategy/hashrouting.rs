//! Hash-routing: each content has one authoritative cache, found through a
//! consistent-hash ring over the live cache nodes.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use super::{common_prefix, deliver_content, fail, serve_from_source};
use super::{CachingStrategy, RequestContext, Session};
use crate::controller::Controller;
use crate::error::{ConfigError, SimError};
use crate::network::Network;
use crate::traits::{ClusterId, ContentId, NodeId, SimTime};

/// Virtual points per cache node when a scenario does not say.
pub const DEFAULT_REPLICAS: u32 = 64;

// Fixed so that the content to cache mapping is the same on every run.
const RING_SEEDS: [u64; 4] = [
    0x243F_6A88_85A3_08D3,
    0x1319_8A2E_0370_7344,
    0xA409_3822_299F_31D0,
    0x082E_FA98_EC4E_6C89,
];

/// How content travels back when the authoritative cache missed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashRouting {
    /// Back through the authoritative cache, which keeps a copy.
    #[default]
    Symm,
    /// Straight to the receiver; the cache keeps a copy only if it lies on
    /// that path.
    Asymm,
    /// Straight to the receiver, plus a copy forked off towards the cache.
    Multicast,
}

/// Consistent-hash ring with `replicas` virtual points per node.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: Vec<(u64, NodeId)>,
    hasher: RandomState,
}

impl HashRing {
    pub fn new(nodes: &[NodeId], replicas: u32) -> Self {
        let hasher = RandomState::with_seeds(RING_SEEDS[0], RING_SEEDS[1], RING_SEEDS[2], RING_SEEDS[3]);
        let mut points: Vec<(u64, NodeId)> = nodes
            .iter()
            .flat_map(|&v| (0..replicas).map(move |r| (v, r)))
            .map(|(v, r)| (hasher.hash_one((v, r)), v))
            .collect();
        points.sort_unstable();
        Self { points, hasher }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Owner of the first point clockwise from the content's hash.
    pub fn lookup(&self, content: ContentId) -> Option<NodeId> {
        let h = self.hasher.hash_one(content);
        let idx = self.points.partition_point(|&(p, _)| p < h);
        self.points
            .get(idx)
            .or_else(|| self.points.first())
            .map(|&(_, v)| v)
    }
}

/// Ring over the live cache nodes.
fn live_ring(network: &Network, replicas: u32) -> Result<HashRing, ConfigError> {
    if replicas == 0 {
        return Err(ConfigError::invalid("replicas", "must be positive"));
    }
    Ok(HashRing::new(&network.cache_nodes(), replicas))
}

/// Longest shortest path between two live nodes, in hops.
fn hop_diameter(network: &Network) -> usize {
    let nodes: Vec<NodeId> = network.nodes().filter(|&v| network.is_up(v)).collect();
    let mut diameter = 0;
    for (i, &s) in nodes.iter().enumerate() {
        for &t in &nodes[i + 1..] {
            if let Some(path) = network.shortest_path(s, t) {
                diameter = diameter.max(path.len() - 1);
            }
        }
    }
    diameter
}

/// How a content fetched from the source after a miss reaches the receiver
/// when the authoritative cache is off the direct path.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Delivery {
    Routing(HashRouting),
    /// Asymmetric, plus a multicast copy to the cache when its branch is
    /// shorter than `max_stretch` times the network diameter.
    HybridAm { max_stretch: f64, max_branch: f64 },
    /// Whichever of symmetric and multicast crosses fewer links. Ties go to
    /// symmetric.
    HybridSm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Return {
    Symmetric,
    Asymmetric,
    Multicast,
}

/// The symmetric, asymmetric and multicast hash-routing schemes and their
/// hybrids.
#[derive(Debug)]
pub struct Hashrouting {
    delivery: Delivery,
    replicas: u32,
    ring: HashRing,
}

impl Hashrouting {
    pub fn new(network: &Network, routing: HashRouting, replicas: u32) -> Result<Self, ConfigError> {
        Self::with_caches(network, Delivery::Routing(routing), replicas)
    }

    /// HR_HYBRID_AM. `max_stretch` is a share of the network diameter.
    pub fn hybrid_asymm_multicast(
        network: &Network,
        max_stretch: f64,
        replicas: u32,
    ) -> Result<Self, ConfigError> {
        if !max_stretch.is_finite() || max_stretch < 0.0 {
            return Err(ConfigError::invalid("max_stretch", "must be a non-negative number"));
        }
        let delivery = Delivery::HybridAm {
            max_stretch,
            max_branch: hop_diameter(network) as f64 * max_stretch,
        };
        Self::with_caches(network, delivery, replicas)
    }

    /// HR_HYBRID_SM.
    pub fn hybrid_symm_multicast(network: &Network, replicas: u32) -> Result<Self, ConfigError> {
        Self::with_caches(network, Delivery::HybridSm, replicas)
    }

    fn with_caches(network: &Network, delivery: Delivery, replicas: u32) -> Result<Self, ConfigError> {
        if network.cache_nodes().is_empty() {
            return Err(ConfigError::NoCacheNodes);
        }
        Self::with_ring(network, delivery, replicas)
    }

    fn with_ring(network: &Network, delivery: Delivery, replicas: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            delivery,
            replicas,
            ring: live_ring(network, replicas)?,
        })
    }

    pub fn authoritative_cache(&self, content: ContentId) -> Option<NodeId> {
        self.ring.lookup(content)
    }

    /// Longest multicast branch HR_HYBRID_AM still sends, in hops.
    pub fn max_branch(&self) -> Option<f64> {
        match self.delivery {
            Delivery::HybridAm { max_branch, .. } => Some(max_branch),
            _ => None,
        }
    }

    fn choose(&self, via_cache: &[NodeId], direct: &[NodeId], branch: &[NodeId]) -> Return {
        match self.delivery {
            Delivery::Routing(HashRouting::Symm) => Return::Symmetric,
            Delivery::Routing(HashRouting::Asymm) => Return::Asymmetric,
            Delivery::Routing(HashRouting::Multicast) => Return::Multicast,
            Delivery::HybridAm { max_branch, .. } => {
                if ((branch.len() - 1) as f64) < max_branch {
                    Return::Multicast
                } else {
                    Return::Asymmetric
                }
            }
            Delivery::HybridSm => {
                let symmetric = via_cache.len() - 1;
                let multicast = direct.len() - 1 + branch.len() - 1;
                if symmetric <= multicast {
                    Return::Symmetric
                } else {
                    Return::Multicast
                }
            }
        }
    }

    /// Routes a request that entered the network at `entry`, `delay` after
    /// it was issued. The content path ends at the receiver.
    fn route(
        &self,
        session: Session,
        entry: NodeId,
        delay: SimTime,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let source = ctl
            .view()
            .content_source(session.content)
            .ok_or(SimError::UnknownContent(session.content))?;
        let Some(cache) = self.ring.lookup(session.content) else {
            return serve_from_source(session, entry, delay, ctl);
        };
        let Some(to_cache) = ctl.view().shortest_path(entry, cache) else {
            ctl.report_degraded(&session, cache);
            return serve_from_source(session, entry, delay, ctl);
        };
        let mut delay = delay + ctl.forward_request_path(&session, &to_cache, true);
        let Some(tail) = ctl.view().shortest_path(entry, session.receiver) else {
            return Ok(fail(session, session.receiver, ctl));
        };

        if ctl.get_content(&session, cache) {
            let mut path: Vec<NodeId> = to_cache.into_iter().rev().collect();
            path.extend(tail.into_iter().skip(1));
            return Ok(Some(RequestContext::new(
                session,
                cache,
                path,
                delay,
                ctl.view(),
            )));
        }

        let Some(to_source) = ctl.view().shortest_path(cache, source) else {
            return Ok(fail(session, source, ctl));
        };
        delay += ctl.forward_request_path(&session, &to_source, true);
        if !ctl.get_content(&session, source) {
            return Err(SimError::SourceMiss {
                content: session.content,
                source,
            });
        }

        let source_to_cache: Vec<NodeId> = to_source.into_iter().rev().collect();
        let via_cache: Vec<NodeId> = source_to_cache
            .iter()
            .copied()
            .chain(to_cache.iter().rev().skip(1).copied())
            .collect();
        let direct = ctl
            .view()
            .shortest_path(source, entry)
            .filter(|p| !p.contains(&cache));
        let (mut main, branches, store) = match direct {
            None => (via_cache, Vec::new(), vec![cache]),
            Some(direct) => {
                let fork = common_prefix(&source_to_cache, &direct).max(1) - 1;
                let branch = source_to_cache[fork..].to_vec();
                match self.choose(&via_cache, &direct, &branch) {
                    Return::Symmetric => (via_cache, Vec::new(), vec![cache]),
                    Return::Asymmetric => (direct, Vec::new(), Vec::new()),
                    Return::Multicast => (direct, vec![branch], vec![cache]),
                }
            }
        };
        main.extend(tail.into_iter().skip(1));

        let mut rc = RequestContext::new(session, source, main, delay, ctl.view());
        rc.branches = branches;
        rc.store = store;
        Ok(Some(rc))
    }
}

impl CachingStrategy for Hashrouting {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        self.route(session, session.receiver, 0, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        deliver_content(rc, ctl)
    }

    fn on_topology_change(&mut self, network: &Network) {
        self.ring = HashRing::new(&network.cache_nodes(), self.replicas);
        if let Delivery::HybridAm {
            max_stretch,
            max_branch,
        } = &mut self.delivery
        {
            *max_branch = hop_diameter(network) as f64 * *max_stretch;
        }
    }
}

/// Hash-routing with part of every cache set aside for uncoordinated edge
/// caching. Each receiver hangs off a proxy: the proxy looks in its local
/// partition first and keeps a local copy of whatever it forwards.
#[derive(Debug)]
pub struct HashroutingEdge {
    inner: Hashrouting,
    proxies: BTreeMap<NodeId, NodeId>,
}

impl HashroutingEdge {
    pub fn new(network: &Network, routing: HashRouting, replicas: u32) -> Result<Self, ConfigError> {
        let mut proxies = BTreeMap::new();
        for receiver in network.receivers() {
            let proxy = network
                .neighbors(receiver)
                .into_iter()
                .find(|&v| network.has_cache(v) || network.has_local_cache(v))
                .ok_or(ConfigError::NoEdgeCache(receiver))?;
            proxies.insert(receiver, proxy);
        }
        Ok(Self {
            inner: Hashrouting::with_ring(network, Delivery::Routing(routing), replicas)?,
            proxies,
        })
    }

    pub fn proxy(&self, receiver: NodeId) -> Option<NodeId> {
        self.proxies.get(&receiver).copied()
    }

    pub fn authoritative_cache(&self, content: ContentId) -> Option<NodeId> {
        self.inner.authoritative_cache(content)
    }
}

impl CachingStrategy for HashroutingEdge {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let receiver = session.receiver;
        let Some(proxy) = self.proxy(receiver) else {
            return Err(SimError::Routing {
                request: session.id,
                reason: format!("receiver {receiver} has no edge proxy"),
            });
        };
        if !ctl.view().neighbors(receiver).contains(&proxy) {
            ctl.report_degraded(&session, proxy);
            return serve_from_source(session, receiver, 0, ctl);
        }
        let delay = ctl.forward_request_hop(&session, receiver, proxy, true);
        let coordinated = self.authoritative_cache(session.content) == Some(proxy);
        if !coordinated && ctl.get_content_local(&session, proxy) {
            return Ok(Some(RequestContext::new(
                session,
                proxy,
                vec![proxy, receiver],
                delay,
                ctl.view(),
            )));
        }
        let mut routed = self.inner.route(session, proxy, delay, ctl)?;
        if let Some(rc) = routed.as_mut() {
            if !coordinated && ctl.view().has_local_cache(proxy) {
                rc.store_local.push(proxy);
            }
        }
        Ok(routed)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        deliver_content(rc, ctl)
    }

    fn on_topology_change(&mut self, network: &Network) {
        self.inner.on_topology_change(network);
    }
}

/// Forwards a request along `path`, looking into the local partition of
/// every node strictly between its ends. Returns the request delay and the
/// index of the first node that had the content.
fn forward_checking_local(
    session: &Session,
    path: &[NodeId],
    ctl: &mut Controller<'_>,
) -> (SimTime, Option<usize>) {
    let mut delay = 0;
    for i in 1..path.len() {
        delay += ctl.forward_request_hop(session, path[i - 1], path[i], true);
        if i + 1 < path.len() && ctl.get_content_local(session, path[i]) {
            return (delay, Some(i));
        }
    }
    (delay, None)
}

fn reversed(path: &[NodeId]) -> Vec<NodeId> {
    path.iter().rev().copied().collect()
}

/// Hash-routing where every node's local partition is looked up by all the
/// traffic it forwards, not only by its own receivers. Contents are left in
/// the local partition of every node they pass, and in the authoritative
/// cache when they pass it.
#[derive(Debug)]
pub struct HashroutingOnPath {
    routing: HashRouting,
    replicas: u32,
    ring: HashRing,
}

impl HashroutingOnPath {
    pub fn new(network: &Network, routing: HashRouting, replicas: u32) -> Result<Self, ConfigError> {
        if network.cache_nodes().is_empty() {
            return Err(ConfigError::NoCacheNodes);
        }
        Ok(Self {
            routing,
            replicas,
            ring: live_ring(network, replicas)?,
        })
    }

    pub fn authoritative_cache(&self, content: ContentId) -> Option<NodeId> {
        self.ring.lookup(content)
    }

    fn with_stores(mut rc: RequestContext, cache: NodeId, view: &Network) -> RequestContext {
        let receiver = rc.session.receiver;
        let passed: Vec<NodeId> = rc
            .path
            .iter()
            .skip(1)
            .chain(rc.branches.iter().flat_map(|b| b.iter().skip(1)))
            .copied()
            .filter(|&v| v != receiver)
            .collect();
        for v in passed {
            if v == cache {
                if !rc.store.contains(&v) {
                    rc.store.push(v);
                }
            } else if view.has_local_cache(v) && !rc.store_local.contains(&v) {
                rc.store_local.push(v);
            }
        }
        rc
    }
}

impl CachingStrategy for HashroutingOnPath {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let receiver = session.receiver;
        let source = ctl
            .view()
            .content_source(session.content)
            .ok_or(SimError::UnknownContent(session.content))?;
        let Some(cache) = self.ring.lookup(session.content) else {
            return serve_from_source(session, receiver, 0, ctl);
        };
        let Some(to_cache) = ctl.view().shortest_path(receiver, cache) else {
            ctl.report_degraded(&session, cache);
            return serve_from_source(session, receiver, 0, ctl);
        };

        let (mut delay, local_hit) = forward_checking_local(&session, &to_cache, ctl);
        let hit_at = match local_hit {
            Some(at) => Some(at),
            None => ctl
                .get_content(&session, cache)
                .then(|| to_cache.len() - 1),
        };
        if let Some(at) = hit_at {
            let path = reversed(&to_cache[..=at]);
            let rc = RequestContext::new(session, to_cache[at], path, delay, ctl.view());
            return Ok(Some(Self::with_stores(rc, cache, ctl.view())));
        }

        let Some(to_source) = ctl.view().shortest_path(cache, source) else {
            return Ok(fail(session, source, ctl));
        };
        let (more, local_hit) = forward_checking_local(&session, &to_source, ctl);
        delay += more;
        let at = match local_hit {
            Some(at) => at,
            None => {
                if !ctl.get_content(&session, source) {
                    return Err(SimError::SourceMiss {
                        content: session.content,
                        source,
                    });
                }
                to_source.len() - 1
            }
        };
        let serving = to_source[at];
        let serving_to_cache = reversed(&to_source[..=at]);

        let mut branches = Vec::new();
        let main = match self.routing {
            HashRouting::Symm => {
                let mut path = serving_to_cache;
                path.extend(to_cache.iter().rev().skip(1));
                path
            }
            HashRouting::Asymm | HashRouting::Multicast => {
                let Some(direct) = ctl.view().shortest_path(serving, receiver) else {
                    return Ok(fail(session, receiver, ctl));
                };
                if self.routing == HashRouting::Multicast && !direct.contains(&cache) {
                    let fork = common_prefix(&serving_to_cache, &direct).max(1) - 1;
                    branches.push(serving_to_cache[fork..].to_vec());
                }
                direct
            }
        };
        let mut rc = RequestContext::new(session, serving, main, delay, ctl.view());
        rc.branches = branches;
        Ok(Some(Self::with_stores(rc, cache, ctl.view())))
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        deliver_content(rc, ctl)
    }

    fn on_topology_change(&mut self, network: &Network) {
        self.ring = HashRing::new(&network.cache_nodes(), self.replicas);
    }
}

/// How HR_CLUSTER moves between clusters.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterClusterRouting {
    /// The request visits the authoritative cache of every cluster on the
    /// way to the source's cluster. All of them get a copy on the way back.
    #[default]
    Lce,
    /// Only the receiver's own cluster is looked up before the source.
    Edge,
}

/// Hash-routing run separately inside each cluster of the network, with its
/// own ring over the cluster's caches.
#[derive(Debug)]
pub struct HashroutingClustered {
    intra: HashRouting,
    inter: InterClusterRouting,
    replicas: u32,
    rings: BTreeMap<ClusterId, HashRing>,
    adjacency: BTreeMap<ClusterId, BTreeSet<ClusterId>>,
}

impl HashroutingClustered {
    pub fn new(
        network: &Network,
        intra: HashRouting,
        inter: InterClusterRouting,
        replicas: u32,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = network.nodes().find(|&v| network.cluster(v).is_none()) {
            return Err(ConfigError::invalid(
                "cluster",
                format!("node {v} belongs to no cluster"),
            ));
        }
        if network.cache_nodes().is_empty() {
            return Err(ConfigError::NoCacheNodes);
        }
        live_ring(network, replicas)?;
        let mut strategy = Self {
            intra,
            inter,
            replicas,
            rings: BTreeMap::new(),
            adjacency: BTreeMap::new(),
        };
        strategy.rebuild(network);
        Ok(strategy)
    }

    fn rebuild(&mut self, network: &Network) {
        let mut members: BTreeMap<ClusterId, Vec<NodeId>> = BTreeMap::new();
        for v in network.cache_nodes() {
            if let Some(c) = network.cluster(v) {
                members.entry(c).or_default().push(v);
            }
        }
        self.rings = members
            .into_iter()
            .map(|(c, nodes)| (c, HashRing::new(&nodes, self.replicas)))
            .collect();

        self.adjacency.clear();
        for v in network.nodes().filter(|&v| network.is_up(v)) {
            let Some(c) = network.cluster(v) else { continue };
            self.adjacency.entry(c).or_default();
            for u in network.neighbors(v) {
                match network.cluster(u) {
                    Some(other) if other != c => {
                        self.adjacency.entry(c).or_default().insert(other);
                    }
                    _ => {}
                }
            }
        }
    }

    pub fn authoritative_cache(&self, content: ContentId, cluster: ClusterId) -> Option<NodeId> {
        self.rings.get(&cluster)?.lookup(content)
    }

    /// Fewest-hop sequence of clusters from `from` to `to`, both included.
    /// Ties go to the lower cluster ids.
    pub fn cluster_path(&self, from: ClusterId, to: ClusterId) -> Option<Vec<ClusterId>> {
        let mut pred = BTreeMap::from([(from, from)]);
        let mut queue = VecDeque::from([from]);
        while let Some(c) = queue.pop_front() {
            if c == to {
                let mut path = vec![to];
                let mut at = to;
                while at != from {
                    at = *pred.get(&at)?;
                    path.push(at);
                }
                path.reverse();
                return Some(path);
            }
            for &next in self.adjacency.get(&c).into_iter().flatten() {
                if let Entry::Vacant(e) = pred.entry(next) {
                    e.insert(c);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Authoritative caches lying on `path`, in path order.
    fn caches_on(&self, path: &[NodeId], content: ContentId, view: &Network) -> Vec<NodeId> {
        path.iter()
            .copied()
            .filter(|&v| {
                view.cluster(v)
                    .and_then(|c| self.authoritative_cache(content, c))
                    == Some(v)
            })
            .collect()
    }

    fn route_lce(
        &self,
        session: Session,
        source: NodeId,
        clusters: &[ClusterId],
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let receiver = session.receiver;
        let content = session.content;
        let mut start = receiver;
        let mut delay = 0;
        let mut hit = None;
        for (i, &cluster) in clusters.iter().enumerate() {
            let Some(cache) = self.authoritative_cache(content, cluster) else {
                continue;
            };
            let Some(path) = ctl.view().shortest_path(start, cache) else {
                ctl.report_degraded(&session, cache);
                continue;
            };
            delay += ctl.forward_request_path(&session, &path, true);
            start = cache;
            if ctl.get_content(&session, cache) {
                hit = Some((cache, i));
                break;
            }
        }
        let (serving, reached) = match hit {
            Some(hit) => hit,
            None => {
                let Some(path) = ctl.view().shortest_path(start, source) else {
                    return Ok(fail(session, source, ctl));
                };
                delay += ctl.forward_request_path(&session, &path, true);
                if !ctl.get_content(&session, source) {
                    return Err(SimError::SourceMiss { content, source });
                }
                (source, clusters.len() - 1)
            }
        };

        let caches: Vec<NodeId> = clusters[..=reached]
            .iter()
            .rev()
            .filter_map(|&c| self.authoritative_cache(content, c))
            .filter(|&v| v != serving)
            .collect();
        let (main, branches, store) = match self.intra {
            HashRouting::Symm => {
                let mut main = vec![serving];
                for &hop in caches.iter().chain(std::iter::once(&receiver)) {
                    let at = main[main.len() - 1];
                    let Some(leg) = ctl.view().shortest_path(at, hop) else {
                        return Ok(fail(session, hop, ctl));
                    };
                    main.extend(leg.into_iter().skip(1));
                }
                (main, Vec::new(), caches)
            }
            HashRouting::Asymm => {
                let Some(main) = ctl.view().shortest_path(serving, receiver) else {
                    return Ok(fail(session, receiver, ctl));
                };
                let store = self
                    .caches_on(&main, content, ctl.view())
                    .into_iter()
                    .filter(|&v| v != serving)
                    .collect();
                (main, Vec::new(), store)
            }
            HashRouting::Multicast => {
                let Some(main) = ctl.view().shortest_path(serving, receiver) else {
                    return Ok(fail(session, receiver, ctl));
                };
                let branches = multicast_branches(ctl.view(), &main, &caches);
                (main, branches, caches)
            }
        };
        let mut rc = RequestContext::new(session, serving, main, delay, ctl.view());
        rc.branches = branches;
        rc.store = store;
        Ok(Some(rc))
    }

    fn route_edge(
        &self,
        session: Session,
        source: NodeId,
        home: ClusterId,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let receiver = session.receiver;
        let content = session.content;
        let Some(cache) = self.authoritative_cache(content, home) else {
            return serve_from_source(session, receiver, 0, ctl);
        };
        let Some(to_cache) = ctl.view().shortest_path(receiver, cache) else {
            ctl.report_degraded(&session, cache);
            return serve_from_source(session, receiver, 0, ctl);
        };
        let mut delay = ctl.forward_request_path(&session, &to_cache, true);
        if ctl.get_content(&session, cache) {
            let path = reversed(&to_cache);
            return Ok(Some(RequestContext::new(session, cache, path, delay, ctl.view())));
        }
        let Some(to_source) = ctl.view().shortest_path(cache, source) else {
            return Ok(fail(session, source, ctl));
        };
        delay += ctl.forward_request_path(&session, &to_source, true);
        if !ctl.get_content(&session, source) {
            return Err(SimError::SourceMiss { content, source });
        }
        let Some(direct) = ctl.view().shortest_path(source, receiver) else {
            return Ok(fail(session, receiver, ctl));
        };
        let on_direct = self.caches_on(&direct, content, ctl.view());

        let (main, branches, store) = match self.intra {
            HashRouting::Symm => {
                let mut main = reversed(&to_source);
                main.extend(to_cache.iter().rev().skip(1));
                let mut store = on_direct;
                if !store.contains(&cache) {
                    store.push(cache);
                }
                (main, Vec::new(), store)
            }
            HashRouting::Asymm => (direct, Vec::new(), on_direct),
            HashRouting::Multicast => {
                let branches = multicast_branches(ctl.view(), &direct, &[cache]);
                (direct, branches, vec![cache])
            }
        };
        let mut rc = RequestContext::new(session, source, main, delay, ctl.view());
        rc.branches = branches;
        rc.store = store;
        Ok(Some(rc))
    }
}

/// Links of the multicast tree from `main[0]` to `targets` that are not on
/// `main`, grouped into contiguous branches.
fn multicast_branches(view: &Network, main: &[NodeId], targets: &[NodeId]) -> Vec<Vec<NodeId>> {
    let Some(&root) = main.first() else {
        return Vec::new();
    };
    let mut covered: BTreeSet<(NodeId, NodeId)> = main.windows(2).map(|w| (w[0], w[1])).collect();
    let mut branches: Vec<Vec<NodeId>> = Vec::new();
    for &target in targets {
        let Some(path) = view.shortest_path(root, target) else {
            continue;
        };
        for w in path.windows(2) {
            if !covered.insert((w[0], w[1])) {
                continue;
            }
            match branches.last_mut() {
                Some(branch) if branch.last() == Some(&w[0]) => branch.push(w[1]),
                _ => branches.push(vec![w[0], w[1]]),
            }
        }
    }
    branches
}

impl CachingStrategy for HashroutingClustered {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let source = ctl
            .view()
            .content_source(session.content)
            .ok_or(SimError::UnknownContent(session.content))?;
        let (Some(home), Some(remote)) = (
            ctl.view().cluster(session.receiver),
            ctl.view().cluster(source),
        ) else {
            return serve_from_source(session, session.receiver, 0, ctl);
        };
        match self.inter {
            InterClusterRouting::Lce => {
                let Some(clusters) = self.cluster_path(home, remote) else {
                    return Ok(fail(session, source, ctl));
                };
                self.route_lce(session, source, &clusters, ctl)
            }
            InterClusterRouting::Edge => self.route_edge(session, source, home, ctl),
        }
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        deliver_content(rc, ctl)
    }

    fn on_topology_change(&mut self, network: &Network) {
        self.rebuild(network);
    }
}
