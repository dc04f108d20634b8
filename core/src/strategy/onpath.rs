//! Strategies that route requests along the shortest path to the source and
//! cache on that same path.

use std::collections::{HashMap, VecDeque};

use rand::prelude::*;

use super::{deliver_content, deliver_with, fail, serve_from_source};
use super::{CachingStrategy, RequestContext, Session};
use crate::context::RunContext;
use crate::controller::Controller;
use crate::error::SimError;
use crate::network::Network;
use crate::traits::NodeId;

const PROB_CACHE_SALT: u64 = 0x9C;
const BERNOULLI_SALT: u64 = 0xBE;
const CHOICE_SALT: u64 = 0xC4;

/// Forwards the request from the receiver towards the content's source and
/// stops at the first cache hit. With `first_cache_only` only the first cache
/// on the path is looked up and the others are crossed blindly.
///
/// Returns the context, whose path is the walked prefix reversed, and the
/// first cache met on the way.
fn walk_to_source(
    session: Session,
    ctl: &mut Controller<'_>,
    first_cache_only: bool,
) -> Result<Option<(RequestContext, Option<NodeId>)>, SimError> {
    let source = ctl
        .view()
        .content_source(session.content)
        .ok_or(SimError::UnknownContent(session.content))?;
    let Some(path) = ctl.view().shortest_path(session.receiver, source) else {
        return Ok(fail(session, source, ctl).map(|rc| (rc, None)));
    };

    let mut delay = 0;
    let mut first_cache = None;
    let mut served_at = None;
    for (i, w) in path.windows(2).enumerate() {
        let (u, v) = (w[0], w[1]);
        delay += ctl.forward_request_hop(&session, u, v, true);
        if v == source {
            break;
        }
        if !ctl.view().has_cache(v) || (first_cache_only && first_cache.is_some()) {
            continue;
        }
        first_cache.get_or_insert(v);
        if ctl.get_content(&session, v) {
            served_at = Some(i + 1);
            break;
        }
    }
    let served_at = match served_at {
        Some(i) => i,
        None => {
            if !ctl.get_content(&session, source) {
                return Err(SimError::SourceMiss {
                    content: session.content,
                    source,
                });
            }
            path.len() - 1
        }
    };

    let back: Vec<NodeId> = path[..=served_at].iter().rev().copied().collect();
    let rc = RequestContext::new(session, path[served_at], back, delay, ctl.view());
    Ok(Some((rc, first_cache)))
}

fn on_path(
    session: Session,
    ctl: &mut Controller<'_>,
) -> Result<Option<RequestContext>, SimError> {
    Ok(walk_to_source(session, ctl, false)?.map(|(rc, _)| rc))
}

/// Caches on the return path, serving node excluded.
fn caches_below(rc: &RequestContext, view: &Network) -> Vec<NodeId> {
    rc.path
        .iter()
        .skip(1)
        .copied()
        .filter(|&v| v != rc.session.receiver && view.has_cache(v))
        .collect()
}

/// Never caches; every request is served by the source.
#[derive(Debug, Default)]
pub struct NoCache;

impl CachingStrategy for NoCache {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        serve_from_source(session, session.receiver, 0, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        deliver_content(rc, ctl)
    }
}

/// Leave Copy Everywhere: every cache on the return path gets a copy.
#[derive(Debug, Default)]
pub struct LeaveCopyEverywhere;

impl CachingStrategy for LeaveCopyEverywhere {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        on_path(session, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let store = caches_below(rc, ctl.view());
        deliver_with(rc, &store, ctl)
    }
}

/// Leave Copy Down: only the cache one hop below the serving node, towards
/// the receiver, gets a copy.
#[derive(Debug, Default)]
pub struct LeaveCopyDown;

impl CachingStrategy for LeaveCopyDown {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        on_path(session, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let store: Vec<NodeId> = caches_below(rc, ctl.view()).into_iter().take(1).collect();
        deliver_with(rc, &store, ctl)
    }
}

/// ProbCache: copies are left with a probability growing towards the
/// receiver and with the caching capacity left upstream.
#[derive(Debug)]
pub struct ProbCache {
    t_tw: f64,
    rng: StdRng,
}

impl ProbCache {
    pub fn new(t_tw: f64, ctx: &RunContext) -> Self {
        Self {
            t_tw,
            rng: StdRng::seed_from_u64(ctx.seed_for(PROB_CACHE_SALT)),
        }
    }

    fn pick(&mut self, rc: &RequestContext, view: &Network) -> Vec<NodeId> {
        let path = &rc.path;
        let capacity =
            |v: NodeId| view.cache(v).map(|c| c.capacity()).unwrap_or(0) as f64;
        let c = (path.len() - 1) as f64;
        let mut x = 0.0;
        let mut store = Vec::new();
        for hop in 1..path.len() {
            let v = path[hop];
            let n: f64 = path[hop - 1..].iter().map(|&u| capacity(u)).sum();
            if !view.has_cache(v) {
                continue;
            }
            x += 1.0;
            if v == rc.session.receiver {
                continue;
            }
            let prob = n / (self.t_tw * capacity(v)) * (x / c).powf(c);
            if self.rng.gen::<f64>() < prob {
                store.push(v);
            }
        }
        store
    }
}

impl CachingStrategy for ProbCache {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        on_path(session, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let store = self.pick(rc, ctl.view());
        deliver_with(rc, &store, ctl)
    }
}

/// Each cache on the return path keeps a copy with probability `p`.
#[derive(Debug)]
pub struct RandomBernoulli {
    p: f64,
    rng: StdRng,
}

impl RandomBernoulli {
    pub fn new(p: f64, ctx: &RunContext) -> Self {
        Self {
            p,
            rng: StdRng::seed_from_u64(ctx.seed_for(BERNOULLI_SALT)),
        }
    }
}

impl CachingStrategy for RandomBernoulli {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        on_path(session, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let store: Vec<NodeId> = caches_below(rc, ctl.view())
            .into_iter()
            .filter(|_| self.rng.gen::<f64>() < self.p)
            .collect();
        deliver_with(rc, &store, ctl)
    }
}

/// Exactly one cache of the return path, drawn uniformly, keeps a copy.
#[derive(Debug)]
pub struct RandomChoice {
    rng: StdRng,
}

impl RandomChoice {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            rng: StdRng::seed_from_u64(ctx.seed_for(CHOICE_SALT)),
        }
    }
}

impl CachingStrategy for RandomChoice {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        on_path(session, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let candidates = caches_below(rc, ctl.view());
        let store: Vec<NodeId> = candidates.choose(&mut self.rng).copied().into_iter().collect();
        deliver_with(rc, &store, ctl)
    }
}

/// Cache Less for More: the cache with the highest betweenness centrality on
/// the return path keeps the copy, the one closest to the receiver on ties.
#[derive(Debug)]
pub struct CacheLessForMore {
    betweenness: HashMap<NodeId, f64>,
}

impl CacheLessForMore {
    pub fn new(network: &Network) -> Self {
        Self {
            betweenness: betweenness(network),
        }
    }

    pub fn betweenness(&self, node: NodeId) -> f64 {
        self.betweenness.get(&node).copied().unwrap_or(0.0)
    }
}

impl CachingStrategy for CacheLessForMore {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        on_path(session, ctl)
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let mut best: Option<(f64, NodeId)> = None;
        for v in caches_below(rc, ctl.view()) {
            let b = self.betweenness(v);
            if best.map_or(true, |(max, _)| b >= max) {
                best = Some((b, v));
            }
        }
        let store: Vec<NodeId> = best.map(|(_, v)| v).into_iter().collect();
        deliver_with(rc, &store, ctl)
    }

    fn on_topology_change(&mut self, network: &Network) {
        self.betweenness = betweenness(network);
    }
}

/// Brandes' betweenness centrality over live nodes, hop count as distance.
fn betweenness(network: &Network) -> HashMap<NodeId, f64> {
    let nodes: Vec<NodeId> = network.nodes().filter(|&v| network.is_up(v)).collect();
    let mut centrality: HashMap<NodeId, f64> = nodes.iter().map(|&v| (v, 0.0)).collect();
    for &s in &nodes {
        let mut order = Vec::with_capacity(nodes.len());
        let mut preds: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut sigma: HashMap<NodeId, f64> = HashMap::from([(s, 1.0)]);
        let mut dist: HashMap<NodeId, u32> = HashMap::from([(s, 0)]);
        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            let (dv, sv) = (dist[&v], sigma[&v]);
            for w in network.neighbors(v) {
                let dw = *dist.entry(w).or_insert_with(|| {
                    queue.push_back(w);
                    dv + 1
                });
                if dw == dv + 1 {
                    *sigma.entry(w).or_default() += sv;
                    preds.entry(w).or_default().push(v);
                }
            }
        }
        let mut delta: HashMap<NodeId, f64> = HashMap::new();
        while let Some(w) = order.pop() {
            let dw = delta.get(&w).copied().unwrap_or(0.0);
            for &v in preds.get(&w).into_iter().flatten() {
                *delta.entry(v).or_default() += sigma[&v] / sigma[&w] * (1.0 + dw);
            }
            if w != s {
                *centrality.entry(w).or_default() += dw;
            }
        }
    }
    centrality
}

/// Only the first cache met by the request is used. On a miss there the
/// request goes on to the source without looking at other caches, and the
/// content is left at that edge cache on its way back.
#[derive(Debug, Default)]
pub struct EdgeCaching;

impl CachingStrategy for EdgeCaching {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let Some((mut rc, edge)) = walk_to_source(session, ctl, true)? else {
            return Ok(None);
        };
        if let Some(edge) = edge.filter(|&e| e != rc.serving) {
            rc.store.push(edge);
        }
        Ok(Some(rc))
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        deliver_content(rc, ctl)
    }
}
