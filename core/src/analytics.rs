//! Metrics collectors.
//!
//! Collectors are passive: the controller reports every cache outcome and
//! link traversal of a logged session to them, and nothing they do feeds back
//! into routing or eviction. All aggregates are append-only, so a run that
//! stops early still leaves a consistent prefix of results.

use std::collections::{BTreeMap, HashMap};

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ConfigError;
use crate::network::{LinkKind, Network};
use crate::traits::{ContentId, NodeId, RequestId, SimTime};

/// Reported when a logged request enters the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStart {
    pub request: RequestId,
    pub time: SimTime,
    pub receiver: NodeId,
    pub content: ContentId,
    pub source: Option<NodeId>,
    /// Hops on the shortest receiver to source path at request time.
    pub shortest_hops: Option<usize>,
}

/// One traversal of the link `from -> to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub request: RequestId,
    pub from: NodeId,
    pub to: NodeId,
    pub delay: SimTime,
    /// `false` for copies sent off the path to the receiver, such as the
    /// multicast branch of hash-routing.
    pub main_path: bool,
}

pub trait Collector {
    fn name(&self) -> &'static str;

    fn start_session(&mut self, _session: &SessionStart) {}

    fn cache_hit(&mut self, _request: RequestId, _node: NodeId) {}

    fn cache_miss(&mut self, _request: RequestId, _node: NodeId) {}

    fn server_hit(&mut self, _request: RequestId, _node: NodeId) {}

    fn content_stored(&mut self, _node: NodeId, _content: ContentId, _evicted: Option<ContentId>) {}

    fn request_hop(&mut self, _hop: &Hop) {}

    fn content_hop(&mut self, _hop: &Hop) {}

    /// A designated node could not be reached and the request fell back.
    fn degraded_path(&mut self, _request: RequestId, _unreachable: NodeId) {}

    fn end_session(&mut self, _request: RequestId, _time: SimTime, _success: bool) {}

    fn results(&self) -> Value;
}

/// Collector configuration as it appears in a scenario file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectorConfig {
    CacheHitRatio {
        #[serde(default = "yes")]
        per_node: bool,
        #[serde(default)]
        per_content: bool,
    },
    LinkLoad {
        #[serde(default = "default_req_size")]
        req_size: u64,
        #[serde(default = "default_content_size")]
        content_size: u64,
    },
    Latency {
        #[serde(default)]
        samples: bool,
    },
    PathStretch {
        #[serde(default)]
        samples: bool,
    },
    Sessions,
}

fn yes() -> bool {
    true
}

fn default_req_size() -> u64 {
    150
}

fn default_content_size() -> u64 {
    1500
}

impl CollectorConfig {
    /// Key of this collector's results.
    pub fn name(&self) -> &'static str {
        match self {
            CollectorConfig::CacheHitRatio { .. } => "CACHE_HIT_RATIO",
            CollectorConfig::LinkLoad { .. } => "LINK_LOAD",
            CollectorConfig::Latency { .. } => "LATENCY",
            CollectorConfig::PathStretch { .. } => "PATH_STRETCH",
            CollectorConfig::Sessions => "SESSIONS",
        }
    }

    pub fn build(&self, network: &Network) -> Result<Box<dyn Collector>, ConfigError> {
        Ok(match *self {
            CollectorConfig::CacheHitRatio {
                per_node,
                per_content,
            } => Box::new(CacheHitRatioCollector::new(per_node, per_content)),
            CollectorConfig::LinkLoad {
                req_size,
                content_size,
            } => Box::new(LinkLoadCollector::new(network, req_size, content_size)?),
            CollectorConfig::Latency { samples } => Box::new(LatencyCollector::new(samples)?),
            CollectorConfig::PathStretch { samples } => {
                Box::new(PathStretchCollector::new(samples))
            }
            CollectorConfig::Sessions => Box::new(SessionCollector::default()),
        })
    }
}

/// Fans every event out to a list of collectors.
#[derive(Default)]
pub struct CollectorSet {
    collectors: Vec<Box<dyn Collector>>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl Collector for CollectorSet {
    fn name(&self) -> &'static str {
        "ALL"
    }

    fn start_session(&mut self, session: &SessionStart) {
        for c in &mut self.collectors {
            c.start_session(session);
        }
    }

    fn cache_hit(&mut self, request: RequestId, node: NodeId) {
        for c in &mut self.collectors {
            c.cache_hit(request, node);
        }
    }

    fn cache_miss(&mut self, request: RequestId, node: NodeId) {
        for c in &mut self.collectors {
            c.cache_miss(request, node);
        }
    }

    fn server_hit(&mut self, request: RequestId, node: NodeId) {
        for c in &mut self.collectors {
            c.server_hit(request, node);
        }
    }

    fn content_stored(&mut self, node: NodeId, content: ContentId, evicted: Option<ContentId>) {
        for c in &mut self.collectors {
            c.content_stored(node, content, evicted);
        }
    }

    fn request_hop(&mut self, hop: &Hop) {
        for c in &mut self.collectors {
            c.request_hop(hop);
        }
    }

    fn content_hop(&mut self, hop: &Hop) {
        for c in &mut self.collectors {
            c.content_hop(hop);
        }
    }

    fn degraded_path(&mut self, request: RequestId, unreachable: NodeId) {
        for c in &mut self.collectors {
            c.degraded_path(request, unreachable);
        }
    }

    fn end_session(&mut self, request: RequestId, time: SimTime, success: bool) {
        for c in &mut self.collectors {
            c.end_session(request, time, success);
        }
    }

    fn results(&self) -> Value {
        let by_name: BTreeMap<&str, Value> = self
            .collectors
            .iter()
            .map(|c| (c.name(), c.results()))
            .collect();
        json!(by_name)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Share of requests served by a cache rather than by a source.
#[derive(Debug, Default)]
pub struct CacheHitRatioCollector {
    per_node: bool,
    per_content: bool,
    cache_hits: u64,
    server_hits: u64,
    node_hits: BTreeMap<NodeId, u64>,
    node_misses: BTreeMap<NodeId, u64>,
    node_server_hits: BTreeMap<NodeId, u64>,
    requested: HashMap<RequestId, ContentId>,
    content_hits: BTreeMap<ContentId, (u64, u64)>,
}

impl CacheHitRatioCollector {
    pub fn new(per_node: bool, per_content: bool) -> Self {
        Self {
            per_node,
            per_content,
            ..Default::default()
        }
    }

    pub fn hit_ratio(&self) -> f64 {
        ratio(self.cache_hits, self.cache_hits + self.server_hits)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn server_hits(&self) -> u64 {
        self.server_hits
    }

    pub fn node_hits(&self, node: NodeId) -> u64 {
        self.node_hits.get(&node).copied().unwrap_or(0)
    }

    pub fn node_misses(&self, node: NodeId) -> u64 {
        self.node_misses.get(&node).copied().unwrap_or(0)
    }
}

impl Collector for CacheHitRatioCollector {
    fn name(&self) -> &'static str {
        "CACHE_HIT_RATIO"
    }

    fn start_session(&mut self, session: &SessionStart) {
        if self.per_content {
            self.requested.insert(session.request, session.content);
        }
    }

    fn cache_hit(&mut self, request: RequestId, node: NodeId) {
        self.cache_hits += 1;
        *self.node_hits.entry(node).or_default() += 1;
        if let Some(&content) = self.requested.get(&request) {
            self.content_hits.entry(content).or_default().0 += 1;
        }
    }

    fn cache_miss(&mut self, _request: RequestId, node: NodeId) {
        *self.node_misses.entry(node).or_default() += 1;
    }

    fn server_hit(&mut self, request: RequestId, node: NodeId) {
        self.server_hits += 1;
        *self.node_server_hits.entry(node).or_default() += 1;
        if let Some(&content) = self.requested.get(&request) {
            self.content_hits.entry(content).or_default().1 += 1;
        }
    }

    fn end_session(&mut self, request: RequestId, _time: SimTime, _success: bool) {
        self.requested.remove(&request);
    }

    fn results(&self) -> Value {
        let served = self.cache_hits + self.server_hits;
        let mut out = json!({
            "MEAN": self.hit_ratio(),
            "CACHE_HITS": self.cache_hits,
            "SERVER_HITS": self.server_hits,
        });
        if self.per_node {
            let hit_ratio: BTreeMap<NodeId, f64> = self
                .node_hits
                .iter()
                .map(|(&v, &h)| (v, ratio(h, served)))
                .collect();
            let server_ratio: BTreeMap<NodeId, f64> = self
                .node_server_hits
                .iter()
                .map(|(&v, &h)| (v, ratio(h, served)))
                .collect();
            out["PER_NODE_CACHE_HIT_RATIO"] = json!(hit_ratio);
            out["PER_NODE_SERVER_HIT_RATIO"] = json!(server_ratio);
            out["PER_NODE_HITS"] = json!(self.node_hits);
            out["PER_NODE_MISSES"] = json!(self.node_misses);
        }
        if self.per_content {
            let per_content: BTreeMap<ContentId, f64> = self
                .content_hits
                .iter()
                .map(|(&k, &(hits, served))| (k, ratio(hits, hits + served)))
                .collect();
            out["PER_CONTENT"] = json!(per_content);
        }
        out
    }
}

/// Request and content traversals per directed link, turned into an average
/// load in bytes per second of simulated time.
#[derive(Debug)]
pub struct LinkLoadCollector {
    req_size: u64,
    content_size: u64,
    kinds: BTreeMap<(NodeId, NodeId), LinkKind>,
    req_count: BTreeMap<(NodeId, NodeId), u64>,
    content_count: BTreeMap<(NodeId, NodeId), u64>,
    t_start: Option<SimTime>,
    t_end: SimTime,
}

impl LinkLoadCollector {
    pub fn new(network: &Network, req_size: u64, content_size: u64) -> Result<Self, ConfigError> {
        if req_size == 0 || content_size == 0 {
            return Err(ConfigError::invalid(
                "req_size",
                "request and content sizes must be positive",
            ));
        }
        Ok(Self {
            req_size,
            content_size,
            kinds: network.links().map(|(k, l)| (k, l.kind)).collect(),
            req_count: BTreeMap::new(),
            content_count: BTreeMap::new(),
            t_start: None,
            t_end: 0,
        })
    }

    pub fn request_count(&self, from: NodeId, to: NodeId) -> u64 {
        self.req_count.get(&(from, to)).copied().unwrap_or(0)
    }

    pub fn content_count(&self, from: NodeId, to: NodeId) -> u64 {
        self.content_count.get(&(from, to)).copied().unwrap_or(0)
    }

    fn kind(&self, link: (NodeId, NodeId)) -> LinkKind {
        let key = crate::network::canonical_key(link.0, link.1);
        self.kinds.get(&key).copied().unwrap_or_default()
    }
}

impl Collector for LinkLoadCollector {
    fn name(&self) -> &'static str {
        "LINK_LOAD"
    }

    fn start_session(&mut self, session: &SessionStart) {
        self.t_start.get_or_insert(session.time);
        self.t_end = session.time;
    }

    fn request_hop(&mut self, hop: &Hop) {
        *self.req_count.entry((hop.from, hop.to)).or_default() += 1;
    }

    fn content_hop(&mut self, hop: &Hop) {
        *self.content_count.entry((hop.from, hop.to)).or_default() += 1;
    }

    fn results(&self) -> Value {
        // Session arrival span in seconds, at least one microsecond.
        let span_us = self
            .t_end
            .saturating_sub(self.t_start.unwrap_or(0))
            .max(1);
        let duration = span_us as f64 / 1_000_000.0;

        let mut internal = BTreeMap::new();
        let mut external = BTreeMap::new();
        let links: std::collections::BTreeSet<_> = self
            .req_count
            .keys()
            .chain(self.content_count.keys())
            .copied()
            .collect();
        for link in links {
            let bytes = self.req_size * self.req_count.get(&link).copied().unwrap_or(0)
                + self.content_size * self.content_count.get(&link).copied().unwrap_or(0);
            let load = bytes as f64 / duration;
            let label = format!("{}->{}", link.0, link.1);
            match self.kind(link) {
                LinkKind::Internal => internal.insert(label, load),
                LinkKind::External => external.insert(label, load),
            };
        }
        let mean = |m: &BTreeMap<String, f64>| {
            if m.is_empty() {
                0.0
            } else {
                m.values().sum::<f64>() / m.len() as f64
            }
        };
        json!({
            "MEAN_INTERNAL": mean(&internal),
            "MEAN_EXTERNAL": mean(&external),
            "PER_LINK_INTERNAL": internal,
            "PER_LINK_EXTERNAL": external,
        })
    }
}

/// Time from request arrival to content delivery at the receiver.
#[derive(Debug)]
pub struct LatencyCollector {
    started: HashMap<RequestId, SimTime>,
    histogram: Histogram<u64>,
    total: u128,
    count: u64,
    samples: Option<Vec<SimTime>>,
}

impl LatencyCollector {
    pub fn new(keep_samples: bool) -> Result<Self, ConfigError> {
        let histogram = Histogram::<u64>::new(3)
            .map_err(|e| ConfigError::invalid("latency", e.to_string()))?;
        Ok(Self {
            started: HashMap::new(),
            histogram,
            total: 0,
            count: 0,
            samples: keep_samples.then(Vec::new),
        })
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }

    pub fn samples(&self) -> Option<&[SimTime]> {
        self.samples.as_deref()
    }

    pub fn percentile(&self, p: f64) -> SimTime {
        self.histogram.value_at_quantile(p / 100.0)
    }
}

impl Collector for LatencyCollector {
    fn name(&self) -> &'static str {
        "LATENCY"
    }

    fn start_session(&mut self, session: &SessionStart) {
        self.started.insert(session.request, session.time);
    }

    fn end_session(&mut self, request: RequestId, time: SimTime, success: bool) {
        let Some(start) = self.started.remove(&request) else {
            return;
        };
        if !success {
            return;
        }
        let latency = time.saturating_sub(start);
        self.histogram.saturating_record(latency);
        self.total += latency as u128;
        self.count += 1;
        if let Some(samples) = self.samples.as_mut() {
            samples.push(latency);
        }
    }

    fn results(&self) -> Value {
        let mut out = json!({
            "MEAN": self.mean(),
            "COUNT": self.count,
            "P50": self.percentile(50.0),
            "P90": self.percentile(90.0),
            "P99": self.percentile(99.0),
            "MAX": self.histogram.max(),
        });
        if let Some(samples) = &self.samples {
            out["SAMPLES"] = json!(samples);
        }
        out
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HopCount {
    shortest: usize,
    request: usize,
    content: usize,
}

/// Hops actually traveled over hops of the shortest receiver to source path,
/// both ways.
#[derive(Debug, Default)]
pub struct PathStretchCollector {
    open: HashMap<RequestId, HopCount>,
    total: f64,
    total_request: f64,
    total_content: f64,
    count: u64,
    samples: Option<Vec<f64>>,
}

impl PathStretchCollector {
    pub fn new(keep_samples: bool) -> Self {
        Self {
            samples: keep_samples.then(Vec::new),
            ..Default::default()
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

impl Collector for PathStretchCollector {
    fn name(&self) -> &'static str {
        "PATH_STRETCH"
    }

    fn start_session(&mut self, session: &SessionStart) {
        if let Some(shortest) = session.shortest_hops.filter(|&h| h > 0) {
            self.open.insert(
                session.request,
                HopCount {
                    shortest,
                    ..Default::default()
                },
            );
        }
    }

    fn request_hop(&mut self, hop: &Hop) {
        if let Some(c) = self.open.get_mut(&hop.request) {
            c.request += 1;
        }
    }

    fn content_hop(&mut self, hop: &Hop) {
        if !hop.main_path {
            return;
        }
        if let Some(c) = self.open.get_mut(&hop.request) {
            c.content += 1;
        }
    }

    fn end_session(&mut self, request: RequestId, _time: SimTime, success: bool) {
        let Some(c) = self.open.remove(&request) else {
            return;
        };
        if !success {
            return;
        }
        let sp = c.shortest as f64;
        let stretch = (c.request + c.content) as f64 / (2.0 * sp);
        self.total += stretch;
        self.total_request += c.request as f64 / sp;
        self.total_content += c.content as f64 / sp;
        self.count += 1;
        if let Some(samples) = self.samples.as_mut() {
            samples.push(stretch);
        }
    }

    fn results(&self) -> Value {
        let n = self.count.max(1) as f64;
        let mut out = json!({
            "MEAN": self.mean(),
            "MEAN_REQUEST": self.total_request / n,
            "MEAN_CONTENT": self.total_content / n,
        });
        if let Some(samples) = &self.samples {
            out["SAMPLES"] = json!(samples);
        }
        out
    }
}

/// Session outcomes and degraded paths.
#[derive(Debug, Default)]
pub struct SessionCollector {
    started: u64,
    succeeded: u64,
    failed: u64,
    degraded: u64,
    degraded_at: BTreeMap<NodeId, u64>,
    stored: u64,
    evicted: u64,
}

impl SessionCollector {
    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn degraded(&self) -> u64 {
        self.degraded
    }
}

impl Collector for SessionCollector {
    fn name(&self) -> &'static str {
        "SESSIONS"
    }

    fn start_session(&mut self, _session: &SessionStart) {
        self.started += 1;
    }

    fn content_stored(&mut self, _node: NodeId, _content: ContentId, evicted: Option<ContentId>) {
        self.stored += 1;
        if evicted.is_some() {
            self.evicted += 1;
        }
    }

    fn degraded_path(&mut self, _request: RequestId, unreachable: NodeId) {
        self.degraded += 1;
        *self.degraded_at.entry(unreachable).or_default() += 1;
    }

    fn end_session(&mut self, _request: RequestId, _time: SimTime, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    fn results(&self) -> Value {
        json!({
            "STARTED": self.started,
            "SUCCEEDED": self.succeeded,
            "FAILED": self.failed,
            "DEGRADED": self.degraded,
            "DEGRADED_PER_NODE": self.degraded_at,
            "STORED": self.stored,
            "EVICTED": self.evicted,
        })
    }
}
