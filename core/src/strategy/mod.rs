//! Routing and caching strategies.
//!
//! A strategy sees each request twice: on arrival it routes the request to a
//! node able to serve it and picks the content's return path, and on the
//! matching delivery event it walks that path and decides where copies are
//! left. What happens in between is kept in a [`RequestContext`] owned by the
//! [`Strategy`] until delivery.

use std::collections::HashMap;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::controller::Controller;
use crate::engine::SimEvent;
use crate::error::{ConfigError, SimError};
use crate::network::{Network, NodeRole};
use crate::traits::{ContentId, NodeId, RequestId, SimTime};

pub mod hashrouting;
pub mod offpath;
pub mod onpath;

pub use hashrouting::{
    HashRing, HashRouting, Hashrouting, HashroutingClustered, HashroutingEdge, HashroutingOnPath,
    InterClusterRouting,
};
pub use offpath::{Metacaching, NearestReplica};
pub use onpath::{
    CacheLessForMore, EdgeCaching, LeaveCopyDown, LeaveCopyEverywhere, NoCache, ProbCache,
    RandomBernoulli, RandomChoice,
};

/// Identity of one request for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: RequestId,
    pub receiver: NodeId,
    pub content: ContentId,
    pub start: SimTime,
    /// Whether collectors hear about this request.
    pub log: bool,
}

/// State of a request between arrival and delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub session: Session,
    pub serving: NodeId,
    /// Content path, serving node first and receiver last.
    pub path: Vec<NodeId>,
    /// Copies sent off the main path, e.g. the multicast branch towards an
    /// authoritative cache. Each starts at its fork node.
    pub branches: Vec<Vec<NodeId>>,
    /// Caches picked at arrival that get a copy on delivery.
    pub store: Vec<NodeId>,
    /// Nodes whose local partition gets a copy on delivery.
    pub store_local: Vec<NodeId>,
    /// Arrival to delivery.
    pub delay: SimTime,
}

impl RequestContext {
    /// `request_delay` is what the request spent reaching `serving`; the
    /// content delay is taken from `path`.
    pub fn new(
        session: Session,
        serving: NodeId,
        path: Vec<NodeId>,
        request_delay: SimTime,
        view: &Network,
    ) -> Self {
        let content_delay: SimTime = path
            .windows(2)
            .map(|w| view.link_delay(w[0], w[1]).unwrap_or(0))
            .sum();
        Self {
            session,
            serving,
            path,
            branches: Vec::new(),
            store: Vec::new(),
            store_local: Vec::new(),
            delay: request_delay + content_delay,
        }
    }
}

pub trait CachingStrategy {
    /// Routes a freshly arrived request. Returns `None` when the request
    /// already ended, for instance because nothing could serve it.
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError>;

    /// Walks the content back to the receiver and places copies.
    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError>;

    fn on_topology_change(&mut self, _network: &Network) {}
}

macro_rules! register_strategies {
    ($($name:expr => $variant:ident($ty:ty)),* $(,)?) => {
        /// One of the known strategies.
        #[derive(Debug)]
        pub enum StrategyKind {
            $($variant($ty)),*
        }

        impl StrategyKind {
            pub fn name(&self) -> &'static str {
                match self { $(Self::$variant(_) => $name),* }
            }
        }

        impl CachingStrategy for StrategyKind {
            fn on_request(
                &mut self,
                session: Session,
                ctl: &mut Controller<'_>,
            ) -> Result<Option<RequestContext>, SimError> {
                match self { $(Self::$variant(s) => s.on_request(session, ctl)),* }
            }

            fn on_delivery(
                &mut self,
                rc: &RequestContext,
                ctl: &mut Controller<'_>,
            ) -> Result<(), SimError> {
                match self { $(Self::$variant(s) => s.on_delivery(rc, ctl)),* }
            }

            fn on_topology_change(&mut self, network: &Network) {
                match self { $(Self::$variant(s) => s.on_topology_change(network)),* }
            }
        }
    };
}

register_strategies!(
    "NO_CACHE" => NoCache(NoCache),
    "LCE" => Lce(LeaveCopyEverywhere),
    "LCD" => Lcd(LeaveCopyDown),
    "PROB_CACHE" => ProbCache(ProbCache),
    "RAND_BERNOULLI" => RandBernoulli(RandomBernoulli),
    "RAND_CHOICE" => RandChoice(RandomChoice),
    "CL4M" => Cl4m(CacheLessForMore),
    "EDGE" => Edge(EdgeCaching),
    "NEAREST_REPLICA" => NearestReplica(NearestReplica),
    "HASHROUTING" => Hashrouting(Hashrouting),
    "HR_EDGE_CACHE" => HrEdgeCache(HashroutingEdge),
    "HR_HYBRID_AM" => HrHybridAm(Hashrouting),
    "HR_HYBRID_SM" => HrHybridSm(Hashrouting),
    "HR_ON_PATH" => HrOnPath(HashroutingOnPath),
    "HR_CLUSTER" => HrCluster(HashroutingClustered),
);

/// Drives a [`StrategyKind`] and owns the contexts of in-flight requests.
#[derive(Debug)]
pub struct Strategy {
    kind: StrategyKind,
    in_flight: HashMap<RequestId, RequestContext>,
}

impl Strategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            in_flight: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<(), SimError> {
        if ctl.view().role(session.receiver) != Some(NodeRole::Receiver) {
            return Err(SimError::UnknownReceiver {
                request: session.id,
                receiver: session.receiver,
            });
        }
        if ctl.view().content_source(session.content).is_none() {
            return Err(SimError::UnknownContent(session.content));
        }
        ctl.start_session(&session);
        if let Some(rc) = self.kind.on_request(session, ctl)? {
            debug!(
                "request {} served by {}, delivery in {}us",
                session.id, rc.serving, rc.delay
            );
            ctl.schedule_after(
                rc.delay,
                SimEvent::ContentDelivery {
                    request: session.id,
                },
            )?;
            self.in_flight.insert(session.id, rc);
        }
        Ok(())
    }

    pub(crate) fn deliver(
        &mut self,
        request: RequestId,
        ctl: &mut Controller<'_>,
    ) -> Result<(), SimError> {
        let rc = self
            .in_flight
            .remove(&request)
            .ok_or(SimError::UnknownRequest(request))?;
        self.kind.on_delivery(&rc, ctl)?;
        ctl.end_session(&rc.session, true);
        Ok(())
    }

    pub(crate) fn topology_changed(&mut self, network: &Network) {
        self.kind.on_topology_change(network);
    }
}

/// Reports the content hops of `rc` then stores copies at its `store` nodes.
pub(crate) fn deliver_content(
    rc: &RequestContext,
    ctl: &mut Controller<'_>,
) -> Result<(), SimError> {
    deliver_with(rc, &rc.store, ctl)
}

/// Same as [`deliver_content`] with copies left at `store` instead.
pub(crate) fn deliver_with(
    rc: &RequestContext,
    store: &[NodeId],
    ctl: &mut Controller<'_>,
) -> Result<(), SimError> {
    let s = &rc.session;
    ctl.forward_content_path(s, &rc.path, true);
    for branch in &rc.branches {
        ctl.forward_content_path(s, branch, false);
    }
    for &v in store {
        ctl.put_content(s, v)?;
    }
    for &v in &rc.store_local {
        ctl.put_content_local(s, v)?;
    }
    Ok(())
}

/// Serves the request straight from its source, starting at `from` after
/// `delay` already spent. Ends the session as failed when the source is out
/// of reach.
pub(crate) fn serve_from_source(
    session: Session,
    from: NodeId,
    delay: SimTime,
    ctl: &mut Controller<'_>,
) -> Result<Option<RequestContext>, SimError> {
    let source = ctl
        .view()
        .content_source(session.content)
        .ok_or(SimError::UnknownContent(session.content))?;
    let Some(path) = ctl.view().shortest_path(from, source) else {
        return Ok(fail(session, source, ctl));
    };
    let delay = delay + ctl.forward_request_path(&session, &path, true);
    if !ctl.get_content(&session, source) {
        return Err(SimError::SourceMiss {
            content: session.content,
            source,
        });
    }
    let mut back: Vec<NodeId> = path.into_iter().rev().collect();
    if from != session.receiver {
        // Content retraces the detour through `from` back to the receiver.
        match ctl.view().shortest_path(from, session.receiver) {
            Some(tail) => back.extend(tail.into_iter().skip(1)),
            None => return Ok(fail(session, session.receiver, ctl)),
        }
    }
    Ok(Some(RequestContext::new(
        session,
        source,
        back,
        delay,
        ctl.view(),
    )))
}

/// Ends a request that cannot be served.
pub(crate) fn fail(
    session: Session,
    unreachable: NodeId,
    ctl: &mut Controller<'_>,
) -> Option<RequestContext> {
    ctl.report_degraded(&session, unreachable);
    ctl.end_session(&session, false);
    None
}

/// Index of the first position where two paths from the same node part ways,
/// i.e. the length of their common prefix.
pub(crate) fn common_prefix(a: &[NodeId], b: &[NodeId]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn default_t_tw() -> f64 {
    10.0
}

fn default_p() -> f64 {
    0.2
}

fn default_max_stretch() -> f64 {
    0.2
}

fn default_replicas() -> u32 {
    hashrouting::DEFAULT_REPLICAS
}

/// Strategy as it appears in a scenario file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyConfig {
    NoCache,
    Lce,
    Lcd,
    ProbCache {
        #[serde(default = "default_t_tw")]
        t_tw: f64,
    },
    RandBernoulli {
        #[serde(default = "default_p")]
        p: f64,
    },
    RandChoice,
    #[serde(rename = "CL4M")]
    Cl4m,
    Edge,
    #[serde(alias = "NRR")]
    NearestReplica {
        #[serde(default)]
        metacaching: Metacaching,
    },
    Hashrouting {
        #[serde(default)]
        routing: HashRouting,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    HrEdgeCache {
        #[serde(default)]
        routing: HashRouting,
        edge_cache_ratio: f64,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    HrHybridAm {
        /// Longest multicast branch, as a share of the network diameter.
        #[serde(default = "default_max_stretch")]
        max_stretch: f64,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    HrHybridSm {
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    HrOnPath {
        #[serde(default)]
        routing: HashRouting,
        on_path_cache_ratio: f64,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
    HrCluster {
        #[serde(default)]
        intra_routing: HashRouting,
        #[serde(default)]
        inter_routing: InterClusterRouting,
        #[serde(default = "default_replicas")]
        replicas: u32,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::Lce
    }
}

impl StrategyConfig {
    /// Share of every cache reserved for uncoordinated local caching.
    pub fn local_cache_ratio(&self) -> Option<f64> {
        match self {
            StrategyConfig::HrEdgeCache {
                edge_cache_ratio, ..
            } => Some(*edge_cache_ratio),
            StrategyConfig::HrOnPath {
                on_path_cache_ratio,
                ..
            } => Some(*on_path_cache_ratio),
            _ => None,
        }
    }

    pub fn build(&self, network: &Network, ctx: &RunContext) -> Result<StrategyKind, ConfigError> {
        let check_probability = |name: &'static str, p: f64| {
            if (0.0..=1.0).contains(&p) {
                Ok(())
            } else {
                Err(ConfigError::invalid(name, format!("{p} is not in [0, 1]")))
            }
        };
        Ok(match *self {
            StrategyConfig::NoCache => StrategyKind::NoCache(NoCache),
            StrategyConfig::Lce => StrategyKind::Lce(LeaveCopyEverywhere),
            StrategyConfig::Lcd => StrategyKind::Lcd(LeaveCopyDown),
            StrategyConfig::ProbCache { t_tw } => {
                if t_tw.is_nan() || t_tw <= 0.0 {
                    return Err(ConfigError::invalid("t_tw", "must be positive"));
                }
                StrategyKind::ProbCache(ProbCache::new(t_tw, ctx))
            }
            StrategyConfig::RandBernoulli { p } => {
                check_probability("p", p)?;
                StrategyKind::RandBernoulli(RandomBernoulli::new(p, ctx))
            }
            StrategyConfig::RandChoice => StrategyKind::RandChoice(RandomChoice::new(ctx)),
            StrategyConfig::Cl4m => StrategyKind::Cl4m(CacheLessForMore::new(network)),
            StrategyConfig::Edge => StrategyKind::Edge(EdgeCaching),
            StrategyConfig::NearestReplica { metacaching } => {
                StrategyKind::NearestReplica(NearestReplica::new(metacaching))
            }
            StrategyConfig::Hashrouting { routing, replicas } => {
                StrategyKind::Hashrouting(Hashrouting::new(network, routing, replicas)?)
            }
            StrategyConfig::HrEdgeCache {
                routing,
                edge_cache_ratio,
                replicas,
            } => {
                check_probability("edge_cache_ratio", edge_cache_ratio)?;
                StrategyKind::HrEdgeCache(HashroutingEdge::new(network, routing, replicas)?)
            }
            StrategyConfig::HrHybridAm {
                max_stretch,
                replicas,
            } => StrategyKind::HrHybridAm(Hashrouting::hybrid_asymm_multicast(
                network,
                max_stretch,
                replicas,
            )?),
            StrategyConfig::HrHybridSm { replicas } => {
                StrategyKind::HrHybridSm(Hashrouting::hybrid_symm_multicast(network, replicas)?)
            }
            StrategyConfig::HrOnPath {
                routing,
                on_path_cache_ratio,
                replicas,
            } => {
                check_probability("on_path_cache_ratio", on_path_cache_ratio)?;
                StrategyKind::HrOnPath(HashroutingOnPath::new(network, routing, replicas)?)
            }
            StrategyConfig::HrCluster {
                intra_routing,
                inter_routing,
                replicas,
            } => StrategyKind::HrCluster(HashroutingClustered::new(
                network,
                intra_routing,
                inter_routing,
                replicas,
            )?),
        })
    }
}

impl FromStr for StrategyConfig {
    type Err = ConfigError;

    /// Strategy with default parameters from its bare name.
    fn from_str(name: &str) -> Result<Self, ConfigError> {
        Ok(match name.to_ascii_uppercase().as_str() {
            "NO_CACHE" => StrategyConfig::NoCache,
            "LCE" => StrategyConfig::Lce,
            "LCD" => StrategyConfig::Lcd,
            "PROB_CACHE" => StrategyConfig::ProbCache {
                t_tw: default_t_tw(),
            },
            "RAND_BERNOULLI" => StrategyConfig::RandBernoulli { p: default_p() },
            "RAND_CHOICE" => StrategyConfig::RandChoice,
            "CL4M" => StrategyConfig::Cl4m,
            "EDGE" => StrategyConfig::Edge,
            "NEAREST_REPLICA" | "NRR" => StrategyConfig::NearestReplica {
                metacaching: Metacaching::default(),
            },
            "HASHROUTING" => StrategyConfig::Hashrouting {
                routing: HashRouting::default(),
                replicas: default_replicas(),
            },
            "HR_HYBRID_AM" => StrategyConfig::HrHybridAm {
                max_stretch: default_max_stretch(),
                replicas: default_replicas(),
            },
            "HR_HYBRID_SM" => StrategyConfig::HrHybridSm {
                replicas: default_replicas(),
            },
            "HR_CLUSTER" => StrategyConfig::HrCluster {
                intra_routing: HashRouting::default(),
                inter_routing: InterClusterRouting::default(),
                replicas: default_replicas(),
            },
            "HR_ON_PATH" => {
                return Err(ConfigError::invalid(
                    "on_path_cache_ratio",
                    "HR_ON_PATH needs an explicit on_path_cache_ratio",
                ))
            }
            "HR_EDGE_CACHE" => {
                return Err(ConfigError::invalid(
                    "edge_cache_ratio",
                    "HR_EDGE_CACHE needs an explicit edge_cache_ratio",
                ))
            }
            _ => return Err(ConfigError::UnknownStrategy(name.to_string())),
        })
    }
}
