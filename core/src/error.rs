use thiserror::Error;

use crate::traits::{ContentId, NodeId, RequestId, SimTime};

/// Problems detected while building a run. Nothing has been simulated yet when
/// one of these is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown cache policy `{0}`")]
    UnknownPolicy(String),
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),
    #[error("cache at node {node} has capacity 0")]
    ZeroCapacity { node: NodeId },
    #[error("duplicate node {0}")]
    DuplicateNode(NodeId),
    #[error("edge ({from}, {to}) references unknown node {missing}")]
    UnknownEdgeEndpoint {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {node} is a {role}, expected a {expected}")]
    WrongRole {
        node: NodeId,
        role: &'static str,
        expected: &'static str,
    },
    #[error("topology has no content source")]
    NoSource,
    #[error("content {content} is assigned to more than one source")]
    ContentConflict { content: ContentId },
    #[error("receiver {0} has no path to any source")]
    UnreachableReceiver(NodeId),
    #[error("receiver {0} cannot reach any cache")]
    NoEdgeCache(NodeId),
    #[error("strategy requires at least one cache node")]
    NoCacheNodes,
    #[error("collector {0} is configured more than once")]
    DuplicateCollector(&'static str),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("the MIN policy needs a next-reference index built from the workload")]
    MissingTrace,
    #[error("malformed scenario: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Failures that abort a run in progress. Metrics gathered before the failure
/// stay valid.
#[derive(Debug)]
pub enum SimError {
    Causality { at: SimTime, now: SimTime },
    UnknownReceiver { request: RequestId, receiver: NodeId },
    UnknownContent(ContentId),
    SourceMiss { content: ContentId, source: NodeId },
    UnknownRequest(RequestId),
    Routing { request: RequestId, reason: String },
}

// Written by hand rather than derived: thiserror would treat the `source`
// field of `SourceMiss` as the underlying error cause.
impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::Causality { at, now } => {
                write!(f, "event scheduled at {at} but the clock is already at {now}")
            }
            SimError::UnknownReceiver { request, receiver } => {
                write!(f, "request {request} comes from unknown receiver {receiver}")
            }
            SimError::UnknownContent(c) => write!(f, "no source stores content {c}"),
            SimError::SourceMiss { content, source } => {
                write!(f, "content {content} not found at its source {source}")
            }
            SimError::UnknownRequest(r) => {
                write!(f, "delivery for request {r} which is not in flight")
            }
            SimError::Routing { request, reason } => write!(
                f,
                "request {request} dispatched to a strategy that cannot route it: {reason}"
            ),
        }
    }
}

impl std::error::Error for SimError {}
