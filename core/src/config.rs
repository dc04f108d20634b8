//! Scenario files: one JSON document describing a complete run.

use std::collections::BTreeSet;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::analytics::{CollectorConfig, CollectorSet};
use crate::cache::{AdmissionConfig, CacheSpec, PolicyConfig};
use crate::context::RunContext;
use crate::engine::{RunLimits, Simulation};
use crate::error::ConfigError;
use crate::network::{LinkKind, Network, NodeRole, TopologyChange};
use crate::strategy::StrategyConfig;
use crate::traits::{ClusterId, ContentId, NodeId, SimTime};
use crate::workload::{NextReferenceIndex, Request, Workload};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub id: NodeId,
    pub role: NodeRole,
    /// Routers only. Turns the router into a cache-router.
    #[serde(default)]
    pub cache_size: Option<usize>,
    /// Overrides the scenario-wide policy for this node.
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
    /// Sources only. Contents pinned to this source.
    #[serde(default)]
    pub contents: Vec<ContentId>,
    /// Required by HR_CLUSTER.
    #[serde(default)]
    pub cluster: Option<ClusterId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EdgeConfig {
    pub from: NodeId,
    pub to: NodeId,
    pub delay_us: SimTime,
    /// Delay from `to` back to `from` when it differs.
    #[serde(default)]
    pub reverse_delay_us: Option<SimTime>,
    #[serde(default)]
    pub kind: LinkKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TopologyConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

/// Policy and admission filter shared by every cache without an override.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CacheDefaults {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChange {
    pub time: SimTime,
    pub change: TopologyChange,
}

fn default_collectors() -> Vec<CollectorConfig> {
    vec![
        CollectorConfig::CacheHitRatio {
            per_node: true,
            per_content: false,
        },
        CollectorConfig::Latency { samples: false },
    ]
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub seed: u64,
    pub topology: TopologyConfig,
    #[serde(default)]
    pub cache: CacheDefaults,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default = "default_collectors")]
    pub collectors: Vec<CollectorConfig>,
    #[serde(default)]
    pub workload: Vec<Request>,
    #[serde(default)]
    pub topology_changes: Vec<ScheduledChange>,
    /// Requests processed but not reported.
    #[serde(default)]
    pub warmup: u64,
    /// Simulated-time horizon in microseconds.
    #[serde(default)]
    pub until: Option<SimTime>,
    #[serde(default)]
    pub wall_clock_secs: Option<f64>,
}

impl ScenarioConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            until: self.until,
            wall_clock: self
                .wall_clock_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }

    fn needs_trace(&self) -> bool {
        self.cache.policy.needs_trace()
            || self
                .topology
                .nodes
                .iter()
                .filter_map(|n| n.policy.as_ref())
                .any(PolicyConfig::needs_trace)
    }

    /// Validates the whole scenario and wires up a ready-to-run simulation
    /// with its collectors.
    pub fn build(&self) -> Result<(Simulation, CollectorSet), ConfigError> {
        if let Some(secs) = self.wall_clock_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::invalid(
                    "wall_clock_secs",
                    format!("{secs} is not a valid duration"),
                ));
            }
        }

        let mut ctx = RunContext::new(self.seed);
        if self.needs_trace() {
            debug!("indexing {} requests for MIN", self.workload.len());
            ctx = ctx.with_next_references(NextReferenceIndex::build(&self.workload));
        }

        let network = self.build_network(&ctx)?;
        for receiver in network.receivers() {
            let reachable = network
                .sources()
                .iter()
                .any(|&s| network.shortest_path(receiver, s).is_some());
            if !reachable {
                return Err(ConfigError::UnreachableReceiver(receiver));
            }
        }

        let strategy = self.strategy.build(&network, &ctx)?;
        let mut collectors = CollectorSet::new();
        let mut names = BTreeSet::new();
        for collector in &self.collectors {
            // Results are keyed by name.
            if !names.insert(collector.name()) {
                return Err(ConfigError::DuplicateCollector(collector.name()));
            }
            collectors.push(collector.build(&network)?);
        }

        for scheduled in &self.topology_changes {
            check_change(&network, scheduled.change)?;
        }
        let workload: Workload = Box::new(self.workload.clone().into_iter());
        let mut sim = Simulation::new(network, strategy, workload, ctx).with_warmup(self.warmup);
        for scheduled in &self.topology_changes {
            sim.schedule_topology_change(scheduled.time, scheduled.change)
                .map_err(|e| ConfigError::invalid("topology_changes", e.to_string()))?;
        }
        Ok((sim, collectors))
    }

    fn build_network(&self, ctx: &RunContext) -> Result<Network, ConfigError> {
        let mut builder = Network::builder();
        for node in &self.topology.nodes {
            builder.node(node.id, node.role)?;
            if let Some(cluster) = node.cluster {
                builder.cluster(node.id, cluster)?;
            }
        }
        for node in &self.topology.nodes {
            if let Some(capacity) = node.cache_size {
                let policy = node.policy.clone().unwrap_or_else(|| self.cache.policy.clone());
                let spec = CacheSpec::new(capacity, policy).with_admission(self.cache.admission.clone());
                builder.cache(node.id, spec)?;
            }
            if !node.contents.is_empty() {
                builder.contents(node.id, node.contents.iter().copied())?;
            }
        }
        for edge in &self.topology.edges {
            builder.link(
                edge.from,
                edge.to,
                edge.delay_us,
                edge.reverse_delay_us,
                edge.kind,
            )?;
        }
        if let Some(ratio) = self.strategy.local_cache_ratio() {
            builder.reserve_local_caches(ratio)?;
        }
        builder.build(ctx)
    }
}

fn check_change(network: &Network, change: TopologyChange) -> Result<(), ConfigError> {
    match change {
        TopologyChange::RemoveNode { node } | TopologyChange::RestoreNode { node } => {
            if network.role(node).is_none() {
                return Err(ConfigError::UnknownNode(node));
            }
        }
        TopologyChange::RemoveLink { a, b } | TopologyChange::RestoreLink { a, b } => {
            if network.link_kind(a, b).is_none() {
                let missing = if network.role(a).is_none() { a } else { b };
                return Err(ConfigError::UnknownEdgeEndpoint {
                    from: a,
                    to: b,
                    missing,
                });
            }
        }
    }
    Ok(())
}
