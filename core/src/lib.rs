pub mod analytics;
pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod network;
pub mod strategy;
pub mod traits;
pub mod workload;

pub use analytics::{Collector, CollectorConfig, CollectorSet};
pub use cache::{AdmissionConfig, Cache, CacheSpec, PolicyConfig};
pub use config::ScenarioConfig;
pub use context::RunContext;
pub use engine::{RunLimits, RunReport, Scheduler, SimEvent, Simulation, StopReason};
pub use error::{ConfigError, SimError};
pub use network::{LinkKind, Network, NetworkBuilder, NodeRole, TopologyChange};
pub use strategy::{StrategyConfig, StrategyKind};
pub use traits::{ClusterId, ContentId, EventHandler, NodeId, RequestId, SimTime};
pub use workload::{NextReferenceIndex, Request, Workload};

/// Microseconds per millisecond, the unit link delays are usually quoted in.
pub const MS: SimTime = 1_000;
