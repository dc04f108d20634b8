use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::traits::{NodeId, SimTime};
use crate::workload::NextReferenceIndex;

/// Shared view of the current simulated time. The scheduler writes it, time
/// aware policies read it.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn now(&self) -> SimTime {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, time: SimTime) {
        self.0.store(time, Ordering::Relaxed);
    }
}

/// Ordinal of the workload request currently being handled.
#[derive(Debug, Clone, Default)]
pub struct TraceCursor(Arc<AtomicU64>);

impl TraceCursor {
    pub fn position(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, position: u64) {
        self.0.store(position, Ordering::Relaxed);
    }
}

/// Per-run state handed to every component at construction.
///
/// Nothing in here is shared between runs: build a fresh context for each
/// run and independent runs can execute on separate threads without locking.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    seed: u64,
    clock: SimClock,
    cursor: TraceCursor,
    next_refs: Option<Arc<NextReferenceIndex>>,
}

impl RunContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    /// Attach the offline next-reference index. Only the MIN policy reads it.
    pub fn with_next_references(mut self, index: NextReferenceIndex) -> Self {
        self.next_refs = Some(Arc::new(index));
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed for a component attached to `node`, stable across runs.
    pub fn node_seed(&self, node: NodeId, salt: u64) -> u64 {
        self.seed_for(salt) ^ (node as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Seed for a run-wide component such as a strategy.
    pub fn seed_for(&self, salt: u64) -> u64 {
        self.seed ^ salt.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn cursor(&self) -> &TraceCursor {
        &self.cursor
    }

    pub fn next_references(&self) -> Option<&Arc<NextReferenceIndex>> {
        self.next_refs.as_ref()
    }
}
