use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::traits::{ContentId, NodeId, SimTime};

/// One entry of the workload: `receiver` asks for `content` at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub time: SimTime,
    pub receiver: NodeId,
    pub content: ContentId,
}

impl Request {
    pub fn new(time: SimTime, receiver: NodeId, content: ContentId) -> Self {
        Self {
            time,
            receiver,
            content,
        }
    }
}

/// Boxed, possibly unbounded stream of requests in non-decreasing time order.
pub type Workload = Box<dyn Iterator<Item = Request> + Send>;

/// Position of every reference to every content in a finite trace.
///
/// Built by a separate pass over the whole workload before the run starts.
/// This is the only piece of non-causal information in the simulator and it
/// is only handed to the MIN policy.
#[derive(Debug, Clone, Default)]
pub struct NextReferenceIndex {
    positions: HashMap<ContentId, Vec<u64>>,
}

impl NextReferenceIndex {
    pub fn build<'a>(trace: impl IntoIterator<Item = &'a Request>) -> Self {
        Self::from_contents(trace.into_iter().map(|r| r.content))
    }

    pub fn from_contents(contents: impl IntoIterator<Item = ContentId>) -> Self {
        let mut positions: HashMap<ContentId, Vec<u64>> = HashMap::new();
        for (i, content) in contents.into_iter().enumerate() {
            positions.entry(content).or_default().push(i as u64);
        }
        Self { positions }
    }

    /// First reference to `content` strictly after `position`, `u64::MAX` if
    /// it is never requested again.
    pub fn next_after(&self, content: ContentId, position: u64) -> u64 {
        let Some(refs) = self.positions.get(&content) else {
            return u64::MAX;
        };
        let idx = refs.partition_point(|&p| p <= position);
        refs.get(idx).copied().unwrap_or(u64::MAX)
    }

    pub fn len(&self) -> usize {
        self.positions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
