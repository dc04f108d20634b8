use crate::engine::{Event, Scheduler};
use crate::error::SimError;

pub type NodeId = u32;
pub type ContentId = u64;
pub type RequestId = u64;
pub type ClusterId = u32;

/// Simulated time in microseconds.
pub type SimTime = u64;

/// Anything the scheduler can dispatch events to.
///
/// The scheduler knows nothing about caches, strategies or topology: it pops
/// the earliest event and hands it over together with a handle to itself so
/// the handler can schedule follow-ups.
pub trait EventHandler {
    type Payload;

    fn handle(
        &mut self,
        event: Event<Self::Payload>,
        scheduler: &mut Scheduler<Self::Payload>,
    ) -> Result<(), SimError>;
}
