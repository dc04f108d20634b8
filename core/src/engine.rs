use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::analytics::Collector;
use crate::context::{RunContext, SimClock};
use crate::controller::Controller;
use crate::error::SimError;
use crate::network::{Network, TopologyChange};
use crate::strategy::{Session, Strategy, StrategyKind};
use crate::traits::{ContentId, EventHandler, NodeId, RequestId, SimTime};
use crate::workload::{Request, Workload};

#[derive(Debug, Clone)]
pub struct Event<P> {
    pub time: SimTime,
    pub seq: u64,
    pub payload: P,
}

impl<P> PartialEq for Event<P> {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}
impl<P> Eq for Event<P> {}
impl<P> PartialOrd for Event<P> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<P> Ord for Event<P> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Events processed between two reads of the wall clock.
pub const WALL_CLOCK_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    /// Events after this simulated time are left in the queue.
    pub until: Option<SimTime>,
    pub wall_clock: Option<Duration>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    Horizon,
    WallClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub processed: u64,
    pub stop: StopReason,
}

/// Time-ordered event queue. Equal timestamps pop in insertion order.
#[derive(Debug)]
pub struct Scheduler<P> {
    now: SimTime,
    seq: u64,
    queue: BinaryHeap<Reverse<Event<P>>>,
    clock: SimClock,
}

impl<P> Default for Scheduler<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Scheduler<P> {
    pub fn new() -> Self {
        Self::with_clock(SimClock::default())
    }

    /// Scheduler publishing its time to `clock` on every pop.
    pub fn with_clock(clock: SimClock) -> Self {
        Self {
            now: 0,
            seq: 0,
            queue: BinaryHeap::new(),
            clock,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|e| e.0.time)
    }

    pub fn schedule(&mut self, at: SimTime, payload: P) -> Result<(), SimError> {
        if at < self.now {
            return Err(SimError::Causality { at, now: self.now });
        }
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(Event {
            time: at,
            seq,
            payload,
        }));
        Ok(())
    }

    pub fn schedule_after(&mut self, delay: SimTime, payload: P) -> Result<(), SimError> {
        self.schedule(self.now.saturating_add(delay), payload)
    }

    /// Pops the earliest event and hands it to `handler`. Returns `false` when
    /// the queue is empty.
    pub fn step<H>(&mut self, handler: &mut H) -> Result<bool, SimError>
    where
        H: EventHandler<Payload = P> + ?Sized,
    {
        let Some(Reverse(event)) = self.queue.pop() else {
            return Ok(false);
        };
        self.now = event.time;
        self.clock.set(event.time);
        handler.handle(event, self)?;
        Ok(true)
    }

    pub fn run<H>(&mut self, handler: &mut H, limits: RunLimits) -> Result<RunOutcome, SimError>
    where
        H: EventHandler<Payload = P> + ?Sized,
    {
        let started = Instant::now();
        let mut processed = 0;
        loop {
            let Some(next) = self.peek_time() else {
                return Ok(RunOutcome {
                    processed,
                    stop: StopReason::Exhausted,
                });
            };
            if limits.until.is_some_and(|until| next > until) {
                return Ok(RunOutcome {
                    processed,
                    stop: StopReason::Horizon,
                });
            }
            let over_budget = processed % WALL_CLOCK_CHECK_INTERVAL == 0
                && limits
                    .wall_clock
                    .is_some_and(|budget| started.elapsed() >= budget);
            if over_budget {
                return Ok(RunOutcome {
                    processed,
                    stop: StopReason::WallClock,
                });
            }
            self.step(handler)?;
            processed += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    RequestArrival {
        id: RequestId,
        request: Request,
        log: bool,
    },
    ContentDelivery {
        request: RequestId,
    },
    /// Proactive TTL expiry check.
    Expire {
        node: NodeId,
        content: ContentId,
    },
    Topology(TopologyChange),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub processed_events: u64,
    pub requests: u64,
    pub end_time: SimTime,
    pub stop: StopReason,
    pub warnings: Vec<String>,
}

/// One simulation run: topology, caches, strategy and workload.
///
/// Workload requests are pulled lazily: at any time exactly one future
/// request sits in the queue, so an unbounded workload costs constant memory.
pub struct Simulation {
    scheduler: Scheduler<SimEvent>,
    network: Network,
    strategy: Strategy,
    workload: Workload,
    ctx: RunContext,
    warmup: u64,
    next_id: RequestId,
    requests: u64,
    primed: bool,
}

impl Simulation {
    pub fn new(
        network: Network,
        strategy: StrategyKind,
        workload: Workload,
        ctx: RunContext,
    ) -> Self {
        Self {
            scheduler: Scheduler::with_clock(ctx.clock().clone()),
            network,
            strategy: Strategy::new(strategy),
            workload,
            ctx,
            warmup: 0,
            next_id: 0,
            requests: 0,
            primed: false,
        }
    }

    /// The first `warmup` requests fill the caches without being reported.
    pub fn with_warmup(mut self, warmup: u64) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn schedule_topology_change(
        &mut self,
        at: SimTime,
        change: TopologyChange,
    ) -> Result<(), SimError> {
        self.scheduler.schedule(at, SimEvent::Topology(change))
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn strategy(&self) -> &StrategyKind {
        self.strategy.kind()
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// Requests currently between arrival and delivery.
    pub fn in_flight(&self) -> usize {
        self.strategy.in_flight()
    }

    /// Runs until the queue drains or a limit is hit. Can be called again to
    /// resume a run stopped by a limit.
    pub fn run(
        &mut self,
        collector: &mut dyn Collector,
        limits: RunLimits,
    ) -> Result<RunReport, SimError> {
        if !self.primed {
            self.primed = true;
            info!(
                "starting run: seed {}, strategy {}, {} cache nodes",
                self.ctx.seed(),
                self.strategy.kind().name(),
                self.network.cache_nodes().len()
            );
            if let Some(first) = self.workload.next() {
                let event = self.arrival(first);
                self.scheduler.schedule(first.time, event)?;
            }
        }

        let Simulation {
            scheduler,
            network,
            strategy,
            workload,
            ctx,
            warmup,
            next_id,
            requests,
            ..
        } = self;
        let mut dispatcher = Dispatcher {
            network,
            strategy,
            workload,
            ctx,
            collector,
            warmup: *warmup,
            next_id,
            requests,
        };
        let outcome = scheduler.run(&mut dispatcher, limits)?;

        let mut warnings = Vec::new();
        match outcome.stop {
            StopReason::Exhausted => {
                if let Some(until) = limits.until.filter(|&u| self.scheduler.now() < u) {
                    let msg = format!(
                        "event queue exhausted at {} before horizon {}",
                        self.scheduler.now(),
                        until
                    );
                    warn!("{msg}");
                    warnings.push(msg);
                }
            }
            StopReason::WallClock => {
                let msg = format!(
                    "wall-clock budget exhausted at simulated time {}",
                    self.scheduler.now()
                );
                warn!("{msg}");
                warnings.push(msg);
            }
            StopReason::Horizon => {}
        }
        info!(
            "run stopped ({:?}) after {} events, {} requests",
            outcome.stop, outcome.processed, self.requests
        );
        Ok(RunReport {
            processed_events: outcome.processed,
            requests: self.requests,
            end_time: self.scheduler.now(),
            stop: outcome.stop,
            warnings,
        })
    }

    fn arrival(&mut self, request: Request) -> SimEvent {
        let id = self.next_id;
        self.next_id += 1;
        SimEvent::RequestArrival {
            id,
            request,
            log: id >= self.warmup,
        }
    }
}

/// Borrows the pieces of a [`Simulation`] the scheduler loop dispatches to.
struct Dispatcher<'a> {
    network: &'a mut Network,
    strategy: &'a mut Strategy,
    workload: &'a mut Workload,
    ctx: &'a RunContext,
    collector: &'a mut dyn Collector,
    warmup: u64,
    next_id: &'a mut RequestId,
    requests: &'a mut u64,
}

impl EventHandler for Dispatcher<'_> {
    type Payload = SimEvent;

    fn handle(
        &mut self,
        event: Event<SimEvent>,
        scheduler: &mut Scheduler<SimEvent>,
    ) -> Result<(), SimError> {
        match event.payload {
            SimEvent::RequestArrival { id, request, log } => {
                *self.requests += 1;
                self.ctx.cursor().set(id);
                let session = Session {
                    id,
                    receiver: request.receiver,
                    content: request.content,
                    start: event.time,
                    log,
                };
                let mut ctl = Controller::new(self.network, self.collector, scheduler);
                self.strategy.request(session, &mut ctl)?;
                // Keep exactly one future request queued. It is queued after
                // this request's own events so that a delivery due at the
                // same instant runs first.
                if let Some(next) = self.workload.next() {
                    let next_id = *self.next_id;
                    *self.next_id += 1;
                    scheduler.schedule(
                        next.time,
                        SimEvent::RequestArrival {
                            id: next_id,
                            request: next,
                            log: next_id >= self.warmup,
                        },
                    )?;
                }
                Ok(())
            }
            SimEvent::ContentDelivery { request } => {
                let mut ctl = Controller::new(self.network, self.collector, scheduler);
                self.strategy.deliver(request, &mut ctl)
            }
            SimEvent::Expire { node, content } => {
                let purged = self.network.purge_expired(node, event.time);
                if !purged.is_empty() {
                    debug!("node {node}: expired {purged:?} (trigger {content})");
                }
                Ok(())
            }
            SimEvent::Topology(change) => {
                if self.network.apply(change) {
                    self.strategy.topology_changed(self.network);
                }
                Ok(())
            }
        }
    }
}
