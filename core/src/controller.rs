use log::{debug, warn};

use crate::analytics::{Collector, Hop, SessionStart};
use crate::engine::{Scheduler, SimEvent};
use crate::error::SimError;
use crate::network::{Network, NodeRole};
use crate::strategy::Session;
use crate::traits::{NodeId, SimTime};

/// Everything a strategy may do while handling one event.
///
/// Strategies read the topology through [`Controller::view`] and change state
/// only through the methods below, which keep the collector informed. Nothing
/// is reported for sessions with `log == false` (warm-up requests).
pub struct Controller<'a> {
    network: &'a mut Network,
    collector: &'a mut dyn Collector,
    scheduler: &'a mut Scheduler<SimEvent>,
}

impl<'a> Controller<'a> {
    pub fn new(
        network: &'a mut Network,
        collector: &'a mut dyn Collector,
        scheduler: &'a mut Scheduler<SimEvent>,
    ) -> Self {
        Self {
            network,
            collector,
            scheduler,
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn view(&self) -> &Network {
        self.network
    }

    pub fn schedule_after(&mut self, delay: SimTime, event: SimEvent) -> Result<(), SimError> {
        self.scheduler.schedule_after(delay, event)
    }

    pub fn start_session(&mut self, s: &Session) {
        if !s.log {
            return;
        }
        let source = self.network.content_source(s.content);
        let shortest_hops = source
            .and_then(|src| self.network.shortest_path(s.receiver, src))
            .map(|p| p.len() - 1);
        self.collector.start_session(&SessionStart {
            request: s.id,
            time: s.start,
            receiver: s.receiver,
            content: s.content,
            source,
            shortest_hops,
        });
    }

    fn hop(&self, s: &Session, from: NodeId, to: NodeId, main_path: bool) -> Hop {
        Hop {
            request: s.id,
            from,
            to,
            delay: self.network.link_delay(from, to).unwrap_or(0),
            main_path,
        }
    }

    /// Returns the delay of the hop.
    pub fn forward_request_hop(
        &mut self,
        s: &Session,
        from: NodeId,
        to: NodeId,
        main_path: bool,
    ) -> SimTime {
        let hop = self.hop(s, from, to, main_path);
        if s.log {
            self.collector.request_hop(&hop);
        }
        hop.delay
    }

    pub fn forward_request_path(&mut self, s: &Session, path: &[NodeId], main_path: bool) -> SimTime {
        path.windows(2)
            .map(|w| self.forward_request_hop(s, w[0], w[1], main_path))
            .sum()
    }

    pub fn forward_content_hop(
        &mut self,
        s: &Session,
        from: NodeId,
        to: NodeId,
        main_path: bool,
    ) -> SimTime {
        let hop = self.hop(s, from, to, main_path);
        if s.log {
            self.collector.content_hop(&hop);
        }
        hop.delay
    }

    pub fn forward_content_path(&mut self, s: &Session, path: &[NodeId], main_path: bool) -> SimTime {
        path.windows(2)
            .map(|w| self.forward_content_hop(s, w[0], w[1], main_path))
            .sum()
    }

    /// Looks the session's content up at `node`: in its cache for a
    /// cache-router, by responsibility for a source. A node that is down has
    /// nothing.
    pub fn get_content(&mut self, s: &Session, node: NodeId) -> bool {
        if let Some(cache) = self.network.cache_mut(node) {
            let hit = cache.get(s.content);
            if s.log {
                if hit {
                    self.collector.cache_hit(s.id, node);
                } else {
                    self.collector.cache_miss(s.id, node);
                }
            }
            return hit;
        }
        let is_source = self.network.is_up(node)
            && self.network.role(node) == Some(NodeRole::Source)
            && self.network.content_source(s.content) == Some(node);
        if is_source && s.log {
            self.collector.server_hit(s.id, node);
        }
        is_source
    }

    /// Like [`Controller::get_content`] against the local partition of
    /// `node`. A miss is not reported: the request continues to the
    /// coordinated cache.
    pub fn get_content_local(&mut self, s: &Session, node: NodeId) -> bool {
        let hit = self
            .network
            .local_cache_mut(node)
            .is_some_and(|c| c.get(s.content));
        if hit && s.log {
            self.collector.cache_hit(s.id, node);
        }
        hit
    }

    /// Offers the session's content to the cache of `node`. Returns whether
    /// it is resident afterwards.
    pub fn put_content(&mut self, s: &Session, node: NodeId) -> Result<bool, SimError> {
        self.store(s, node, false)
    }

    pub fn put_content_local(&mut self, s: &Session, node: NodeId) -> Result<bool, SimError> {
        self.store(s, node, true)
    }

    fn store(&mut self, s: &Session, node: NodeId, local: bool) -> Result<bool, SimError> {
        let cache = if local {
            self.network.local_cache_mut(node)
        } else {
            self.network.cache_mut(node)
        };
        let Some(cache) = cache else {
            return Ok(false);
        };
        let evicted = cache.put(s.content);
        if !cache.has(s.content) {
            return Ok(false);
        }
        let expiry = cache
            .wants_expiry_events()
            .then(|| cache.expiry_of(s.content))
            .flatten();
        if s.log {
            self.collector.content_stored(node, s.content, evicted);
        }
        if let Some(at) = expiry {
            self.scheduler.schedule(
                at,
                SimEvent::Expire {
                    node,
                    content: s.content,
                },
            )?;
        }
        Ok(true)
    }

    pub fn report_degraded(&mut self, s: &Session, unreachable: NodeId) {
        warn!(
            "request {}: node {} unreachable, falling back",
            s.id, unreachable
        );
        if s.log {
            self.collector.degraded_path(s.id, unreachable);
        }
    }

    pub fn end_session(&mut self, s: &Session, success: bool) {
        debug!(
            "request {} ({} -> content {}) done at {}, success {}",
            s.id,
            s.receiver,
            s.content,
            self.scheduler.now(),
            success
        );
        if s.log {
            self.collector.end_session(s.id, self.scheduler.now(), success);
        }
    }
}
