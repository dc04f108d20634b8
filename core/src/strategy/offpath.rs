use serde::{Deserialize, Serialize};

use super::{deliver_with, fail, CachingStrategy, RequestContext, Session};
use crate::controller::Controller;
use crate::error::SimError;
use crate::traits::NodeId;

/// Which nodes on the return path keep a copy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metacaching {
    #[default]
    Lce,
    Lcd,
}

/// Ideal nearest replica routing: every node knows where every copy is and
/// the request goes straight to the closest one, source included.
#[derive(Debug)]
pub struct NearestReplica {
    metacaching: Metacaching,
}

impl NearestReplica {
    pub fn new(metacaching: Metacaching) -> Self {
        Self { metacaching }
    }
}

impl CachingStrategy for NearestReplica {
    fn on_request(
        &mut self,
        session: Session,
        ctl: &mut Controller<'_>,
    ) -> Result<Option<RequestContext>, SimError> {
        let view = ctl.view();
        let nearest = view
            .content_locations(session.content)
            .into_iter()
            .filter_map(|v| view.distance(session.receiver, v).map(|d| (d, v)))
            .min();
        let Some((_, replica)) = nearest else {
            let source = view
                .content_source(session.content)
                .ok_or(SimError::UnknownContent(session.content))?;
            return Ok(fail(session, source, ctl));
        };
        let Some(path) = view.shortest_path(session.receiver, replica) else {
            return Ok(fail(session, replica, ctl));
        };
        let delay = ctl.forward_request_path(&session, &path, true);
        if !ctl.get_content(&session, replica) {
            return Err(SimError::SourceMiss {
                content: session.content,
                source: replica,
            });
        }
        let back: Vec<NodeId> = path.into_iter().rev().collect();
        Ok(Some(RequestContext::new(
            session,
            replica,
            back,
            delay,
            ctl.view(),
        )))
    }

    fn on_delivery(&mut self, rc: &RequestContext, ctl: &mut Controller<'_>) -> Result<(), SimError> {
        let view = ctl.view();
        let receiver = rc.session.receiver;
        let candidates = rc
            .path
            .iter()
            .skip(1)
            .copied()
            .filter(|&v| v != receiver && view.has_cache(v));
        let store: Vec<NodeId> = match self.metacaching {
            Metacaching::Lce => candidates
                .filter(|&v| !view.cache_lookup(v, rc.session.content))
                .collect(),
            Metacaching::Lcd => candidates.take(1).collect(),
        };
        deliver_with(rc, &store, ctl)
    }
}
