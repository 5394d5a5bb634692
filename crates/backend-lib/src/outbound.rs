// ============================
// classroom-backend-lib/src/outbound.rs
// ============================
//! Broadcast / notification fan-out.
//!
//! Handlers resolve recipients eagerly (a room may be gone by the time the
//! frames are flushed, e.g. after end-class) and return [`Outbound`] values;
//! the coordinator stamps each with the server clock and pushes it down the
//! per-connection queues. Delivery is fire-and-forget, at-most-once: a full
//! or closed queue drops the frame for that receiver only.

use chrono::Utc;
use classroom_common::{ConnectionId, Envelope, ServerEvent};
use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::{FANOUT_DELIVERED, FANOUT_DROPPED, REJECTED_UNAUTHORIZED};
use crate::persist::PersistOp;

/// One event addressed to a resolved set of connections.
#[derive(Debug)]
pub struct Outbound {
    pub recipients: Vec<ConnectionId>,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn single(recipient: ConnectionId, event: ServerEvent) -> Self {
        Self {
            recipients: vec![recipient],
            event,
        }
    }

    pub fn to_all(recipients: Vec<ConnectionId>, event: ServerEvent) -> Self {
        Self { recipients, event }
    }
}

/// Why a handler refused an event without surfacing anything on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A non-instructor issued an instructor-only action. Wire-silent,
    /// observable here and in the logs.
    Unauthorized { event: &'static str },
}

impl Rejection {
    pub fn unauthorized(event: &'static str) -> Self {
        warn!(event, "rejected: unauthorized");
        counter!(REJECTED_UNAUTHORIZED).increment(1);
        Rejection::Unauthorized { event }
    }
}

/// Everything a handler produced for one inbound event: frames to deliver,
/// durable updates to apply out-of-band, and an optional internal rejection
/// signal.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub outbound: Vec<Outbound>,
    pub persist: Vec<PersistOp>,
    pub rejection: Option<Rejection>,
}

impl Dispatched {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            rejection: Some(rejection),
            ..Self::default()
        }
    }

    pub fn send(outbound: Vec<Outbound>) -> Self {
        Self {
            outbound,
            ..Self::default()
        }
    }

    pub fn with_persist(mut self, op: PersistOp) -> Self {
        self.persist.push(op);
        self
    }
}

/// Stamp and push one event to every resolved recipient that still has a
/// live link. Unknown connections and saturated queues are silent drops.
pub fn deliver(
    links: &std::collections::HashMap<ConnectionId, tokio::sync::mpsc::Sender<Envelope>>,
    outbound: &Outbound,
) {
    let envelope = Envelope {
        sent_at: Utc::now(),
        event: outbound.event.clone(),
    };

    for recipient in &outbound.recipients {
        let Some(tx) = links.get(recipient) else {
            debug!(%recipient, "dropping frame for unknown connection");
            counter!(FANOUT_DROPPED).increment(1);
            continue;
        };

        match tx.try_send(envelope.clone()) {
            Ok(()) => {
                counter!(FANOUT_DELIVERED).increment(1);
            },
            Err(err) => {
                warn!(%recipient, %err, "dropping frame for slow or closed connection");
                counter!(FANOUT_DROPPED).increment(1);
            },
        }
    }
}
