//! Fan-out of edit deltas to the other members of a session.
//!
//! Every connection owns a bounded outbox. A relay encodes the
//! `receive-changes` frame once and offers it to each peer with `try_send`,
//! so a slow or vanished peer never stalls delivery to the rest.
//!
//! Delivery is at-most-once: no acknowledgement, no retry, nothing kept for
//! later. A peer whose outbox is full loses that delta.

use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{Payload, ProtocolError, ServerMessage};
use crate::session::{ConnectionId, SessionRegistry};

/// Outcome of offering one frame to one outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Outbox at capacity; the frame was dropped for this peer.
    Full,
    /// The connection's writer is gone.
    Closed,
    /// No outbox is attached for this connection.
    Unknown,
}

/// Per-call fan-out summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Outboxes of every live connection.
pub struct DeltaRelay {
    outboxes: HashMap<ConnectionId, mpsc::Sender<Message>>,
    capacity: usize,
}

impl DeltaRelay {
    /// `capacity` is the number of frames buffered per connection before
    /// further frames to it are dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            outboxes: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Create the outbox for a newly connected socket.
    pub fn attach(&mut self, conn: ConnectionId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outboxes.insert(conn, tx);
        rx
    }

    pub fn detach(&mut self, conn: ConnectionId) -> bool {
        self.outboxes.remove(&conn).is_some()
    }

    pub fn is_attached(&self, conn: ConnectionId) -> bool {
        self.outboxes.contains_key(&conn)
    }

    /// A sender into `conn`'s outbox, for callers that must wait for space.
    pub fn outbox(&self, conn: ConnectionId) -> Option<mpsc::Sender<Message>> {
        self.outboxes.get(&conn).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offer a frame to a single connection without waiting.
    pub fn send_to(&self, conn: ConnectionId, frame: Message) -> Delivery {
        let Some(outbox) = self.outboxes.get(&conn) else {
            return Delivery::Unknown;
        };
        match outbox.try_send(frame) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Deliver `delta` to every member of `from`'s session except `from`.
    ///
    /// Without a session this does nothing. Peers are offered the frame in
    /// call order, so with calls serialized by the caller every peer sees
    /// deltas in the order they arrived.
    pub fn relay(
        &self,
        registry: &SessionRegistry,
        from: ConnectionId,
        delta: &Payload,
    ) -> Result<RelayReport, ProtocolError> {
        let mut report = RelayReport::default();
        let mut peers = registry.peers_of(from).peekable();
        if peers.peek().is_none() {
            return Ok(report);
        }

        let frame = Message::Text(ServerMessage::ReceiveChanges(delta.clone()).encode()?.into());
        for peer in peers {
            match self.send_to(peer, frame.clone()) {
                Delivery::Sent => report.delivered += 1,
                failed => {
                    report.dropped += 1;
                    log::warn!("Dropped delta from {from} to {peer}: {failed:?}");
                }
            }
        }
        Ok(report)
    }
}
