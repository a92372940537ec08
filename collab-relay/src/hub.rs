//! The per-process collaboration hub.
//!
//! ```text
//!  connection tasks ──► Hub ─┬─ Mutex<HubState> ─┬─ SessionRegistry
//!                            │                   └─ DeltaRelay (outboxes)
//!                            └─ SnapshotPersister ── DocumentStore
//! ```
//!
//! Registry and relay state sit behind one lock, which is the single point
//! of serialization for `join`, `leave` and `relay`. Storage calls run with
//! the lock released, so a slow store never blocks other sessions.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::persist::SnapshotPersister;
use crate::protocol::{Payload, ProtocolError, ServerMessage};
use crate::relay::{DeltaRelay, RelayReport};
use crate::session::{ConnectionId, DocumentId, JoinOutcome, SessionRegistry};
use crate::storage::{DocumentMetadata, DocumentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result of a `get-document` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Missing or empty identifier; nothing was loaded or created.
    Ignored,
    /// The connection went away while the document was loading.
    Discarded,
    /// Joined the session; `load-document` is queued for the connection.
    Opened { join: JoinOutcome },
}

struct HubState {
    registry: SessionRegistry,
    relay: DeltaRelay,
}

pub struct Hub {
    state: Mutex<HubState>,
    persister: SnapshotPersister,
}

impl Hub {
    pub fn new(store: Arc<dyn DocumentStore>, outbox_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState {
                registry: SessionRegistry::new(),
                relay: DeltaRelay::new(outbox_capacity),
            }),
            persister: SnapshotPersister::new(store),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.persister.store()
    }

    /// Register a new socket. The receiver is its outbox.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Message>) {
        let conn = ConnectionId::new();
        let outbox = self.state.lock().await.relay.attach(conn);
        (conn, outbox)
    }

    /// Tear down a socket: leave its session and drop its outbox.
    pub async fn disconnect(&self, conn: ConnectionId) -> Option<DocumentId> {
        let mut state = self.state.lock().await;
        state.relay.detach(conn);
        state.registry.leave(conn)
    }

    /// Handle `get-document`: load-or-create, join, then queue
    /// `load-document` for this connection.
    pub async fn open_document(
        &self,
        conn: ConnectionId,
        doc_id: Option<&str>,
    ) -> Result<OpenOutcome, HubError> {
        let Some(doc_id) = doc_id.filter(|id| !id.is_empty()) else {
            return Ok(OpenOutcome::Ignored);
        };

        let document = self.persister.load_or_create(doc_id).await?;
        let frame = ServerMessage::LoadDocument(Payload::from_bytes(document.content)?).encode()?;

        let Some(outbox) = self.state.lock().await.relay.outbox(conn) else {
            log::debug!("Connection {conn} closed before {doc_id} loaded; result discarded");
            return Ok(OpenOutcome::Discarded);
        };
        // Unlike deltas, load-document is never dropped: wait for a slot,
        // with the hub unlocked so the relay keeps running meanwhile.
        let Ok(permit) = outbox.reserve().await else {
            log::debug!("Connection {conn} closed before {doc_id} loaded; result discarded");
            return Ok(OpenOutcome::Discarded);
        };

        let mut state = self.state.lock().await;
        if !state.relay.is_attached(conn) {
            log::debug!("Connection {conn} closed before {doc_id} loaded; result discarded");
            return Ok(OpenOutcome::Discarded);
        }

        let join = state.registry.join(conn, doc_id);
        // Queued under the same lock as the join, so it precedes any delta.
        permit.send(Message::Text(frame.into()));
        match &join {
            JoinOutcome::Joined => log::info!("Connection {conn} joined {doc_id}"),
            JoinOutcome::AlreadyJoined => log::debug!("Connection {conn} re-requested {doc_id}"),
            JoinOutcome::Moved { previous } => {
                log::info!("Connection {conn} moved from {previous} to {doc_id}")
            }
        }
        Ok(OpenOutcome::Opened { join })
    }

    /// Handle `send-changes`.
    pub async fn relay(
        &self,
        conn: ConnectionId,
        delta: &Payload,
    ) -> Result<RelayReport, ProtocolError> {
        let state = self.state.lock().await;
        state.relay.relay(&state.registry, conn, delta)
    }

    /// Handle `save-document`. `Ok(None)` when the connection has no session.
    pub async fn persist(
        &self,
        conn: ConnectionId,
        content: &Payload,
    ) -> Result<Option<DocumentMetadata>, StoreError> {
        let doc_id = {
            let state = self.state.lock().await;
            state.registry.session_of(conn).map(str::to_owned)
        };
        self.persister.persist(doc_id.as_deref(), content).await
    }

    pub async fn session_of(&self, conn: ConnectionId) -> Option<DocumentId> {
        self.state
            .lock()
            .await
            .registry
            .session_of(conn)
            .map(str::to_owned)
    }

    pub async fn peers_of(&self, conn: ConnectionId) -> Vec<ConnectionId> {
        self.state.lock().await.registry.peers_of(conn).collect()
    }

    pub async fn member_count(&self, doc_id: &str) -> usize {
        self.state.lock().await.registry.member_count(doc_id)
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.registry.session_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.relay.connection_count()
    }
}
