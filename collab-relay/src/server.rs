//! WebSocket server: one task per connection, all sharing one [`Hub`].
//!
//! ```text
//! Client A ──┐                       ┌── SessionRegistry
//!            ├── connection task ──► Hub ── DeltaRelay ──► outboxes ──► peers
//! Client B ──┘                       └── SnapshotPersister ──► DocumentStore
//! ```
//!
//! Each connection task multiplexes two sources with `select!`: frames read
//! from its socket, and frames queued in its outbox by the hub. Closing the
//! socket, cleanly or not, always ends in `Hub::disconnect`.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tokio_tungstenite::tungstenite::Message;

use crate::config::{OriginPolicy, ServerConfig};
use crate::hub::{Hub, OpenOutcome};
use crate::protocol::ClientMessage;
use crate::relay::RelayReport;
use crate::session::ConnectionId;
use crate::storage::{DocumentStore, RocksStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub documents_opened: u64,
    pub deltas_relayed: u64,
    pub deliveries: u64,
    pub dropped_deliveries: u64,
    pub saves: u64,
    pub failed_saves: u64,
    pub rejected_frames: u64,
    pub active_sessions: usize,
}

/// Counters updated from connection tasks without taking the hub lock.
#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_handshakes: AtomicU64,
    documents_opened: AtomicU64,
    deltas_relayed: AtomicU64,
    deliveries: AtomicU64,
    dropped_deliveries: AtomicU64,
    saves: AtomicU64,
    failed_saves: AtomicU64,
    rejected_frames: AtomicU64,
}

impl AtomicServerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_relay(&self, report: RelayReport) {
        self.deltas_relayed.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped_deliveries
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    fn snapshot(&self, active_sessions: usize) -> ServerStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ServerStats {
            total_connections: load(&self.total_connections),
            active_connections: load(&self.active_connections),
            rejected_handshakes: load(&self.rejected_handshakes),
            documents_opened: load(&self.documents_opened),
            deltas_relayed: load(&self.deltas_relayed),
            deliveries: load(&self.deliveries),
            dropped_deliveries: load(&self.dropped_deliveries),
            saves: load(&self.saves),
            failed_saves: load(&self.failed_saves),
            rejected_frames: load(&self.rejected_frames),
            active_sessions,
        }
    }
}

/// The collaboration server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Open the RocksDB store named in `config` and build the server.
    ///
    /// An unreachable store is an error here; there is no degraded mode.
    pub fn open(config: ServerConfig) -> Result<Self, ServerError> {
        let store = RocksStore::open(config.store.clone())?;
        let documents = store.list_documents()?.len();
        log::info!(
            "Opened document store at {} ({documents} documents)",
            store.path().display()
        );
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Build the server on an already opened store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn DocumentStore>) -> Self {
        let hub = Arc::new(Hub::new(store, config.outbox_capacity));
        Self {
            config,
            hub,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections from `listener` forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Collaboration server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            let origin = self.config.allowed_origin.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats, origin).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<Hub>,
        stats: Arc<AtomicServerStats>,
        origin: OriginPolicy,
    ) -> Result<(), ServerError> {
        let check_origin = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let header = req.headers().get(ORIGIN).and_then(|v| v.to_str().ok());
            if origin.permits(header) {
                return Ok(resp);
            }
            log::warn!("Rejected WebSocket from {addr}: origin {header:?} not allowed");
            let mut denied = ErrorResponse::new(Some("Origin not allowed".to_string()));
            *denied.status_mut() = StatusCode::FORBIDDEN;
            Err(denied)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, check_origin).await {
            Ok(ws) => ws,
            Err(e) => {
                AtomicServerStats::bump(&stats.rejected_handshakes);
                return Err(e.into());
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (conn, mut outbox) = hub.connect().await;
        AtomicServerStats::bump(&stats.total_connections);
        AtomicServerStats::bump(&stats.active_connections);
        log::info!("Connection {conn} established from {addr}");

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                // Keep flushing the outbox while the frame is handled:
                                // `load-document` may be waiting for room in it.
                                let work = Self::dispatch(conn, &text, &hub, &stats);
                                tokio::pin!(work);
                                loop {
                                    tokio::select! {
                                        () = &mut work => break,
                                        Some(frame) = outbox.recv() => ws_sender.send(frame).await?,
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                AtomicServerStats::bump(&stats.rejected_frames);
                                log::debug!("Ignoring binary frame from {conn}");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection {conn} closed");
                                break;
                            }
                            Some(Err(e)) => {
                                log::warn!("WebSocket error on {conn}: {e}");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }

                    frame = outbox.recv() => {
                        match frame {
                            Some(frame) => ws_sender.send(frame).await?,
                            None => break,
                        }
                    }
                }
            }
            Ok::<(), ServerError>(())
        }
        .await;

        if let Some(doc_id) = hub.disconnect(conn).await {
            log::info!("Connection {conn} left {doc_id}");
        }
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);

        result
    }

    /// Act on one text frame. Failures are logged; the connection stays up.
    async fn dispatch(conn: ConnectionId, text: &str, hub: &Hub, stats: &AtomicServerStats) {
        let msg = match ClientMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                AtomicServerStats::bump(&stats.rejected_frames);
                log::warn!("Rejected frame from {conn}: {e}");
                return;
            }
        };
        log::debug!("{} from {conn}", msg.event());

        match msg {
            ClientMessage::GetDocument(doc_id) => {
                match hub.open_document(conn, doc_id.as_deref()).await {
                    Ok(OpenOutcome::Opened { .. }) => {
                        AtomicServerStats::bump(&stats.documents_opened);
                    }
                    Ok(OpenOutcome::Ignored) => {
                        log::debug!("get-document without an id from {conn} ignored");
                    }
                    Ok(OpenOutcome::Discarded) => {}
                    Err(e) => log::error!("Failed to open document for {conn}: {e}"),
                }
            }
            ClientMessage::SendChanges(delta) => match hub.relay(conn, &delta).await {
                Ok(report) => stats.record_relay(report),
                Err(e) => log::error!("Failed to relay delta from {conn}: {e}"),
            },
            ClientMessage::SaveDocument(content) => match hub.persist(conn, &content).await {
                Ok(Some(meta)) => {
                    AtomicServerStats::bump(&stats.saves);
                    log::debug!(
                        "Saved {} ({} bytes) from {conn}",
                        meta.doc_id,
                        meta.content_size
                    );
                }
                Ok(None) => log::debug!("save-document from {conn} without a session ignored"),
                Err(e) => {
                    AtomicServerStats::bump(&stats.failed_saves);
                    log::error!("Failed to save document for {conn}: {e}");
                }
            },
        }
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.snapshot(self.hub.session_count().await)
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoreConfig};

    #[test]
    fn test_server_creation() {
        let server = SyncServer::with_store(ServerConfig::default(), Arc::new(MemoryStore::new()));
        assert_eq!(server.bind_addr(), "0.0.0.0:5000");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = SyncServer::with_store(ServerConfig::default(), Arc::new(MemoryStore::new()));
        assert_eq!(server.stats().await, ServerStats::default());
    }

    #[tokio::test]
    async fn test_open_with_rocksdb() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            store: StoreConfig::for_testing(dir.path().join("db")),
            ..ServerConfig::default()
        };
        let server = SyncServer::open(config).unwrap();
        assert!(server.hub().store().list_documents().unwrap().is_empty());
    }

    #[test]
    fn test_open_unreachable_storage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a database").unwrap();
        let config = ServerConfig {
            store: StoreConfig::for_testing(blocker.join("db")),
            ..ServerConfig::default()
        };
        assert!(matches!(SyncServer::open(config), Err(ServerError::Storage(_))));
    }

    #[test]
    fn test_record_relay() {
        let stats = AtomicServerStats::default();
        stats.record_relay(RelayReport {
            delivered: 3,
            dropped: 1,
        });
        let snap = stats.snapshot(2);
        assert_eq!(snap.deltas_relayed, 1);
        assert_eq!(snap.deliveries, 3);
        assert_eq!(snap.dropped_deliveries, 1);
        assert_eq!(snap.active_sessions, 2);
    }
}
