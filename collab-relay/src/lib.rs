//! # collab-relay: real-time document collaboration relay
//!
//! Editors open a document by id, stream their edits to everyone else
//! editing the same document, and periodically push a full snapshot that is
//! kept durably.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RelayClient │ ◄─────────────────► │ SyncServer  │
//! │ (per editor)│     JSON events     │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │     Hub     │
//!                                     └──┬───────┬──┘
//!                          ┌─────────────┘       └─────────────┐
//!                  ┌───────┴────────┐                  ┌───────┴────────┐
//!                  │SessionRegistry │                  │SnapshotPersister│
//!                  │  DeltaRelay    │                  │ DocumentStore  │
//!                  └────────────────┘                  └────────────────┘
//! ```
//!
//! The server never interprets a delta or a document: merging concurrent
//! edits is left to the editors.
//!
//! ## Modules
//!
//! - [`protocol`]: event frames and opaque payloads
//! - [`session`]: which connection is editing which document
//! - [`relay`]: per-connection outboxes and delta fan-out
//! - [`persist`]: snapshot saves on the blocking pool
//! - [`hub`]: the shared state every connection task talks to
//! - [`server`]: WebSocket accept loop and per-connection tasks
//! - [`client`]: editor-side connection and autosave
//! - [`storage`]: RocksDB and in-memory document stores
//! - [`config`]: command line and server settings

pub mod client;
pub mod config;
pub mod hub;
pub mod persist;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod storage;

pub use client::{spawn_autosave, ClientError, ClientHandle, ConnectionState, RelayClient};
pub use config::{Cli, OriginPolicy, ServerConfig};
pub use hub::{Hub, HubError, OpenOutcome};
pub use persist::SnapshotPersister;
pub use protocol::{ClientMessage, Event, Payload, ProtocolError, ServerMessage};
pub use relay::{DeltaRelay, Delivery, RelayReport};
pub use server::{ServerError, ServerStats, SyncServer};
pub use session::{ConnectionId, DocumentId, JoinOutcome, SessionRegistry};
pub use storage::{
    Document, DocumentMetadata, DocumentStore, MemoryStore, RocksStore, StoreConfig, StoreError,
};
