//! Durable storage for collaborative documents.
//!
//! ```text
//! ┌──────────────┐  load_or_create / save  ┌───────────────────────────────┐
//! │ SyncServer   │ ──────────────────────► │ DocumentStore (trait)         │
//! │ (hub + conn) │                         ├───────────────┬───────────────┤
//! └──────────────┘                         │ RocksStore    │ MemoryStore   │
//!                                          │ (durable)     │ (tests)       │
//!                                          └───────────────┴───────────────┘
//! ```
//!
//! Every document is one record keyed by its identifier, holding a single
//! opaque content blob. The store never interprets the blob.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Content stored for a document that has never been saved: the JSON string `""`.
pub const EMPTY_CONTENT: &[u8] = b"\"\"";

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    /// Opaque serialized editor state.
    pub content: Vec<u8>,
}

impl Document {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: EMPTY_CONTENT.to_vec(),
        }
    }
}

/// Bookkeeping kept next to each document's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub doc_id: String,
    /// Uncompressed content size in bytes
    pub content_size: u64,
    /// Size on disk after compression (equal to `content_size` in memory)
    pub stored_size: u64,
    /// Number of snapshot writes since creation
    pub save_count: u64,
    /// Creation timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last modified timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl DocumentMetadata {
    pub(crate) fn new(doc_id: &str, content_size: u64, stored_size: u64) -> Self {
        let now = unix_now();
        Self {
            doc_id: doc_id.to_owned(),
            content_size,
            stored_size,
            save_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a snapshot write of the given sizes.
    pub(crate) fn touch(&mut self, content_size: u64, stored_size: u64) {
        self.content_size = content_size;
        self.stored_size = stored_size;
        self.save_count += 1;
        self.updated_at = unix_now().max(self.created_at);
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Storage errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Invalid document id: {0:?}")]
    InvalidId(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Identifier-keyed persistence for document content.
///
/// Implementations are blocking; the server calls them from tokio's
/// blocking pool.
pub trait DocumentStore: Send + Sync {
    /// Return the document if it exists, otherwise create it with
    /// [`EMPTY_CONTENT`]. Creation is atomic: concurrent calls for the same
    /// unseen id create exactly one record.
    fn load_or_create(&self, id: &str) -> Result<Document, StoreError>;

    /// Replace the stored content for `id`. The write is all-or-nothing.
    fn save(&self, id: &str, content: &[u8]) -> Result<DocumentMetadata, StoreError>;

    fn metadata(&self, id: &str) -> Result<DocumentMetadata, StoreError>;

    fn list_documents(&self) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidId(id.to_owned()));
    }
    Ok(())
}
