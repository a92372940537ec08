//! Snapshot persistence: the bridge between async connections and the
//! blocking [`DocumentStore`].
//!
//! Snapshots from different members of one session are not merged. Whichever
//! `save` finishes last is what the store keeps; peers' live state is carried
//! by the delta relay, so this only widens the window in which the durable
//! copy lags behind.

use std::sync::Arc;

use crate::protocol::Payload;
use crate::storage::{Document, DocumentMetadata, DocumentStore, StoreError};

#[derive(Clone)]
pub struct SnapshotPersister {
    store: Arc<dyn DocumentStore>,
}

impl SnapshotPersister {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Find-or-create `doc_id` on the blocking pool.
    pub async fn load_or_create(&self, doc_id: &str) -> Result<Document, StoreError> {
        let store = self.store.clone();
        let doc_id = doc_id.to_owned();
        tokio::task::spawn_blocking(move || store.load_or_create(&doc_id))
            .await
            .map_err(|e| StoreError::Database(format!("storage task failed: {e}")))?
    }

    /// Write `content` as the new snapshot of `doc_id`.
    ///
    /// `None` means the caller has no session; nothing is written.
    pub async fn persist(
        &self,
        doc_id: Option<&str>,
        content: &Payload,
    ) -> Result<Option<DocumentMetadata>, StoreError> {
        let Some(doc_id) = doc_id else {
            return Ok(None);
        };
        let store = self.store.clone();
        let doc_id = doc_id.to_owned();
        let bytes = content.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || store.save(&doc_id, &bytes))
            .await
            .map_err(|e| StoreError::Database(format!("storage task failed: {e}")))?
            .map(Some)
    }
}
