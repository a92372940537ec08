//! In-memory document store for tests and embedding.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{
    validate_id, Document, DocumentMetadata, DocumentStore, StoreError, EMPTY_CONTENT,
};

#[derive(Debug, Clone)]
struct Record {
    content: Vec<u8>,
    meta: DocumentMetadata,
}

/// Volatile [`DocumentStore`]. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryStore {
    fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        validate_id(id)?;
        let mut records = self.lock();
        let record = records.entry(id.to_owned()).or_insert_with(|| {
            log::info!("Created document {id}");
            Record {
                content: EMPTY_CONTENT.to_vec(),
                meta: DocumentMetadata::new(id, EMPTY_CONTENT.len() as u64, EMPTY_CONTENT.len() as u64),
            }
        });
        Ok(Document {
            id: id.to_owned(),
            content: record.content.clone(),
        })
    }

    fn save(&self, id: &str, content: &[u8]) -> Result<DocumentMetadata, StoreError> {
        validate_id(id)?;
        let mut records = self.lock();
        let record = records.entry(id.to_owned()).or_insert_with(|| Record {
            content: Vec::new(),
            meta: DocumentMetadata::new(id, 0, 0),
        });
        record.content = content.to_vec();
        record.meta.touch(content.len() as u64, content.len() as u64);
        Ok(record.meta.clone())
    }

    fn metadata(&self, id: &str) -> Result<DocumentMetadata, StoreError> {
        self.lock()
            .get(id)
            .map(|r| r.meta.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_idempotent() {
        let store = MemoryStore::new();
        let first = store.load_or_create("doc-1").unwrap();
        let second = store.load_or_create("doc-1").unwrap();
        assert_eq!(first.content, EMPTY_CONTENT);
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        store.load_or_create("doc").unwrap();
        store.save("doc", b"\"Hi\"").unwrap();
        assert_eq!(store.load_or_create("doc").unwrap().content, b"\"Hi\"");
        assert_eq!(store.metadata("doc").unwrap().save_count, 1);
    }

    #[test]
    fn test_empty_id_creates_nothing() {
        let store = MemoryStore::new();
        assert!(store.load_or_create("").is_err());
        assert!(store.save("", b"x").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_documents() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.load_or_create(id).unwrap();
        }
        let mut ids = store.list_documents().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
