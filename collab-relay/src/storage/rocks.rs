//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents`: document content (LZ4 compressed), keyed by the id's UTF-8 bytes
//! - `metadata`: [`DocumentMetadata`] (bincode), same key
//!
//! Content and metadata always change together in one `WriteBatch`, so a
//! reader never observes half of a save.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{
    validate_id, Document, DocumentMetadata, DocumentStore, StoreError, EMPTY_CONTENT,
};

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every save (default: true, a save is the only durable copy)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("collab_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Durable [`DocumentStore`] on top of RocksDB.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes every read-modify-write: creation and saves.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    ///
    /// Failure here means storage is unreachable; callers treat it as fatal.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_DOCUMENTS => {
                // Values are already LZ4 framed by us.
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Read a document without creating it.
    pub fn load(&self, id: &str) -> Result<Document, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(compressed) => {
                let content = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                Ok(Document {
                    id: id.to_owned(),
                    content,
                })
            }
            None => Err(StoreError::NotFound(id.to_owned())),
        }
    }

    pub fn document_exists(&self, id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self.db.get_cf(cf, id.as_bytes())?.is_some())
    }

    /// Write content and metadata in one batch.
    fn write_document(
        &self,
        id: &str,
        content: &[u8],
        meta: Option<DocumentMetadata>,
    ) -> Result<DocumentMetadata, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(content);
        let meta = match meta {
            Some(mut meta) => {
                meta.touch(content.len() as u64, compressed.len() as u64);
                meta
            }
            None => DocumentMetadata::new(id, content.len() as u64, compressed.len() as u64),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_docs, id.as_bytes(), &compressed);
        batch.put_cf(cf_meta, id.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl DocumentStore for RocksStore {
    fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        validate_id(id)?;

        match self.load(id) {
            Ok(doc) => return Ok(doc),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have created it while we waited.
        match self.load(id) {
            Ok(doc) => Ok(doc),
            Err(StoreError::NotFound(_)) => {
                self.write_document(id, EMPTY_CONTENT, None)?;
                log::info!("Created document {id}");
                Ok(Document::empty(id))
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, id: &str, content: &[u8]) -> Result<DocumentMetadata, StoreError> {
        validate_id(id)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let meta = match self.metadata(id) {
            Ok(meta) => meta,
            Err(StoreError::NotFound(_)) => DocumentMetadata::new(id, 0, 0),
            Err(e) => return Err(e),
        };
        self.write_document(id, content, Some(meta))
    }

    fn metadata(&self, id: &str) -> Result<DocumentMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => DocumentMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(id.to_owned())),
        }
    }

    fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Deserialization("Non UTF-8 document key".into()))?;
            ids.push(id);
        }
        Ok(ids)
    }
}
