//! Key-value store contract and implementations
//!
//! The persistent cache consumes a black-box store with three collections:
//! "metadata", "data", and a single-row "settings" holding the size counter.
//! The store must support per-key get/put/delete, ordered full-collection
//! iteration, and multi-collection atomic commits; the metadata/data sibling
//! records are always written together within one commit to preserve the
//! pair-consistency invariant.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::entry::CacheMetadata;
use super::error::CacheError;

/// One atomic unit of work against the store
#[derive(Debug, Default)]
pub struct WriteBatch {
    /// Metadata upserts (also used alone for recency bumps)
    pub metadata_puts: Vec<(String, CacheMetadata)>,
    /// Data upserts; every new entry writes metadata and data together
    pub data_puts: Vec<(String, Bytes)>,
    /// Keys to remove from both collections
    pub deletes: Vec<String>,
    /// New value for the size counter, when this batch changes stored bytes
    pub size_counter: Option<u64>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.metadata_puts.is_empty()
            && self.data_puts.is_empty()
            && self.deletes.is_empty()
            && self.size_counter.is_none()
    }
}

/// Black-box persistent store contract
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open the store; must be called before any other operation
    async fn initialize(&self) -> Result<(), CacheError>;

    async fn read_metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError>;

    async fn read_data(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Current value of the persisted size counter (0 when never written)
    async fn read_size_counter(&self) -> Result<u64, CacheError>;

    /// Ordered cursor iteration over the whole metadata collection
    async fn scan_metadata(&self) -> Result<Vec<(String, CacheMetadata)>, CacheError>;

    /// Apply a batch atomically across all collections
    async fn commit(&self, batch: WriteBatch) -> Result<(), CacheError>;
}

#[derive(Default)]
struct MemoryCollections {
    metadata: HashMap<String, CacheMetadata>,
    data: HashMap<String, Bytes>,
    size_counter: u64,
}

/// In-memory store: the ephemeral default, and the test double
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryCollections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn initialize(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn read_metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self.inner.read().metadata.get(key).cloned())
    }

    async fn read_data(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.inner.read().data.get(key).cloned())
    }

    async fn read_size_counter(&self) -> Result<u64, CacheError> {
        Ok(self.inner.read().size_counter)
    }

    async fn scan_metadata(&self) -> Result<Vec<(String, CacheMetadata)>, CacheError> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CacheError> {
        let mut inner = self.inner.write();
        for key in &batch.deletes {
            inner.metadata.remove(key);
            inner.data.remove(key);
        }
        for (key, meta) in batch.metadata_puts {
            inner.metadata.insert(key, meta);
        }
        for (key, data) in batch.data_puts {
            inner.data.insert(key, data);
        }
        if let Some(counter) = batch.size_counter {
            inner.size_counter = counter;
        }
        Ok(())
    }
}

/// Serialized index file: metadata collection plus the settings row
#[derive(Serialize, Deserialize, Default)]
struct FileIndex {
    metadata: HashMap<String, CacheMetadata>,
    size_counter: u64,
}

/// File-backed store using tokio::fs
///
/// The JSON index is the source of truth and is replaced with an atomic
/// tmp-rename on every commit; image bytes live in one blob file per key.
/// Orphaned blobs left by an interrupted commit are swept on initialize.
pub struct FileStore {
    root: PathBuf,
    index: RwLock<FileIndex>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(FileIndex::default()),
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join("blobs").join(format!("{}.bin", hex::encode(digest)))
    }

    async fn write_file_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data).await?;
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn persist_index(&self) -> Result<(), CacheError> {
        let serialized = {
            let index = self.index.read();
            serde_json::to_vec(&*index)?
        };
        Self::write_file_atomic(&self.index_path(), &serialized).await
    }

    async fn sweep_orphan_blobs(&self) -> Result<(), CacheError> {
        let referenced: std::collections::HashSet<PathBuf> = {
            let index = self.index.read();
            index.metadata.keys().map(|k| self.blob_path(k)).collect()
        };

        let blobs_dir = self.root.join("blobs");
        let mut dir = match tokio::fs::read_dir(&blobs_dir).await {
            Ok(dir) => dir,
            Err(_) => return Ok(()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if !referenced.contains(&path) {
                tracing::debug!(path = %path.display(), "sweeping orphaned cache blob");
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn initialize(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(self.root.join("blobs")).await?;

        match tokio::fs::read(self.index_path()).await {
            Ok(content) => {
                let loaded: FileIndex = serde_json::from_slice(&content)?;
                *self.index.write() = loaded;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.sweep_orphan_blobs().await
    }

    async fn read_metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        Ok(self.index.read().metadata.get(key).cloned())
    }

    async fn read_data(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        // Only serve bytes for indexed keys; a blob without metadata is an
        // orphan, not an entry.
        if !self.index.read().metadata.contains_key(key) {
            return Ok(None);
        }
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_size_counter(&self) -> Result<u64, CacheError> {
        Ok(self.index.read().size_counter)
    }

    async fn scan_metadata(&self) -> Result<Vec<(String, CacheMetadata)>, CacheError> {
        let index = self.index.read();
        let mut entries: Vec<_> = index
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CacheError> {
        let _guard = self.commit_lock.lock().await;

        // Deletes first, then blob writes; a key both deleted and re-put in
        // one batch (a same-key refresh) must keep its fresh blob. The index
        // rename below is the commit point.
        for key in &batch.deletes {
            let _ = tokio::fs::remove_file(self.blob_path(key)).await;
        }
        for (key, data) in &batch.data_puts {
            Self::write_file_atomic(&self.blob_path(key), data).await?;
        }

        {
            let mut index = self.index.write();
            for key in &batch.deletes {
                index.metadata.remove(key);
            }
            for (key, meta) in batch.metadata_puts {
                index.metadata.insert(key, meta);
            }
            if let Some(counter) = batch.size_counter {
                index.size_counter = counter;
            }
        }

        self.persist_index().await
    }
}
