//! Byte-budgeted persistent image cache with LRU eviction
//!
//! Maps a cache key to image bytes plus metadata. The persisted size counter
//! is the basis for eviction decisions; it is mutated in the same commit as
//! every insert/evict/remove rather than derived by summing entries at
//! request time.

use bytes::Bytes;
use std::sync::Arc;

use super::entry::{now_millis, CachedImage, CacheMetadata};
use super::error::CacheError;
use super::store::{CacheStore, WriteBatch};
use crate::config::CacheConfig;

/// Persistent image cache over a black-box key-value store
pub struct ImageCache<S: CacheStore> {
    store: Arc<S>,
    config: CacheConfig,
}

impl<S: CacheStore> ImageCache<S> {
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Open the backing store
    pub async fn initialize(&self) -> Result<(), CacheError> {
        self.store.initialize().await
    }

    /// Total bytes currently stored, per the persisted counter
    pub async fn total_size(&self) -> u64 {
        self.store.read_size_counter().await.unwrap_or(0)
    }

    /// Load a cached image, treating every failure mode as a miss.
    ///
    /// Store errors, inconsistent sibling records, and stale timestamps all
    /// report not-found; callers must not distinguish "not cached" from
    /// "cache broken". A successful load bumps `last_load_timestamp`, so
    /// reads count as usage for LRU purposes.
    pub async fn load_image(&self, key: &str, timestamp: i64) -> Option<CachedImage> {
        match self.try_load(key, timestamp).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "cache load failed, treating as miss");
                None
            }
        }
    }

    async fn try_load(&self, key: &str, timestamp: i64) -> Result<Option<CachedImage>, CacheError> {
        let meta = self.store.read_metadata(key).await?;
        let data = self.store.read_data(key).await?;

        let (meta, data) = match (meta, data) {
            (Some(meta), Some(data)) => (meta, data),
            (None, None) => return Ok(None),
            (half_meta, half_data) => {
                // A lone sibling record means the pair invariant was broken
                // by a third party; drop whatever half is left. The surviving
                // half still tells us how many bytes the counter owes back
                // (metadata records the size, a data blob is its own size).
                tracing::warn!(key, "inconsistent cache records, dropping entry");
                let size = half_meta
                    .map(|m| m.size)
                    .or_else(|| half_data.map(|d| d.len() as u64))
                    .unwrap_or(0);
                self.delete_entry(key, size).await?;
                return Ok(None);
            }
        };

        if meta.timestamp != timestamp {
            // A timestamp change is always a content change; stale entries
            // are deleted on access, never served.
            tracing::debug!(key, stored = meta.timestamp, requested = timestamp, "stale cache entry");
            self.delete_entry(key, meta.size).await?;
            return Ok(None);
        }

        let mut bumped = meta.clone();
        bumped.last_load_timestamp = now_millis();
        self.store
            .commit(WriteBatch {
                metadata_puts: vec![(key.to_string(), bumped)],
                ..Default::default()
            })
            .await?;

        tracing::debug!(key, "cache hit");
        Ok(Some(CachedImage {
            width: meta.width,
            height: meta.height,
            ifd: meta.ifd,
            data,
        }))
    }

    /// Store an image, evicting least-recently-used entries as needed.
    ///
    /// A no-op when the same key and timestamp are already stored. Fails
    /// outright when the item is larger than the whole budget.
    pub async fn save_image(
        &self,
        key: &str,
        timestamp: i64,
        width: u32,
        height: u32,
        ifd: Option<serde_json::Value>,
        data: Bytes,
    ) -> Result<(), CacheError> {
        let size = data.len() as u64;
        let budget = self.config.budget_bytes;
        if size > budget {
            return Err(CacheError::EntryTooLarge { size, budget });
        }

        let mut batch = WriteBatch::default();
        let mut freed: u64 = 0;

        if let Some(existing) = self.store.read_metadata(key).await? {
            if existing.timestamp == timestamp {
                // Redundant write: no size change, but the entry was just
                // produced again, so it counts as used for LRU purposes.
                let mut bumped = existing;
                bumped.last_load_timestamp = now_millis();
                return self
                    .store
                    .commit(WriteBatch {
                        metadata_puts: vec![(key.to_string(), bumped)],
                        ..Default::default()
                    })
                    .await;
            }
            // Replacing a stale entry under the same key: reclaim its bytes.
            batch.deletes.push(key.to_string());
            freed += existing.size;
        }

        let current = self.store.read_size_counter().await?;
        if current.saturating_sub(freed) + size > budget {
            // Evict oldest-first until at least max(size, chunk) is freed.
            // Freeing more than strictly needed amortizes the full-table
            // scan across many future writes.
            let goal = size.max(self.config.eviction_chunk_bytes);
            let mut entries = self.store.scan_metadata().await?;
            entries.sort_by_key(|(_, meta)| meta.last_load_timestamp);

            for (victim, meta) in entries {
                if freed >= goal {
                    break;
                }
                if victim == key {
                    continue;
                }
                tracing::debug!(key = %victim, size = meta.size, "evicting cache entry");
                batch.deletes.push(victim);
                freed += meta.size;
            }
        }

        batch.metadata_puts.push((
            key.to_string(),
            CacheMetadata {
                timestamp,
                width,
                height,
                ifd,
                size,
                last_load_timestamp: now_millis(),
            },
        ));
        batch.data_puts.push((key.to_string(), data));
        batch.size_counter = Some(current.saturating_sub(freed) + size);

        self.store.commit(batch).await
    }

    /// Remove an entry and release its bytes from the counter
    pub async fn remove_image(&self, key: &str) -> Result<(), CacheError> {
        let Some(meta) = self.store.read_metadata(key).await? else {
            return Ok(());
        };
        self.delete_entry(key, meta.size).await
    }

    async fn delete_entry(&self, key: &str, size: u64) -> Result<(), CacheError> {
        let current = self.store.read_size_counter().await?;
        self.store
            .commit(WriteBatch {
                deletes: vec![key.to_string()],
                size_counter: Some(current.saturating_sub(size)),
                ..Default::default()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{FileStore, MemoryStore};
    use std::time::Duration;

    fn cache_with_budget(budget: u64, chunk: u64) -> ImageCache<MemoryStore> {
        let config = CacheConfig {
            budget_bytes: budget,
            eviction_chunk_bytes: chunk,
            directory: None,
        };
        ImageCache::new(Arc::new(MemoryStore::new()), config)
    }

    fn bytes_of(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    async fn save(cache: &ImageCache<MemoryStore>, key: &str, len: usize) {
        cache
            .save_image(key, 1, 10, 10, None, bytes_of(len))
            .await
            .unwrap();
        // Millisecond LRU stamps need distinct values between operations.
        std::thread::sleep(Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let cache = cache_with_budget(1000, 100);
        cache
            .save_image("k", 5, 20, 30, None, Bytes::from_static(b"img"))
            .await
            .unwrap();

        let hit = cache.load_image("k", 5).await.unwrap();
        assert_eq!(hit.width, 20);
        assert_eq!(hit.height, 30);
        assert_eq!(hit.data, Bytes::from_static(b"img"));
        assert_eq!(cache.total_size().await, 3);
    }

    #[tokio::test]
    async fn test_miss_on_unknown_key() {
        let cache = cache_with_budget(1000, 100);
        assert!(cache.load_image("missing", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_entry_deleted_and_missed() {
        let cache = cache_with_budget(1000, 100);
        cache
            .save_image("k", 5, 10, 10, None, bytes_of(4))
            .await
            .unwrap();

        // Different timestamp: stale, deleted, reported missing.
        assert!(cache.load_image("k", 6).await.is_none());
        // Even the original timestamp now misses.
        assert!(cache.load_image("k", 5).await.is_none());
        assert_eq!(cache.total_size().await, 0);
    }

    #[tokio::test]
    async fn test_save_same_key_and_timestamp_is_noop() {
        let cache = cache_with_budget(1000, 100);
        cache
            .save_image("k", 5, 10, 10, None, bytes_of(4))
            .await
            .unwrap();
        cache
            .save_image("k", 5, 10, 10, None, bytes_of(4))
            .await
            .unwrap();
        // No duplicate size accounting.
        assert_eq!(cache.total_size().await, 4);
    }

    #[tokio::test]
    async fn test_save_same_key_new_timestamp_replaces() {
        let cache = cache_with_budget(1000, 100);
        cache
            .save_image("k", 5, 10, 10, None, bytes_of(4))
            .await
            .unwrap();
        cache
            .save_image("k", 6, 10, 10, None, bytes_of(10))
            .await
            .unwrap();

        assert_eq!(cache.total_size().await, 10);
        assert!(cache.load_image("k", 6).await.is_some());
    }

    #[tokio::test]
    async fn test_file_backed_replacement_keeps_both_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let cache = ImageCache::new(store, CacheConfig::default());
        cache.initialize().await.unwrap();

        cache
            .save_image("k", 1, 10, 10, None, bytes_of(4))
            .await
            .unwrap();
        cache
            .save_image("k", 2, 10, 10, None, bytes_of(6))
            .await
            .unwrap();

        // The refreshed entry must come back whole, data sibling included.
        let hit = cache.load_image("k", 2).await.unwrap();
        assert_eq!(hit.data.len(), 6);
        assert_eq!(cache.total_size().await, 6);
    }

    #[tokio::test]
    async fn test_redundant_save_refreshes_recency() {
        let cache = cache_with_budget(100, 1);
        save(&cache, "a", 40).await;
        save(&cache, "b", 40).await;
        // Re-producing "a" under its stored timestamp counts as usage,
        // leaving "b" as the eviction victim.
        save(&cache, "a", 40).await;
        save(&cache, "c", 40).await;

        assert!(cache.load_image("a", 1).await.is_some());
        assert!(cache.load_image("b", 1).await.is_none());
        assert!(cache.load_image("c", 1).await.is_some());
        assert_eq!(cache.total_size().await, 80);
    }

    #[tokio::test]
    async fn test_oversized_save_fails_and_leaves_store_unchanged() {
        let cache = cache_with_budget(10, 5);
        cache
            .save_image("small", 1, 10, 10, None, bytes_of(4))
            .await
            .unwrap();

        let result = cache
            .save_image("big", 1, 10, 10, None, bytes_of(11))
            .await;
        assert!(matches!(result, Err(CacheError::EntryTooLarge { .. })));
        assert_eq!(cache.total_size().await, 4);
        assert!(cache.load_image("small", 1).await.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_drops_oldest_first() {
        // Budget fits two 40-byte entries; chunk small enough to evict one.
        let cache = cache_with_budget(100, 1);
        save(&cache, "a", 40).await;
        save(&cache, "b", 40).await;

        // Touch "a" so "b" becomes the least recently used.
        assert!(cache.load_image("a", 1).await.is_some());
        std::thread::sleep(Duration::from_millis(2));

        save(&cache, "c", 40).await;

        assert!(cache.load_image("a", 1).await.is_some());
        assert!(cache.load_image("b", 1).await.is_none());
        assert!(cache.load_image("c", 1).await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_frees_at_least_the_chunk() {
        // Chunk of 80 forces both old entries out even though 40 would do.
        let cache = cache_with_budget(100, 80);
        save(&cache, "a", 40).await;
        save(&cache, "b", 40).await;
        save(&cache, "c", 40).await;

        assert!(cache.load_image("a", 1).await.is_none());
        assert!(cache.load_image("b", 1).await.is_none());
        assert!(cache.load_image("c", 1).await.is_some());
        assert_eq!(cache.total_size().await, 40);
    }

    #[tokio::test]
    async fn test_counter_tracks_evictions() {
        let cache = cache_with_budget(100, 1);
        save(&cache, "a", 60).await;
        save(&cache, "b", 60).await;
        // "a" evicted: 60 stored.
        assert_eq!(cache.total_size().await, 60);
    }

    #[tokio::test]
    async fn test_remove_image_releases_bytes() {
        let cache = cache_with_budget(100, 1);
        save(&cache, "a", 30).await;
        cache.remove_image("a").await.unwrap();
        assert_eq!(cache.total_size().await, 0);
        assert!(cache.load_image("a", 1).await.is_none());
        // Removing again is harmless.
        cache.remove_image("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_inconsistent_records_dropped() {
        let store = Arc::new(MemoryStore::new());
        let cache = ImageCache::new(store.clone(), CacheConfig::default());

        // Write metadata without its data sibling.
        store
            .commit(WriteBatch {
                metadata_puts: vec![(
                    "k".to_string(),
                    CacheMetadata {
                        timestamp: 1,
                        width: 1,
                        height: 1,
                        ifd: None,
                        size: 9,
                        last_load_timestamp: 0,
                    },
                )],
                size_counter: Some(9),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(cache.load_image("k", 1).await.is_none());
        // The lone record was cleaned up and its bytes released.
        assert_eq!(cache.total_size().await, 0);
        assert!(store.read_metadata("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lone_data_sibling_releases_counted_bytes() {
        let store = Arc::new(MemoryStore::new());
        let cache = ImageCache::new(store.clone(), CacheConfig::default());

        // Data without its metadata sibling; the counter still carries it.
        store
            .commit(WriteBatch {
                data_puts: vec![("k".to_string(), bytes_of(9))],
                size_counter: Some(9),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(cache.load_image("k", 1).await.is_none());
        // The orphaned bytes were credited back to the counter.
        assert_eq!(cache.total_size().await, 0);
        assert!(store.read_data("k").await.unwrap().is_none());
    }
}
