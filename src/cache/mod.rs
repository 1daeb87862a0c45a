//! Persistent image cache
//!
//! A byte-budgeted store mapping a cache key to image bytes plus metadata,
//! with LRU eviction. Used by request tasks; independent of the scheduler.

mod entry;
mod error;
mod image_cache;
mod store;

pub use entry::{CachedImage, CacheMetadata};
pub use error::CacheError;
pub use image_cache::ImageCache;
pub use store::{CacheStore, FileStore, MemoryStore, WriteBatch};
