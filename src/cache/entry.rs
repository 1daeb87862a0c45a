//! Persisted cache record types
//!
//! Two sibling records share each cache key: the metadata record below and
//! the encoded image bytes. They always exist or are absent together; a lone
//! sibling signals cache corruption.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata record persisted next to the image bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Last-modification time of the source at save time; a mismatch with an
    /// incoming request marks the entry stale
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    /// Photographic details blob, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifd: Option<serde_json::Value>,
    /// Size of the data record in bytes
    pub size: u64,
    /// Recency signal for LRU eviction, bumped on every successful load
    pub last_load_timestamp: u64,
}

/// A cache hit: dimensions, optional details, and the stored bytes
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub width: u32,
    pub height: u32,
    pub ifd: Option<serde_json::Value>,
    pub data: Bytes,
}

/// Milliseconds since the UNIX epoch, used for `last_load_timestamp`
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip() {
        let meta = CacheMetadata {
            timestamp: 42,
            width: 100,
            height: 50,
            ifd: Some(serde_json::json!({"fNumber": 2.8})),
            size: 1234,
            last_load_timestamp: 99,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: CacheMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timestamp, 42);
        assert_eq!(back.size, 1234);
        assert_eq!(back.ifd, meta.ifd);
    }

    #[test]
    fn test_metadata_ifd_optional() {
        let json = r#"{"timestamp":1,"width":2,"height":3,"size":4,"last_load_timestamp":5}"#;
        let meta: CacheMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.ifd.is_none());
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
