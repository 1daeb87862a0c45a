// Configuration module

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::LoaderError;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoaderConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Default cache byte budget (100 MB)
fn default_budget_bytes() -> u64 {
    100 * 1024 * 1024
}

/// Default minimum bytes freed per eviction pass (4 MB)
///
/// Evicting in chunks rather than exactly the bytes needed amortizes the
/// full-table metadata scan across many future writes.
fn default_eviction_chunk_bytes() -> u64 {
    4 * 1024 * 1024
}

/// Persistent cache tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total byte budget for stored image data
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: u64,

    /// Minimum bytes freed per eviction pass
    #[serde(default = "default_eviction_chunk_bytes")]
    pub eviction_chunk_bytes: u64,

    /// Directory for the file-backed store; None keeps the cache in memory
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_budget_bytes(),
            eviction_chunk_bytes: default_eviction_chunk_bytes(),
            directory: None,
        }
    }
}

fn default_min_concurrency() -> usize {
    2
}

fn default_max_concurrency() -> usize {
    8
}

/// Default memory assumed per concurrent decode slot (256 MB)
fn default_memory_per_slot_bytes() -> u64 {
    256 * 1024 * 1024
}

/// Scheduler tunables
///
/// The concurrency limit is derived from host resource hints at startup and
/// clamped to `[min_concurrency, max_concurrency]`; `fixed_concurrency`
/// bypasses derivation entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Memory assumed consumed by one in-flight decode, used to derive the
    /// concurrency limit from available system memory
    #[serde(default = "default_memory_per_slot_bytes")]
    pub memory_per_slot_bytes: u64,

    /// Explicit concurrency limit, overriding derivation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_concurrency: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            memory_per_slot_bytes: default_memory_per_slot_bytes(),
            fixed_concurrency: None,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, LoaderError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::invalid_request(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LoaderError> {
        serde_yaml::from_str(content)
            .map_err(|e| LoaderError::invalid_request(format!("invalid config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.cache.budget_bytes, 100 * 1024 * 1024);
        assert_eq!(config.cache.eviction_chunk_bytes, 4 * 1024 * 1024);
        assert_eq!(config.scheduler.min_concurrency, 2);
        assert_eq!(config.scheduler.max_concurrency, 8);
        assert!(config.scheduler.fixed_concurrency.is_none());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
cache:
  budget_bytes: 1048576
"#;
        let config = LoaderConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cache.budget_bytes, 1048576);
        // Unspecified fields keep their defaults
        assert_eq!(config.cache.eviction_chunk_bytes, 4 * 1024 * 1024);
        assert_eq!(config.scheduler.max_concurrency, 8);
    }

    #[test]
    fn test_from_yaml_scheduler_override() {
        let yaml = r#"
scheduler:
  fixed_concurrency: 3
  max_concurrency: 16
"#;
        let config = LoaderConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.scheduler.fixed_concurrency, Some(3));
        assert_eq!(config.scheduler.max_concurrency, 16);
    }

    #[test]
    fn test_from_yaml_invalid() {
        let result = LoaderConfig::from_yaml("cache: [not, a, map]");
        assert!(result.is_err());
    }
}
