//! Cache error types

/// Cache error types
#[derive(Debug)]
pub enum CacheError {
    /// The item is larger than the whole cache budget and can never fit
    EntryTooLarge { size: u64, budget: u64 },
    /// The backing store is unavailable or rejected the operation
    StoreUnavailable(String),
    /// I/O error (file-backed store)
    IoError(std::io::Error),
    /// Serialization/deserialization error
    SerializationError(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::EntryTooLarge { size, budget } => {
                write!(
                    f,
                    "Entry of {} bytes exceeds cache budget of {} bytes",
                    size, budget
                )
            }
            CacheError::StoreUnavailable(msg) => write!(f, "Cache store unavailable: {}", msg),
            CacheError::IoError(err) => write!(f, "I/O error: {}", err),
            CacheError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}
