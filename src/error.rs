//! Loader error types
//!
//! Centralized error taxonomy for the loading pipeline. Failures are local to
//! one request task unless they indicate decoder-subsystem failure, which is
//! broadcast by the service.

use thiserror::Error;

/// Errors that can occur while loading, decoding or transforming an image
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Source bytes could not be fetched (network error, missing file, ...)
    #[error("Failed to fetch source: {message}")]
    FetchFailed { message: String },

    /// Source bytes could not be decoded into an image
    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: String },

    /// Transform (crop/resize/orientation) failed
    #[error("Transform failed: {message}")]
    TransformFailed { message: String },

    /// Re-encoding the transformed image failed
    #[error("Failed to encode to {format}: {message}")]
    EncodeFailed { format: String, message: String },

    /// A decoder-reported byte region falls outside the source buffer
    #[error("Region out of bounds: offset {offset} + length {length} > buffer size {buffer_size}")]
    RegionOutOfBounds {
        offset: usize,
        length: usize,
        buffer_size: usize,
    },

    /// The external decoder reported an error for this file
    #[error("RAW decoder error: {message}")]
    RawDecodeFailed { message: String },

    /// The decoder subsystem is in an unrecoverable state and must be
    /// restarted by the host; in-flight requests against it fail
    #[error("RAW decoder subsystem failed and requires restart")]
    DecoderSubsystem,

    /// Request is malformed (missing url on a non-cancel message, ...)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The request task was cancelled before completion
    #[error("Task cancelled")]
    Cancelled,
}

impl LoaderError {
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        LoaderError::FetchFailed {
            message: message.into(),
        }
    }

    pub fn decode_failed(message: impl Into<String>) -> Self {
        LoaderError::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn transform_failed(message: impl Into<String>) -> Self {
        LoaderError::TransformFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(format: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        LoaderError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether this failure must be escalated beyond the current task
    pub fn is_subsystem_failure(&self) -> bool {
        matches!(self, LoaderError::DecoderSubsystem)
    }
}
