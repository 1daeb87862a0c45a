//! Request and response wire types
//!
//! JSON-serializable contract toward callers. The transport delivering these
//! messages is an external collaborator; this module only fixes the shapes
//! and derives the persistent cache key.

use serde::{Deserialize, Serialize};

use crate::geometry::{Orientation, TransformOptions};

/// Default request priority (lower value runs first)
pub const DEFAULT_PRIORITY: u32 = 2;

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

/// A request describing a desired transformation of a source image
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadImageRequest {
    /// Source URL; absent only for cancellation messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default)]
    pub orientation: Orientation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,

    /// Request a fixed square output; requires equal `width` and `height`
    #[serde(default)]
    pub crop: bool,

    /// Caller-assigned identifier, unique within a sender
    pub task_id: u64,

    /// Marks the message as a cancellation of `task_id`, not a load
    #[serde(default)]
    pub cancel: bool,

    /// Last-modification time of the source; absence disables persistent
    /// caching for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Whether to consult/populate the persistent cache
    #[serde(default)]
    pub cache: bool,

    /// Lower value is more urgent
    #[serde(default = "default_priority")]
    pub priority: u32,
}

impl LoadImageRequest {
    /// Whether the URL carries embedded (inline) data
    pub fn is_inline_data(&self) -> bool {
        self.url
            .as_deref()
            .map(|u| u.starts_with("data:"))
            .unwrap_or(false)
    }

    /// Derive the persistent cache key: a deterministic JSON serialization
    /// of the request fields that affect output bytes, excluding
    /// flow-control fields.
    ///
    /// Inline data never produces a key: the bytes are already fully
    /// resident, so caching them wastes budget without saving a fetch.
    pub fn cache_key(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        if self.is_inline_data() {
            return None;
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct KeyFields<'a> {
            url: &'a str,
            orientation: Orientation,
            scale: Option<f64>,
            width: Option<u32>,
            height: Option<u32>,
            max_width: Option<u32>,
            max_height: Option<u32>,
        }

        // Struct field order is fixed, so the serialization is stable.
        serde_json::to_string(&KeyFields {
            url,
            orientation: self.orientation,
            scale: self.scale,
            width: self.width,
            height: self.height,
            max_width: self.max_width,
            max_height: self.max_height,
        })
        .ok()
    }

    /// The dimension-affecting view of this request for the geometry engine
    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            scale: self.scale,
            width: self.width,
            height: self.height,
            max_width: self.max_width,
            max_height: self.max_height,
            crop: self.crop,
            orientation: self.orientation,
        }
    }
}

/// Terminal message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Terminal message for one task: success with image data or a typed error
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadImageResponse {
    pub status: ResponseStatus,
    pub task_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Photographic details blob, when the source decoder supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifd: Option<serde_json::Value>,
    /// Image payload as a self-describing data URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl LoadImageResponse {
    pub fn success(
        task_id: u64,
        width: u32,
        height: u32,
        ifd: Option<serde_json::Value>,
        data: String,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            task_id,
            width: Some(width),
            height: Some(height),
            ifd,
            data: Some(data),
        }
    }

    pub fn error(task_id: u64) -> Self {
        Self {
            status: ResponseStatus::Error,
            task_id,
            width: None,
            height: None,
            ifd: None,
            data: None,
        }
    }
}
