//! RAW preview materializer
//!
//! Consumes the external RAW decoder's structured result and produces a
//! displayable image: either a re-wrapped JPEG byte stream or a synthesized
//! bitmap. The decoder runs out of process and its reported byte offsets and
//! lengths come from third-party-controlled file contents, so every region is
//! bounds-checked against the source buffer before any slice is taken.

mod bitmap;
mod icc;

pub use bitmap::synthesize_bmp;
pub use icc::embed_adobe_rgb_profile;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LoaderError;
use crate::geometry::Orientation;

/// Color space reported by the decoder for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSpace {
    #[default]
    Srgb,
    AdobeRgb,
}

/// Pixel format of a thumbnail region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegionFormat {
    #[default]
    Jpeg,
    /// Packed 8-bit RGB triples, row-major
    Rgb,
}

/// Decoder-reported byte range into the source buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRegion {
    pub offset: usize,
    pub length: usize,
    /// EXIF orientation code (1..=8)
    #[serde(default = "default_orientation_code")]
    pub orientation: u8,
    #[serde(default)]
    pub color_space: ColorSpace,
    #[serde(default)]
    pub format: RegionFormat,
    /// Pixel dimensions; required for RGB regions
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

fn default_orientation_code() -> u8 {
    1
}

/// Structured output of one decode call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDecodeResponse {
    #[serde(default)]
    pub error: Option<String>,
    /// Ready-to-use JPEG region, preferred when present
    #[serde(default)]
    pub preview: Option<RawRegion>,
    #[serde(default)]
    pub thumbnail: Option<RawRegion>,
    /// Photographic detail fields (exposure, aperture, ...)
    #[serde(default)]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

/// External RAW decoder instance
///
/// An instance can enter an unrecoverable failure state; once `is_failed`
/// reports true the instance must not be called again and the host has to
/// restart the decoder subsystem.
#[async_trait]
pub trait RawDecoder: Send + Sync {
    async fn decode(&self, source: &[u8]) -> Result<RawDecodeResponse, LoaderError>;
    fn is_failed(&self) -> bool;
}

/// A displayable image extracted from a RAW file
#[derive(Debug, Clone)]
pub struct MaterializedPreview {
    pub mime_type: String,
    pub data: Bytes,
    /// Orientation still to be cancelled by the transform stage; identity
    /// when the pixels were already remapped during synthesis
    pub orientation: Orientation,
    pub ifd: Option<serde_json::Value>,
}

/// Run the decoder over `source` and materialize its best available region
pub async fn materialize(
    decoder: &dyn RawDecoder,
    source: &[u8],
) -> Result<MaterializedPreview, LoaderError> {
    if decoder.is_failed() {
        return Err(LoaderError::DecoderSubsystem);
    }
    let response = decoder.decode(source).await?;
    // A decode call can be what pushed the instance over; check again before
    // trusting anything it returned.
    if decoder.is_failed() {
        return Err(LoaderError::DecoderSubsystem);
    }
    if let Some(message) = response.error {
        return Err(LoaderError::RawDecodeFailed { message });
    }

    if let Some(region) = response.preview {
        let jpeg = checked_slice(source, &region)?;
        let orientation = Orientation::from_exif(region.orientation);
        let data = wrap_jpeg(jpeg, region.color_space)?;
        debug!(
            bytes = data.len(),
            exif = region.orientation,
            "materialized RAW preview"
        );
        return Ok(MaterializedPreview {
            mime_type: "image/jpeg".to_string(),
            data,
            orientation,
            ifd: filter_details(response.details.as_ref(), orientation),
        });
    }

    if let Some(region) = response.thumbnail {
        let bytes = checked_slice(source, &region)?;
        let orientation = Orientation::from_exif(region.orientation);
        let ifd = filter_details(response.details.as_ref(), orientation);

        return match region.format {
            RegionFormat::Jpeg => Ok(MaterializedPreview {
                mime_type: "image/jpeg".to_string(),
                data: wrap_jpeg(bytes, region.color_space)?,
                orientation,
                ifd,
            }),
            RegionFormat::Rgb => {
                let width = region.width.ok_or_else(|| {
                    LoaderError::decode_failed("RGB thumbnail missing width")
                })?;
                let height = region.height.ok_or_else(|| {
                    LoaderError::decode_failed("RGB thumbnail missing height")
                })?;
                let bmp = synthesize_bmp(bytes, width, height, orientation)?;
                debug!(width, height, "synthesized RAW thumbnail bitmap");
                // Pixels were remapped during synthesis; nothing left to cancel.
                Ok(MaterializedPreview {
                    mime_type: "image/bmp".to_string(),
                    data: Bytes::from(bmp),
                    orientation: Orientation::identity(),
                    ifd,
                })
            }
        };
    }

    Err(LoaderError::RawDecodeFailed {
        message: "decoder returned neither preview nor thumbnail".to_string(),
    })
}

/// Bounds-check a decoder-reported region before slicing. Out-of-range is a
/// hard failure, never a clamp.
fn checked_slice<'a>(source: &'a [u8], region: &RawRegion) -> Result<&'a [u8], LoaderError> {
    let end = region
        .offset
        .checked_add(region.length)
        .filter(|end| *end <= source.len())
        .ok_or(LoaderError::RegionOutOfBounds {
            offset: region.offset,
            length: region.length,
            buffer_size: source.len(),
        })?;
    Ok(&source[region.offset..end])
}

fn wrap_jpeg(jpeg: &[u8], color_space: ColorSpace) -> Result<Bytes, LoaderError> {
    match color_space {
        ColorSpace::AdobeRgb => Ok(Bytes::from(embed_adobe_rgb_profile(jpeg)?)),
        ColorSpace::Srgb => Ok(Bytes::copy_from_slice(jpeg)),
    }
}

/// Filter decoder detail fields down to scalar values, trimming strings and
/// swapping width/height when the applied orientation exchanges axes
fn filter_details(
    details: Option<&HashMap<String, serde_json::Value>>,
    orientation: Orientation,
) -> Option<serde_json::Value> {
    let details = details?;

    let mut filtered = serde_json::Map::new();
    for (key, value) in details {
        match value {
            serde_json::Value::Number(n) => {
                filtered.insert(key.clone(), serde_json::Value::Number(n.clone()));
            }
            serde_json::Value::String(s) => {
                filtered.insert(key.clone(), serde_json::Value::String(s.trim().to_string()));
            }
            _ => {}
        }
    }

    if orientation.swaps_dimensions() {
        let width = filtered.get("width").cloned();
        let height = filtered.get("height").cloned();
        if let Some(h) = height {
            filtered.insert("width".to_string(), h);
        } else {
            filtered.remove("width");
        }
        if let Some(w) = width {
            filtered.insert("height".to_string(), w);
        } else {
            filtered.remove("height");
        }
    }

    if filtered.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(filtered))
    }
}
