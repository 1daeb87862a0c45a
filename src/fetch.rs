//! Source dispatch and fetch collaborators
//!
//! Network fetch and video/PDF/cloud-document thumbnailing are external
//! collaborators; this module only fixes their common contract ("supply
//! MIME-typed bytes or fail") and resolves each request's source kind once,
//! up front, instead of re-inferring it from the URL at every step.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

use crate::error::LoaderError;

/// RAW camera formats handled by the preview materializer
const RAW_EXTENSIONS: &[&str] = &[
    "arw", "cr2", "cr3", "dng", "nef", "nrw", "orf", "raf", "rw2", "srw",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "avi", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ogm", "ogv", "webm",
];

const CLOUD_DOCUMENT_EXTENSIONS: &[&str] = &["gdoc", "gdraw", "gsheet", "gslides"];

/// Closed set of source kinds, resolved once per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `data:` URL, bytes already resident
    InlineData,
    /// Ordinary raster image, decoded directly
    Raster,
    /// RAW camera file, delegated to the preview materializer
    RawPhoto,
    Video,
    Pdf,
    CloudDocument,
}

impl SourceKind {
    pub fn resolve(url: &str) -> Self {
        if url.starts_with("data:") {
            return SourceKind::InlineData;
        }

        let path = url.split(['?', '#']).next().unwrap_or(url);
        let extension = path
            .rsplit('.')
            .next()
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if RAW_EXTENSIONS.contains(&extension.as_str()) {
            SourceKind::RawPhoto
        } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            SourceKind::Video
        } else if extension == "pdf" {
            SourceKind::Pdf
        } else if CLOUD_DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
            SourceKind::CloudDocument
        } else {
            SourceKind::Raster
        }
    }
}

/// MIME-typed bytes from any source collaborator
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub mime_type: String,
    pub data: Bytes,
}

/// Loads raw bytes for a source URL
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBytes, LoaderError>;
}

/// Platform thumbnailer for video/PDF/cloud-document sources
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(&self, url: &str, kind: SourceKind) -> Result<FetchedBytes, LoaderError>;
}

/// Encode bytes as a self-describing data URI
pub fn encode_data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(data))
}

/// Decode a base64 data URI into MIME-typed bytes
pub fn decode_data_uri(uri: &str) -> Result<FetchedBytes, LoaderError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| LoaderError::invalid_request("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| LoaderError::invalid_request("data URI missing payload"))?;

    let (mime_type, is_base64) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    if !is_base64 {
        return Err(LoaderError::invalid_request(
            "only base64 data URIs are supported",
        ));
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| LoaderError::invalid_request(format!("invalid base64 payload: {}", e)))?;

    Ok(FetchedBytes {
        mime_type: if mime_type.is_empty() {
            "application/octet-stream".to_string()
        } else {
            mime_type.to_string()
        },
        data: Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_inline_data() {
        assert_eq!(
            SourceKind::resolve("data:image/png;base64,AAAA"),
            SourceKind::InlineData
        );
    }

    #[test]
    fn test_resolve_raw_extensions() {
        assert_eq!(
            SourceKind::resolve("filesystem:photos/IMG_0001.NEF"),
            SourceKind::RawPhoto
        );
        assert_eq!(
            SourceKind::resolve("filesystem:photos/shot.dng"),
            SourceKind::RawPhoto
        );
    }

    #[test]
    fn test_resolve_delegated_kinds() {
        assert_eq!(SourceKind::resolve("file:///clip.mp4"), SourceKind::Video);
        assert_eq!(SourceKind::resolve("file:///doc.pdf"), SourceKind::Pdf);
        assert_eq!(
            SourceKind::resolve("file:///sheet.gsheet"),
            SourceKind::CloudDocument
        );
    }

    #[test]
    fn test_resolve_default_is_raster() {
        assert_eq!(
            SourceKind::resolve("https://example.com/photo.jpg"),
            SourceKind::Raster
        );
        assert_eq!(SourceKind::resolve("file:///noextension"), SourceKind::Raster);
    }

    #[test]
    fn test_resolve_ignores_query_string() {
        assert_eq!(
            SourceKind::resolve("https://example.com/clip.mp4?token=a.b"),
            SourceKind::Video
        );
    }

    #[test]
    fn test_data_uri_round_trip() {
        let uri = encode_data_uri("image/png", b"pixels");
        assert!(uri.starts_with("data:image/png;base64,"));

        let fetched = decode_data_uri(&uri).unwrap();
        assert_eq!(fetched.mime_type, "image/png");
        assert_eq!(fetched.data, Bytes::from_static(b"pixels"));
    }

    #[test]
    fn test_decode_rejects_non_data_uri() {
        assert!(decode_data_uri("https://example.com/a.png").is_err());
    }

    #[test]
    fn test_decode_rejects_plain_text_payload() {
        assert!(decode_data_uri("data:text/plain,hello").is_err());
    }
}
