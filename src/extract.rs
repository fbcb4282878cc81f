//! Derived-asset collaborator boundary.
//!
//! Metadata extraction and thumbnail generation happen behind
//! [`MediaExtractor`]; the reconciler calls it once per (re)indexed file and
//! treats any failure as recoverable for that file only.

use std::path::Path;

use rusqlite::Connection;

use crate::error::{EngineError, Result};
use crate::types::ExtractedMedia;
use crate::utils::config::PackagePaths;

/// Extracts metadata and derives the preview asset for one source file.
/// `content_hash` is the file's blake3 hash when one was computed; derived
/// assets are keyed by it so identical content shares one asset.
pub trait MediaExtractor: Send + Sync {
    fn extract(
        &self,
        source: &Path,
        library_root: &Path,
        content_hash: Option<&[u8]>,
        conn: &Connection,
    ) -> Result<ExtractedMedia>;
}

/// Default extractor: header-level dimension probe via the `image` crate and
/// a content-hash-derived thumb path. Pixel work (decode, resize, encode)
/// stays outside this crate; collaborators that generate real previews write
/// to the same derived path.
pub struct DimensionProbe;

impl MediaExtractor for DimensionProbe {
    fn extract(
        &self,
        source: &Path,
        _library_root: &Path,
        content_hash: Option<&[u8]>,
        _conn: &Connection,
    ) -> Result<ExtractedMedia> {
        let format = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        // Raw formats are opaque to the probe; dimensions stay unset.
        let (width, height) = match image::image_dimensions(source) {
            Ok((w, h)) => (Some(w), Some(h)),
            Err(image::ImageError::IoError(e)) => {
                return Err(EngineError::io(source, e));
            }
            Err(_) => (None, None),
        };

        let thumb_path = content_hash.map(|hash| {
            let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
            format!("{}/{}.jpg", PackagePaths::THUMBS_DIR_NAME, hex)
        });

        Ok(ExtractedMedia {
            width,
            height,
            format,
            thumb_path,
        })
    }
}

/// Extractor that records nothing (tests and metadata-free deployments).
pub struct NullExtractor;

impl MediaExtractor for NullExtractor {
    fn extract(
        &self,
        source: &Path,
        _library_root: &Path,
        _content_hash: Option<&[u8]>,
        _conn: &Connection,
    ) -> Result<ExtractedMedia> {
        let format = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        Ok(ExtractedMedia {
            format,
            ..ExtractedMedia::default()
        })
    }
}
