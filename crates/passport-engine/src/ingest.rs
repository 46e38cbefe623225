use std::fs;
use std::path::{Path, PathBuf};

use passport_contracts::pipeline::UploadedImage;
use sha2::{Digest, Sha256};

use crate::PipelineError;

/// Upload hint only; larger files are ingested with a warning.
pub const ADVISORY_MAX_BYTES: usize = 10 * 1024 * 1024;

const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// A user-chosen photo and the media type it was declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub mime_type: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Declares the media type from the file extension, falling back to
    /// sniffing the header bytes when the extension is unknown.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime_type = mime_for_extension(&path)
            .or_else(|| sniff_mime(&path))
            .unwrap_or("image/png");
        Self {
            path,
            mime_type: mime_type.to_string(),
        }
    }
}

pub fn ingest(source: &SourceFile) -> Result<UploadedImage, PipelineError> {
    let bytes = fs::read(&source.path).map_err(|source_err| PipelineError::Io {
        path: source.path.clone(),
        source: source_err,
    })?;
    tracing::debug!(
        path = %source.path.display(),
        bytes = bytes.len(),
        mime_type = %source.mime_type,
        sha256 = %short_digest(&bytes),
        "read source photo"
    );
    Ok(ingest_bytes(&bytes, &source.mime_type))
}

pub fn ingest_bytes(bytes: &[u8], mime_type: &str) -> UploadedImage {
    if bytes.len() > ADVISORY_MAX_BYTES {
        tracing::warn!(
            bytes = bytes.len(),
            limit = ADVISORY_MAX_BYTES,
            "photo exceeds the advisory upload size"
        );
    }
    if !ACCEPTED_MIME_TYPES.contains(&mime_type) {
        tracing::warn!(mime_type, "photo media type is not png, jpeg, or webp");
    }
    UploadedImage::from_bytes(bytes, mime_type)
}

fn short_digest(bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(bytes)[..6])
}

pub fn guess_image_mime(path: &Path) -> &'static str {
    mime_for_extension(path).unwrap_or("image/png")
}

fn mime_for_extension(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn sniff_mime(path: &Path) -> Option<&'static str> {
    let bytes = fs::read(path).ok()?;
    match image::guess_format(&bytes).ok()? {
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}
