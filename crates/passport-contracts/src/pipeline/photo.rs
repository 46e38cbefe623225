use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const DOWNLOAD_STEM: &str = "passport_photo";

/// A user photo after ingestion: the bare base64 payload plus the full
/// `data:` URL used for previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub base64: String,
    pub preview_url: String,
    pub mime_type: String,
    pub byte_len: usize,
}

impl UploadedImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        let base64 = BASE64.encode(bytes);
        let preview_url = encode_data_url(mime_type, &base64);
        Self {
            base64,
            preview_url,
            mime_type: mime_type.to_string(),
            byte_len: bytes.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPhoto {
    pub base64: String,
    pub mime_type: String,
}

impl GeneratedPhoto {
    pub fn new(base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            base64: base64.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn data_url(&self) -> String {
        encode_data_url(&self.mime_type, &self.base64)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.base64.as_bytes())
            .context("generated photo is not valid base64")
    }

    pub fn download_filename(&self) -> String {
        download_filename(&self.mime_type)
    }

    /// Decodes the payload and writes `passport_photo.<ext>` into `dir`.
    pub fn write_download(&self, dir: &Path) -> Result<PathBuf> {
        let bytes = self.decode_bytes()?;
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(self.download_filename());
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Free-form compliance text. No schema is assumed; see
/// [`crate::report::present_report`] for the display conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationReport(String);

impl ValidationReport {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn summary(&self) -> &str {
        self.0.lines().next().unwrap_or_default().trim()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

pub fn encode_data_url(mime_type: &str, base64: &str) -> String {
    format!("data:{mime_type};base64,{base64}")
}

/// Splits a `data:<mime>;base64,<payload>` URL. The payload is everything
/// after the first comma.
pub fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or_default().trim();
    Some((mime.to_string(), payload.to_string()))
}

pub fn download_extension(mime_type: &str) -> String {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    essence
        .split_once('/')
        .map(|(_, subtype)| subtype.trim())
        .filter(|subtype| !subtype.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "png".to_string())
}

pub fn download_filename(mime_type: &str) -> String {
    format!("{DOWNLOAD_STEM}.{}", download_extension(mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_url_round_trips_to_payload() {
        let image = UploadedImage::from_bytes(&[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10], "image/jpeg");
        assert_eq!(image.preview_url, format!("data:image/jpeg;base64,{}", image.base64));

        let (mime, payload) = split_data_url(&image.preview_url).unwrap_or_default();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(payload, image.base64);
        assert_eq!(image.byte_len, 6);
    }

    #[test]
    fn split_data_url_rejects_plain_strings() {
        assert_eq!(split_data_url("image/png;base64,AAAA"), None);
        assert_eq!(split_data_url("data:image/png;base64"), None);
    }

    #[test]
    fn download_extension_uses_subtype_with_png_fallback() {
        assert_eq!(download_extension("image/jpeg"), "jpeg");
        assert_eq!(download_extension("image/webp"), "webp");
        assert_eq!(download_extension("image/PNG; q=1"), "png");
        assert_eq!(download_extension(""), "png");
        assert_eq!(download_extension("image/"), "png");
        assert_eq!(download_extension("octet"), "png");
        assert_eq!(download_filename("image/jpeg"), "passport_photo.jpeg");
    }

    #[test]
    fn write_download_decodes_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let photo = GeneratedPhoto::new(BASE64.encode(b"png-bytes"), "image/png");
        let path = photo.write_download(&temp.path().join("out"))?;

        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("passport_photo.png"));
        assert_eq!(fs::read(&path)?, b"png-bytes");
        assert_eq!(photo.data_url(), format!("data:image/png;base64,{}", photo.base64));
        Ok(())
    }

    #[test]
    fn write_download_rejects_corrupt_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let photo = GeneratedPhoto::new("%%%not-base64%%%", "image/png");
        assert!(photo.write_download(temp.path()).is_err());
        assert!(!temp.path().join("passport_photo.png").exists());
        Ok(())
    }

    #[test]
    fn report_summary_is_first_line() {
        let report = ValidationReport::new("  Looks compliant.\n- Neutral background\n");
        assert_eq!(report.summary(), "Looks compliant.");
        assert_eq!(ValidationReport::new("").summary(), "");
    }
}
