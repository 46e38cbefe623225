use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use passport_contracts::pipeline::{GeneratedPhoto, ValidationReport};

use crate::studio::{PhotoGenerator, PhotoValidator, Studio};

/// 35x45 mm at 300 dpi.
const PASSPORT_WIDTH: u32 = 413;
const PASSPORT_HEIGHT: u32 = 531;
const ASPECT_TOLERANCE: f64 = 0.02;
const LIGHT_BACKGROUND_LUMA: f64 = 180.0;

/// Offline stand-in for the AI collaborators. Generation crops and scales
/// to passport dimensions; validation measures the result instead of
/// judging it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunStudio;

impl DryrunStudio {
    pub fn new() -> Self {
        Self
    }
}

impl PhotoGenerator for DryrunStudio {
    fn generate(&self, base64: &str, source_mime_type: &str) -> Result<GeneratedPhoto> {
        let image = decode_image(base64)
            .with_context(|| format!("dryrun could not decode {source_mime_type} upload"))?;
        let passport = image.resize_to_fill(PASSPORT_WIDTH, PASSPORT_HEIGHT, FilterType::Lanczos3);
        let mut encoded = Vec::new();
        passport
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .context("dryrun PNG encode failed")?;
        Ok(GeneratedPhoto::new(BASE64.encode(encoded), "image/png"))
    }
}

impl PhotoValidator for DryrunStudio {
    fn validate(&self, base64: &str, mime_type: &str) -> Result<ValidationReport> {
        let image = decode_image(base64)
            .with_context(|| format!("dryrun could not decode {mime_type} photo"))?;
        let checks = inspect(&image, mime_type);
        let failed = checks.iter().filter(|check| !check.passed).count();
        let mut lines = Vec::with_capacity(checks.len() + 1);
        if failed == 0 {
            lines.push(
                "The photo appears to meet the measurable passport requirements.".to_string(),
            );
        } else {
            lines.push(format!(
                "The photo needs attention: {failed} of {} checks failed.",
                checks.len()
            ));
        }
        for check in &checks {
            let status = if check.passed { "pass" } else { "fail" };
            lines.push(format!("- {}: {} ({status})", check.name, check.detail));
        }
        Ok(ValidationReport::new(lines.join("\n")))
    }
}

impl Studio for DryrunStudio {
    fn name(&self) -> &str {
        "dryrun"
    }
}

struct Check {
    name: &'static str,
    detail: String,
    passed: bool,
}

fn decode_image(base64: &str) -> Result<DynamicImage> {
    let bytes = BASE64
        .decode(base64.as_bytes())
        .context("payload is not valid base64")?;
    image::load_from_memory(&bytes).context("payload is not a supported image")
}

fn inspect(image: &DynamicImage, mime_type: &str) -> Vec<Check> {
    let (width, height) = image.dimensions();
    let target = PASSPORT_WIDTH as f64 / PASSPORT_HEIGHT as f64;
    let ratio = width as f64 / height.max(1) as f64;
    let background = corner_luma(image);

    vec![
        Check {
            name: "Aspect ratio",
            detail: format!("{width}x{height}, expected 35:45"),
            passed: ((ratio - target) / target).abs() <= ASPECT_TOLERANCE,
        },
        Check {
            name: "Resolution",
            detail: format!("at least {PASSPORT_WIDTH}x{PASSPORT_HEIGHT} pixels"),
            passed: width >= PASSPORT_WIDTH && height >= PASSPORT_HEIGHT,
        },
        Check {
            name: "Background",
            detail: format!("corner brightness {background:.0} of 255"),
            passed: background >= LIGHT_BACKGROUND_LUMA,
        },
        Check {
            name: "File type",
            detail: mime_type.to_string(),
            passed: matches!(mime_type, "image/png" | "image/jpeg"),
        },
    ]
}

/// Mean luma of the two top corner patches, where a passport background
/// shows above the shoulders.
fn corner_luma(image: &DynamicImage) -> f64 {
    let luma = image.to_luma8();
    let (width, height) = luma.dimensions();
    let patch_w = (width / 10).max(1);
    let patch_h = (height / 10).max(1);
    let mut total = 0u64;
    let mut count = 0u64;
    for x0 in [0, width.saturating_sub(patch_w)] {
        for y in 0..patch_h.min(height) {
            for x in x0..(x0 + patch_w).min(width) {
                total += luma.get_pixel(x, y).0[0] as u64;
                count += 1;
            }
        }
    }
    if count == 0 {
        return 0.0;
    }
    total as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn encode(image: RgbImage, format: ImageFormat) -> Result<String> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), format)?;
        Ok(BASE64.encode(bytes))
    }

    fn selfie(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let dx = x as i64 - width as i64 / 2;
            let dy = y as i64 - height as i64 / 2;
            if dx * dx + dy * dy < (height as i64 / 4).pow(2) {
                Rgb([150, 110, 90])
            } else {
                Rgb([245, 245, 245])
            }
        })
    }

    #[test]
    fn generate_produces_passport_sized_png() -> Result<()> {
        let upload = encode(selfie(900, 600), ImageFormat::Png)?;
        let photo = DryrunStudio.generate(&upload, "image/png")?;
        assert_eq!(photo.mime_type, "image/png");

        let decoded = image::load_from_memory(&photo.decode_bytes()?)?;
        assert_eq!(decoded.dimensions(), (PASSPORT_WIDTH, PASSPORT_HEIGHT));
        Ok(())
    }

    #[test]
    fn generated_photo_passes_dryrun_validation() -> Result<()> {
        let upload = encode(selfie(1200, 1600), ImageFormat::Jpeg)?;
        let photo = DryrunStudio.generate(&upload, "image/jpeg")?;
        let report = DryrunStudio.validate(&photo.base64, &photo.mime_type)?;

        assert_eq!(
            report.summary(),
            "The photo appears to meet the measurable passport requirements."
        );
        assert_eq!(report.as_str().lines().filter(|line| line.starts_with("- ")).count(), 4);
        Ok(())
    }

    #[test]
    fn validation_flags_small_dark_landscape_photo() -> Result<()> {
        let dark = RgbImage::from_pixel(200, 100, Rgb([20, 20, 20]));
        let report = DryrunStudio.validate(&encode(dark, ImageFormat::Png)?, "image/webp")?;

        assert_eq!(report.summary(), "The photo needs attention: 4 of 4 checks failed.");
        assert!(report.as_str().contains("- Aspect ratio: 200x100, expected 35:45 (fail)"));
        assert!(report.as_str().contains("- File type: image/webp (fail)"));
        Ok(())
    }

    #[test]
    fn undecodable_upload_is_an_error() {
        let err = DryrunStudio.generate("bm90IGFuIGltYWdl", "image/jpeg").unwrap_err();
        assert_eq!(err.to_string(), "dryrun could not decode image/jpeg upload");
        assert!(DryrunStudio.validate("***", "image/png").is_err());
    }
}
