use anyhow::{Context, Result};
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::path::Path;

/// Decode `path` into upright RGB8, applying the EXIF orientation the
/// decoder reports.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let mut decoder = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", path.display()))?
        .into_decoder()
        .with_context(|| format!("unsupported image format: {}", path.display()))?;

    let orientation = decoder
        .orientation()
        .with_context(|| format!("failed to read orientation of {}", path.display()))?;
    let mut image =
        DynamicImage::from_decoder(decoder).with_context(|| format!("failed to decode {}", path.display()))?;
    image.apply_orientation(orientation);

    let rgb = image.to_rgb8();
    tracing::debug!(path = %path.display(), width = rgb.width(), height = rgb.height(), ?orientation, "image loaded");
    Ok(rgb)
}
