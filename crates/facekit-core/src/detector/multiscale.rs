//! Single-face multiscale search.
//!
//! Shrinks the image geometrically until the detector reports exactly one
//! face. Two or more faces at any scale ends the search without a result,
//! as does reaching the minimum side length.

use super::DetectorError;
use crate::types::DetectedFace;
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Default divisor applied to the scale after each empty step.
pub const DEFAULT_SCALE_FACTOR: f64 = 1.1;

/// The search stops once the shorter scaled side drops below this (pixels).
pub const MIN_SEARCH_SIDE: f64 = 10.0;

/// Dimensions of `width × height` scaled by `scale`, truncated to whole pixels.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    (
        (width as f64 * scale) as u32,
        (height as f64 * scale) as u32,
    )
}

/// Resize `image` by `scale` with bilinear filtering.
///
/// The coordinate space of a face returned by the multiscale search is the
/// image produced by this function for the returned scale.
pub fn rescale(image: &RgbImage, scale: f64) -> RgbImage {
    let (w, h) = scaled_dimensions(image.width(), image.height(), scale);
    if (w, h) == image.dimensions() {
        return image.clone();
    }
    imageops::resize(image, w.max(1), h.max(1), FilterType::Triangle)
}

pub(crate) fn search<F>(
    image: &RgbImage,
    scale_factor: f64,
    mut detect: F,
) -> Result<Option<(DetectedFace, f64)>, DetectorError>
where
    F: FnMut(&RgbImage) -> Result<Vec<DetectedFace>, DetectorError>,
{
    if !scale_factor.is_finite() || scale_factor <= 1.0 {
        return Err(DetectorError::InvalidScaleFactor(scale_factor));
    }

    let (orig_w, orig_h) = (image.width() as f64, image.height() as f64);
    let mut scale = 1.0f64;
    let mut steps = 0u32;

    while (scale * orig_h).min(scale * orig_w) >= MIN_SEARCH_SIDE {
        steps += 1;
        let scaled = rescale(image, scale);
        let mut faces = detect(&scaled)?;

        match faces.len() {
            0 => {
                tracing::trace!(scale, "multiscale: no face, shrinking");
                scale /= scale_factor;
            }
            1 => {
                tracing::debug!(scale, steps, "multiscale: single face found");
                return Ok(faces.pop().map(|face| (face, scale)));
            }
            n => {
                tracing::debug!(scale, steps, faces = n, "multiscale: ambiguous, aborting");
                return Ok(None);
            }
        }
    }

    tracing::debug!(steps, "multiscale: reached minimum size without a face");
    Ok(None)
}
