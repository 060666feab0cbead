//! Crop a padded region of interest out of an image.
//!
//! The box is given centre-based in normalized units (the same shape as
//! [`ChangeRegion::bounding_box`](crate::types::ChangeRegion)). Padding
//! grows each side by `padding` of the box extent, so the box is scaled by
//! `1 + 2 * padding` in each dimension and then capped at the full image.

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::types::{NormalizedBox, PipelineError};

/// Padding used when the caller gives none.
pub const DEFAULT_PADDING: f64 = 0.1;

/// Absolute pixel corners of a crop; `x2`/`y2` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropCoords {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropCoords {
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// A cropped image and the coordinates it was cut from.
#[derive(Debug, Clone)]
pub struct Crop {
    pub image: DynamicImage,
    pub coords: CropCoords,
}

/// One axis: `[lo, hi)` with `0 <= lo < hi <= extent`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn span(center: f64, size: f64, padding: f64, extent: u32) -> (u32, u32) {
    let padded = (size * 2.0f64.mul_add(padding, 1.0)).min(1.0);
    let full = f64::from(extent);
    let lo = ((center - padded / 2.0) * full).max(0.0) as u32;
    let hi = ((center + padded / 2.0) * full).min(full) as u32;
    let lo = lo.min(extent.saturating_sub(1));
    let hi = hi.max(lo + 1).min(extent);
    (lo, hi)
}

fn validate(bbox: &NormalizedBox, padding: f64) -> Result<(), PipelineError> {
    let fields = [
        ("x", bbox.x),
        ("y", bbox.y),
        ("width", bbox.width),
        ("height", bbox.height),
        ("padding", padding),
    ];
    if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(PipelineError::InvalidCrop(format!(
            "{name} must be finite, got {value}"
        )));
    }
    for (name, value) in [
        ("width", bbox.width),
        ("height", bbox.height),
        ("padding", padding),
    ] {
        if value < 0.0 {
            return Err(PipelineError::InvalidCrop(format!(
                "{name} must be non-negative, got {value}"
            )));
        }
    }
    Ok(())
}

/// Pixel corners for cropping `bbox` (grown by `padding`) out of an
/// image of `width` x `height`.
///
/// The result always satisfies `0 <= x1 < x2 <= width` and
/// `0 <= y1 < y2 <= height`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidCrop`] if any value is not finite, if
/// the box size or padding is negative, or if the image is empty.
pub fn crop_coords(
    width: u32,
    height: u32,
    bbox: &NormalizedBox,
    padding: f64,
) -> Result<CropCoords, PipelineError> {
    validate(bbox, padding)?;
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidCrop("image is empty".to_owned()));
    }
    let (x1, x2) = span(bbox.x, bbox.width, padding, width);
    let (y1, y2) = span(bbox.y, bbox.height, padding, height);
    Ok(CropCoords { x1, y1, x2, y2 })
}

/// Cut the padded `bbox` out of `image`.
///
/// # Errors
///
/// See [`crop_coords`].
pub fn crop(
    image: &DynamicImage,
    bbox: &NormalizedBox,
    padding: f64,
) -> Result<Crop, PipelineError> {
    let (width, height) = image.dimensions();
    let coords = crop_coords(width, height, bbox, padding)?;
    tracing::debug!(?coords, "cropping");
    Ok(Crop {
        image: image.crop_imm(coords.x1, coords.y1, coords.width(), coords.height()),
        coords,
    })
}
