//! Shared types for the drawdiff comparison pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// decoded and aligned images without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `DynamicImage`, the codec's in-memory raster type.
pub use image::DynamicImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any `image` buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in pixel units, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Center-based box in normalized units, all fields relative to the
/// reference image width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    /// Center x in `[0, 1]`.
    pub x: f64,
    /// Center y in `[0, 1]`.
    pub y: f64,
    /// Width as a fraction of image width.
    pub width: f64,
    /// Height as a fraction of image height.
    pub height: f64,
}

/// A detected cluster of difference pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRegion {
    /// 1-based rank; 1 is the largest region.
    pub region_id: u32,
    /// Normalized center-based bounding box.
    pub bounding_box: NormalizedBox,
    /// Bounding box in reference image pixels.
    pub pixel_coords: PixelRect,
    /// Area enclosed by the region border, in pixels.
    pub area_pixels: u64,
    /// `area_pixels` as a percentage of the image area, 2 decimal places.
    pub area_percent: f64,
}

/// Errors that abort a comparison or crop request.
///
/// Alignment problems are reported through
/// [`crate::align::AlignmentFailure`] and never abort a comparison.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The transport payload was not valid base64.
    #[error("failed to decode base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid comparison configuration: {0}")]
    InvalidConfig(String),

    /// Crop parameters are invalid.
    #[error("invalid crop request: {0}")]
    InvalidCrop(String),

    /// Failed to encode an output image.
    #[error("failed to encode image: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// Two rasters that must share a size do not.
    #[error("image dimensions differ: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },
}
