//! drawdiff-pipeline: visual diff of drawing revisions (sans-IO).
//!
//! Compares two raster revisions of the same drawing through:
//! decode -> align (oriented FAST + rotated BRIEF, cross-checked matching,
//! RANSAC homography, warp) -> blur + absolute difference + threshold ->
//! dilate/erode -> outer-border regions -> annotated visualization.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and strings and returns structured data. The HTTP surface
//! lives in `drawdiff-server`; the file-based CLI in `drawdiff-bench`.

pub mod align;
pub mod codec;
pub mod compare;
pub mod config;
pub mod crop;
pub mod diagnostics;
pub mod difference;
pub mod features;
pub mod homography;
pub mod matching;
pub mod regions;
pub mod types;
pub mod visualize;

#[cfg(test)]
mod test_support;

pub use align::{AlignmentDiagnostics, AlignmentFailure, AlignmentOutcome};
pub use compare::{
    Comparison, ComparisonResult, compare, compare_with_diagnostics, try_compare,
    try_compare_with_diagnostics,
};
pub use config::{CompareConfig, ConfigOverrides};
pub use crop::{Crop, CropCoords, DEFAULT_PADDING, crop, crop_coords};
pub use diagnostics::{Clock, PipelineDiagnostics, StdClock};
pub use homography::Homography;
pub use types::{ChangeRegion, Dimensions, NormalizedBox, PipelineError, PixelRect, Point};

/// Version of the imaging stack, reported by health checks.
///
/// Must match the `imageproc` pin in the workspace manifest; a test
/// checks the two agree.
pub const IMAGEPROC_VERSION: &str = "0.26";
