//! Feature-based registration of the comparison image onto the reference.
//!
//! Failure here is recoverable: the outcome always carries an image the
//! rest of the pipeline can difference against, and the reason alignment
//! did not happen travels in [`AlignmentOutcome::result`] and the
//! serialized [`AlignmentDiagnostics`].

use image::imageops;
use imageproc::geometric_transformations::{Interpolation, warp_into};
use serde::{Deserialize, Serialize};

use crate::config::CompareConfig;
use crate::features::{Features, detect_and_describe};
use crate::homography::{
    Homography, MIN_CORRESPONDENCES, RANSAC_REPROJECTION_THRESHOLD, find_homography,
};
use crate::matching::{Match, cross_check_match, retained_count};
use crate::types::{Point, RgbImage};

const WHITE: image::Rgb<u8> = image::Rgb([255, 255, 255]);

/// Why alignment fell back to the unwarped comparison image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AlignmentFailure {
    /// One of the images produced no descriptors.
    #[error("No features detected")]
    NoFeatures,
    /// Fewer than four matches survived cross-checking.
    #[error("Not enough feature matches")]
    NotEnoughMatches,
    /// RANSAC found no usable transform.
    #[error("Homography computation failed")]
    HomographyFailed,
}

/// Alignment statistics as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentDiagnostics {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Keypoints found in the reference image.
    pub total_features_ref: usize,
    /// Keypoints found in the image being aligned.
    pub total_features_align: usize,
    /// Cross-checked matches before retention.
    pub total_matches: usize,
    /// Matches handed to the homography estimator.
    pub good_matches: usize,
    /// Matches consistent with the estimated transform.
    pub inliers: usize,
    /// Comparison-to-reference transform, row-major; `null` on failure.
    pub homography: Option<[[f64; 3]; 3]>,
}

/// Result of [`align`].
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    /// Comparison image in the reference frame, or unchanged on failure.
    pub aligned: RgbImage,
    pub result: Result<Homography, AlignmentFailure>,
    pub diagnostics: AlignmentDiagnostics,
}

impl AlignmentOutcome {
    /// Returns `true` if a transform was estimated and applied.
    #[must_use]
    pub const fn is_aligned(&self) -> bool {
        self.result.is_ok()
    }
}

struct Counts {
    features_ref: usize,
    features_align: usize,
    matches: usize,
    good: usize,
    inliers: usize,
}

fn failed(to_align: &RgbImage, failure: AlignmentFailure, counts: &Counts) -> AlignmentOutcome {
    tracing::warn!(reason = %failure, "alignment failed, continuing unaligned");
    AlignmentOutcome {
        aligned: to_align.clone(),
        result: Err(failure),
        diagnostics: AlignmentDiagnostics {
            success: false,
            error: Some(failure.to_string()),
            total_features_ref: counts.features_ref,
            total_features_align: counts.features_align,
            total_matches: counts.matches,
            good_matches: counts.good,
            inliers: counts.inliers,
            homography: None,
        },
    }
}

fn keypoint_position(features: &Features, index: usize) -> Point {
    let kp = &features.keypoints[index];
    Point::new(f64::from(kp.x), f64::from(kp.y))
}

/// Warp `image` through `h` into a `width` x `height` white canvas.
///
/// Bilinear sampling treats the last source row and column as out of
/// bounds, so the source gets a one-pixel white frame first and the
/// transform is shifted to match.
fn warp(image: &RgbImage, h: &Homography, width: u32, height: u32) -> Option<RgbImage> {
    let mut framed = RgbImage::from_pixel(image.width() + 2, image.height() + 2, WHITE);
    imageops::replace(&mut framed, image, 1, 1);
    let projection = h.pre_translate(-1.0, -1.0).to_projection()?;

    let mut out = RgbImage::new(width, height);
    warp_into(&framed, &projection, Interpolation::Bilinear, WHITE, &mut out);
    Some(out)
}

/// Warp `to_align` into the pixel grid of `reference`.
///
/// Keypoints are detected in both images (at most
/// `config.max_features` each), cross-check matched, and the best
/// `config.good_match_percent` of matches (never fewer than four) feed a
/// RANSAC homography. Exposed border pixels are filled with white.
#[must_use]
pub fn align(
    reference: &RgbImage,
    to_align: &RgbImage,
    config: &CompareConfig,
) -> AlignmentOutcome {
    let max_features = usize::try_from(config.max_features).unwrap_or(usize::MAX);
    let ref_features = detect_and_describe(&imageops::grayscale(reference), max_features);
    let align_features = detect_and_describe(&imageops::grayscale(to_align), max_features);

    let mut counts = Counts {
        features_ref: ref_features.len(),
        features_align: align_features.len(),
        matches: 0,
        good: 0,
        inliers: 0,
    };
    tracing::debug!(
        reference = counts.features_ref,
        to_align = counts.features_align,
        "features detected"
    );

    if ref_features.is_empty() || align_features.is_empty() {
        return failed(to_align, AlignmentFailure::NoFeatures, &counts);
    }

    let matches = cross_check_match(&ref_features.descriptors, &align_features.descriptors);
    counts.matches = matches.len();
    let good: &[Match] = &matches[..retained_count(matches.len(), config.good_match_percent)];
    counts.good = good.len();
    tracing::debug!(total = counts.matches, good = counts.good, "descriptors matched");

    if good.len() < MIN_CORRESPONDENCES {
        return failed(to_align, AlignmentFailure::NotEnoughMatches, &counts);
    }

    let src: Vec<Point> = good
        .iter()
        .map(|m| keypoint_position(&align_features, m.comparison))
        .collect();
    let dst: Vec<Point> = good
        .iter()
        .map(|m| keypoint_position(&ref_features, m.reference))
        .collect();

    let Some(estimate) = find_homography(&src, &dst, RANSAC_REPROJECTION_THRESHOLD) else {
        return failed(to_align, AlignmentFailure::HomographyFailed, &counts);
    };
    counts.inliers = estimate.inlier_count();

    let (width, height) = reference.dimensions();
    let Some(aligned) = warp(to_align, &estimate.homography, width, height) else {
        return failed(to_align, AlignmentFailure::HomographyFailed, &counts);
    };

    tracing::info!(inliers = counts.inliers, good = counts.good, "images aligned");

    AlignmentOutcome {
        aligned,
        result: Ok(estimate.homography),
        diagnostics: AlignmentDiagnostics {
            success: true,
            error: None,
            total_features_ref: counts.features_ref,
            total_features_align: counts.features_align,
            total_matches: counts.matches,
            good_matches: counts.good,
            inliers: counts.inliers,
            homography: Some(estimate.homography.to_rows()),
        },
    }
}
