//! Thresholded difference mask between two registered images.
//!
//! Both images are reduced to intensity, smoothed with a Gaussian sized
//! from a square kernel side, subtracted, and binarised. The binary mask
//! is then dilated (to merge nearby changes into blobs) and eroded (to
//! trim what the dilation grew).

use image::{GrayImage, imageops};
use imageproc::distance_transform::Norm;

use crate::config::CompareConfig;
use crate::types::{Dimensions, PipelineError, RgbImage};

/// Mask value for changed pixels.
pub const CHANGED: u8 = 255;

/// Gaussian sigma implied by a square kernel of side `kernel`.
///
/// Returns `None` for a side of 1 (or 0), which means "no smoothing".
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn kernel_sigma(kernel: u32) -> Option<f32> {
    if kernel <= 1 {
        return None;
    }
    let half = (kernel as f32 - 1.0) / 2.0;
    Some(0.3f32.mul_add(half - 1.0, 0.8))
}

/// Smooth `gray` with the Gaussian implied by a `kernel`-sided square.
#[must_use = "returns the blurred image"]
pub fn blur(gray: &GrayImage, kernel: u32) -> GrayImage {
    match kernel_sigma(kernel) {
        Some(sigma) => imageproc::filter::gaussian_blur_f32(gray, sigma),
        None => gray.clone(),
    }
}

/// Per-pixel `|a - b|`.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the images differ in
/// size.
pub fn abs_difference(a: &GrayImage, b: &GrayImage) -> Result<GrayImage, PipelineError> {
    if a.dimensions() != b.dimensions() {
        return Err(PipelineError::DimensionMismatch {
            expected: Dimensions::of(a),
            actual: Dimensions::of(b),
        });
    }
    Ok(GrayImage::from_fn(a.width(), a.height(), |x, y| {
        image::Luma([a.get_pixel(x, y).0[0].abs_diff(b.get_pixel(x, y).0[0])])
    }))
}

/// Binarise: values at or above `threshold` become [`CHANGED`], the rest 0.
#[must_use = "returns the binary mask"]
pub fn threshold(diff: &GrayImage, threshold: u8) -> GrayImage {
    let mut mask = diff.clone();
    for p in mask.pixels_mut() {
        p.0[0] = if p.0[0] >= threshold { CHANGED } else { 0 };
    }
    mask
}

/// Largest radius handed to a single `imageproc` morphology call. Its
/// distance transform saturates at 255, so a radius of 255 would treat
/// every pixel as within reach.
const MAX_RADIUS_PER_CALL: u8 = u8::MAX - 1;

/// Apply `op` at chessboard radius `radius`, split into calls no larger
/// than [`MAX_RADIUS_PER_CALL`]. Radii add under composition.
fn morph(mask: GrayImage, radius: u8, op: fn(&GrayImage, Norm, u8) -> GrayImage) -> GrayImage {
    let mut out = mask;
    let mut left = radius;
    while left > 0 {
        let step = left.min(MAX_RADIUS_PER_CALL);
        out = op(&out, Norm::LInf, step);
        left -= step;
    }
    out
}

/// Dilate then erode with a 3×3 square element, `dilate` and `erode`
/// times respectively.
///
/// `n` passes of a 3×3 square equal one pass at chessboard radius `n`.
#[must_use = "returns the cleaned mask"]
pub fn close_gaps(mask: &GrayImage, dilate: u8, erode: u8) -> GrayImage {
    let grown = morph(mask.clone(), dilate, imageproc::morphology::dilate);
    morph(grown, erode, imageproc::morphology::erode)
}

/// Output of [`difference`].
#[derive(Debug, Clone)]
pub struct Difference {
    /// Absolute intensity difference after smoothing.
    pub diff: GrayImage,
    /// Cleaned binary change mask (0 or [`CHANGED`]).
    pub mask: GrayImage,
}

/// Difference two equally-sized images.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the images differ in
/// size.
pub fn difference(
    a: &RgbImage,
    b: &RgbImage,
    config: &CompareConfig,
) -> Result<Difference, PipelineError> {
    let a = blur(&imageops::grayscale(a), config.blur_kernel);
    let b = blur(&imageops::grayscale(b), config.blur_kernel);
    let diff = abs_difference(&a, &b)?;
    let raw = threshold(&diff, config.diff_threshold);
    let mask = close_gaps(&raw, config.dilate_iterations, config.erode_iterations);

    tracing::debug!(
        changed = mask.pixels().filter(|p| p.0[0] == CHANGED).count(),
        "difference mask built"
    );

    Ok(Difference { diff, mask })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    use super::*;

    fn count_changed(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] == CHANGED).count()
    }

    #[test]
    fn sigma_for_default_kernel() {
        let sigma = kernel_sigma(5).unwrap();
        assert!((sigma - 1.1).abs() < 1e-6);
        assert!(kernel_sigma(1).is_none());
        assert!((kernel_sigma(3).unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn threshold_is_inclusive() {
        let diff = GrayImage::from_raw(3, 1, vec![29, 30, 31]).unwrap();
        let mask = threshold(&diff, 30);
        assert_eq!(mask.as_raw(), &vec![0, CHANGED, CHANGED]);
    }

    #[test]
    fn abs_difference_is_symmetric() {
        let a = GrayImage::from_raw(2, 1, vec![10, 200]).unwrap();
        let b = GrayImage::from_raw(2, 1, vec![50, 20]).unwrap();
        assert_eq!(abs_difference(&a, &b).unwrap().as_raw(), &vec![40, 180]);
        assert_eq!(abs_difference(&b, &a).unwrap().as_raw(), &vec![40, 180]);
    }

    #[test]
    fn abs_difference_rejects_mismatched_sizes() {
        let a = GrayImage::new(4, 4);
        let b = GrayImage::new(4, 5);
        assert!(matches!(
            abs_difference(&a, &b),
            Err(PipelineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn dilation_grows_a_pixel_into_a_square() {
        let mut mask = GrayImage::new(11, 11);
        mask.put_pixel(5, 5, image::Luma([CHANGED]));
        let grown = close_gaps(&mask, 2, 0);
        assert_eq!(count_changed(&grown), 25);
        let closed = close_gaps(&mask, 2, 1);
        assert_eq!(count_changed(&closed), 9);
    }

    #[test]
    fn dilation_bridges_nearby_blobs() {
        let mut mask = GrayImage::new(20, 5);
        draw_filled_rect_mut(&mut mask, Rect::at(2, 1).of_size(4, 3), image::Luma([CHANGED]));
        draw_filled_rect_mut(&mut mask, Rect::at(9, 1).of_size(4, 3), image::Luma([CHANGED]));
        let closed = close_gaps(&mask, 2, 1);
        // The 3-pixel gap between the blocks is filled.
        for x in 6..9 {
            assert_eq!(closed.get_pixel(x, 2).0[0], CHANGED);
        }
    }

    #[test]
    fn empty_mask_stays_empty() {
        let mask = GrayImage::new(8, 8);
        assert_eq!(count_changed(&close_gaps(&mask, 255, 1)), 0);
        assert_eq!(count_changed(&close_gaps(&mask, 255, 255)), 0);
    }

    #[test]
    fn maximum_dilation_grows_by_exactly_255() {
        let mut mask = GrayImage::new(600, 600);
        mask.put_pixel(300, 300, image::Luma([CHANGED]));
        let grown = close_gaps(&mask, u8::MAX, 0);
        assert_eq!(count_changed(&grown), 511 * 511);
        assert_eq!(grown.get_pixel(45, 45).0[0], CHANGED);
        assert_eq!(grown.get_pixel(44, 300).0[0], 0);
        assert_eq!(grown.get_pixel(300, 556).0[0], 0);
    }

    #[test]
    fn maximum_dilation_then_erosion_restores_a_block() {
        let mut mask = GrayImage::new(600, 600);
        draw_filled_rect_mut(&mut mask, Rect::at(295, 295).of_size(10, 10), image::Luma([CHANGED]));
        let closed = close_gaps(&mask, u8::MAX, u8::MAX);
        assert_eq!(closed, mask);
    }

    #[test]
    fn fully_changed_mask_survives_maximum_erosion() {
        let mask = GrayImage::from_pixel(64, 48, image::Luma([CHANGED]));
        assert_eq!(close_gaps(&mask, 0, u8::MAX), mask);
        assert_eq!(close_gaps(&mask, u8::MAX, u8::MAX), mask);
    }

    #[test]
    fn identical_images_have_no_changes() {
        let img = crate::test_support::drawing_rgb(120, 90);
        let d = difference(&img, &img, &CompareConfig::DEFAULT).unwrap();
        assert_eq!(count_changed(&d.mask), 0);
        assert!(d.diff.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn added_block_is_detected() {
        let a = RgbImage::from_pixel(100, 100, image::Rgb([255, 255, 255]));
        let mut b = a.clone();
        draw_filled_rect_mut(&mut b, Rect::at(40, 40).of_size(20, 20), image::Rgb([0, 0, 0]));
        let d = difference(&a, &b, &CompareConfig::DEFAULT).unwrap();
        assert_eq!(d.mask.get_pixel(50, 50).0[0], CHANGED);
        assert_eq!(d.mask.get_pixel(5, 5).0[0], 0);
    }
}
