//! Keypoint detection and binary description (oriented FAST + rotated BRIEF).
//!
//! Corners are found with [`imageproc::corners::corners_fast9`] on every
//! level of a scale pyramid, thinned with
//! [`imageproc::suppress::local_maxima`], and ranked by corner score.
//! Each surviving corner gets an orientation from the intensity centroid
//! of its neighbourhood and a 256-bit descriptor built from intensity
//! comparisons over a fixed sampling pattern rotated to that orientation.
//!
//! The sampling pattern is generated once from a constant seed, so the
//! same image always yields the same descriptors.

use std::borrow::Cow;
use std::sync::LazyLock;

use image::GrayImage;
use image::imageops::FilterType;
use imageproc::corners::{Corner, corners_fast9};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Number of pyramid levels.
pub const PYRAMID_LEVELS: u32 = 8;

/// Downscale factor between consecutive pyramid levels.
pub const PYRAMID_SCALE: f32 = 1.2;

/// FAST-9 intensity threshold.
pub const FAST_THRESHOLD: u8 = 20;

/// Radius of the disc used for the intensity-centroid orientation.
const ORIENTATION_RADIUS: i32 = 15;

/// Half-extent of the (unrotated) BRIEF sampling window.
const PATTERN_HALF_EXTENT: i32 = 13;

/// Corners closer than this to the image border have no full patch.
/// Covers the orientation disc and the rotated pattern (`13 * sqrt 2`).
const BORDER: u32 = 20;

/// Non-maximum suppression radius in pixels.
const NMS_RADIUS: u32 = 3;

/// Sigma of the smoothing applied before sampling descriptor pairs.
const DESCRIPTOR_SIGMA: f32 = 2.0;

const PATTERN_SEED: u64 = 0x0b5e_55ed_d1ff;

/// A detected keypoint in level-0 (full resolution) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Horizontal position in pixels.
    pub x: f32,
    /// Vertical position in pixels.
    pub y: f32,
    /// Orientation in radians.
    pub angle: f32,
    /// FAST corner score; higher is more salient.
    pub score: f32,
    /// Pyramid level the keypoint was found on.
    pub level: u32,
}

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    /// Number of differing bits.
    #[must_use]
    pub fn hamming(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    fn set_bit(&mut self, bit: usize) {
        self.0[bit / 64] |= 1 << (bit % 64);
    }
}

/// Keypoints with their descriptors; `keypoints[i]` is described by
/// `descriptors[i]`.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    /// Number of detected keypoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Returns `true` if nothing was detected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

type PatternPair = ((i32, i32), (i32, i32));

static PATTERN: LazyLock<Vec<PatternPair>> = LazyLock::new(|| {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut coord = || rng.random_range(-PATTERN_HALF_EXTENT..=PATTERN_HALF_EXTENT);
    (0..256)
        .map(|_| ((coord(), coord()), (coord(), coord())))
        .collect()
});

/// Detect up to `max_features` keypoints in `gray` and describe them.
///
/// The budget is split across pyramid levels geometrically (coarser
/// levels get fewer keypoints), and within a level the highest-scoring
/// corners win.
#[must_use]
pub fn detect_and_describe(gray: &GrayImage, max_features: usize) -> Features {
    let quotas = level_quotas(max_features);
    let mut features = Features::default();

    for (level, quota) in (0..PYRAMID_LEVELS).zip(quotas) {
        let scale = PYRAMID_SCALE.powi(i32::try_from(level).unwrap_or(i32::MAX));
        let Some(level_image) = pyramid_level(gray, scale) else {
            break;
        };
        if quota == 0 {
            continue;
        }

        let corners = level_corners(&level_image, quota);
        if corners.is_empty() {
            continue;
        }

        let smoothed = imageproc::filter::gaussian_blur_f32(&level_image, DESCRIPTOR_SIGMA);
        for corner in corners {
            let angle = orientation(&level_image, corner.x, corner.y);
            features.descriptors.push(describe(&smoothed, corner.x, corner.y, angle));
            #[allow(clippy::cast_precision_loss)]
            features.keypoints.push(Keypoint {
                x: corner.x as f32 * scale,
                y: corner.y as f32 * scale,
                angle,
                score: corner.score,
                level,
            });
        }
    }

    tracing::debug!(
        keypoints = features.len(),
        width = gray.width(),
        height = gray.height(),
        "detected keypoints"
    );
    features
}

/// Split `total` across pyramid levels proportionally to `scale^-level`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn level_quotas(total: usize) -> Vec<usize> {
    let factor = 1.0 / f64::from(PYRAMID_SCALE);
    let levels = i32::try_from(PYRAMID_LEVELS).unwrap_or(i32::MAX);
    let first = total as f64 * (1.0 - factor) / (1.0 - factor.powi(levels));

    let mut quotas = Vec::with_capacity(PYRAMID_LEVELS as usize);
    let mut assigned = 0;
    let mut share = first;
    for _ in 1..PYRAMID_LEVELS {
        let quota = (share.round() as usize).min(total - assigned);
        quotas.push(quota);
        assigned += quota;
        share *= factor;
    }
    quotas.push(total - assigned);
    quotas
}

/// The pyramid image at `scale`, or `None` once it is too small to hold
/// a single full patch.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn pyramid_level(gray: &GrayImage, scale: f32) -> Option<Cow<'_, GrayImage>> {
    let width = (gray.width() as f32 / scale).round() as u32;
    let height = (gray.height() as f32 / scale).round() as u32;
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return None;
    }
    if width == gray.width() && height == gray.height() {
        return Some(Cow::Borrowed(gray));
    }
    Some(Cow::Owned(image::imageops::resize(
        gray,
        width,
        height,
        FilterType::Triangle,
    )))
}

/// FAST corners away from the border, suppressed and ranked, at most `quota`.
fn level_corners(image: &GrayImage, quota: usize) -> Vec<Corner> {
    let (width, height) = image.dimensions();
    let candidates: Vec<Corner> = corners_fast9(image, FAST_THRESHOLD)
        .into_iter()
        .filter(|c| {
            c.x >= BORDER && c.y >= BORDER && c.x < width - BORDER && c.y < height - BORDER
        })
        .collect();

    let mut corners = imageproc::suppress::local_maxima(&candidates, NMS_RADIUS);
    corners.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.y.cmp(&b.y))
            .then(a.x.cmp(&b.x))
    });
    corners.truncate(quota);
    corners
}

fn intensity(image: &GrayImage, x: i64, y: i64) -> f32 {
    let x = u32::try_from(x.clamp(0, i64::from(image.width()) - 1)).unwrap_or(0);
    let y = u32::try_from(y.clamp(0, i64::from(image.height()) - 1)).unwrap_or(0);
    f32::from(image.get_pixel(x, y).0[0])
}

/// Intensity-centroid orientation over a disc around `(cx, cy)`.
#[allow(clippy::cast_precision_loss)]
fn orientation(image: &GrayImage, cx: u32, cy: u32) -> f32 {
    let (cx, cy) = (i64::from(cx), i64::from(cy));
    let r = i64::from(ORIENTATION_RADIUS);
    let mut m10 = 0.0_f32;
    let mut m01 = 0.0_f32;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = intensity(image, cx + dx, cy + dy);
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

/// Rotated BRIEF descriptor sampled from the smoothed level image.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn describe(smoothed: &GrayImage, cx: u32, cy: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let (cx, cy) = (i64::from(cx), i64::from(cy));
    let sample = |(px, py): (i32, i32)| {
        let (px, py) = (px as f32, py as f32);
        let rx = cos.mul_add(px, -sin * py).round() as i64;
        let ry = sin.mul_add(px, cos * py).round() as i64;
        intensity(smoothed, cx + rx, cy + ry)
    };

    let mut descriptor = Descriptor::default();
    for (bit, &(p, q)) in PATTERN.iter().enumerate() {
        if sample(p) < sample(q) {
            descriptor.set_bit(bit);
        }
    }
    descriptor
}
