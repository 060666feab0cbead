//! Planar homography estimation: normalized DLT inside a RANSAC loop.
//!
//! [`find_homography`] maps `src` points onto `dst` points. Minimal
//! four-point samples are drawn from a seeded RNG, so identical input
//! always produces the identical transform. The best consensus set is
//! refit with all of its inliers.

use nalgebra::{Matrix3, SMatrix, Vector2, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Minimum number of correspondences that determine a homography.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Reprojection tolerance (pixels) for counting a correspondence as an inlier.
pub const RANSAC_REPROJECTION_THRESHOLD: f64 = 5.0;

const RANSAC_MAX_ITERATIONS: usize = 2000;
const RANSAC_CONFIDENCE: f64 = 0.995;
const RANSAC_SEED: u64 = 0x4a5c_1e55;

/// Twice the triangle area below which three sample points count as collinear.
const COLLINEAR_EPSILON: f64 = 1e-3;

/// A 3×3 projective transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[[f64; 3]; 3]", from = "[[f64; 3]; 3]")]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// The underlying matrix.
    #[must_use]
    pub const fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Row-major copy of the matrix.
    #[must_use]
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.0;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    /// Map a point; `None` if it lands on the line at infinity.
    #[must_use]
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.0 * Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < f64::EPSILON {
            return None;
        }
        Some(Point::new(v.x / v.z, v.y / v.z))
    }

    /// `self` applied after translating input points by `(dx, dy)`.
    #[must_use]
    pub fn pre_translate(&self, dx: f64, dy: f64) -> Self {
        Self(self.0 * Matrix3::new_translation(&Vector2::new(dx, dy)))
    }

    /// Convert to an `imageproc` projection for warping.
    ///
    /// Returns `None` if the matrix is not invertible in `f32`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_projection(&self) -> Option<imageproc::geometric_transformations::Projection> {
        let r = self.to_rows();
        imageproc::geometric_transformations::Projection::from_matrix([
            r[0][0] as f32,
            r[0][1] as f32,
            r[0][2] as f32,
            r[1][0] as f32,
            r[1][1] as f32,
            r[1][2] as f32,
            r[2][0] as f32,
            r[2][1] as f32,
            r[2][2] as f32,
        ])
    }

    /// Scale so the bottom-right element is 1; `None` if that is impossible
    /// or any element is not finite.
    fn normalized(m: Matrix3<f64>) -> Option<Self> {
        let h22 = m[(2, 2)];
        if h22.abs() < 1e-12 {
            return None;
        }
        let m = m / h22;
        if m.iter().all(|v| v.is_finite()) && m.determinant().abs() > 1e-12 {
            Some(Self(m))
        } else {
            None
        }
    }
}

impl From<Homography> for [[f64; 3]; 3] {
    fn from(h: Homography) -> Self {
        h.to_rows()
    }
}

impl From<[[f64; 3]; 3]> for Homography {
    fn from(r: [[f64; 3]; 3]) -> Self {
        Self(Matrix3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        ))
    }
}

/// A RANSAC estimate and its inlier mask (parallel to the input points).
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub homography: Homography,
    pub inliers: Vec<bool>,
}

impl Estimate {
    /// Number of inlier correspondences.
    #[must_use]
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&i| i).count()
    }
}

/// Similarity transform that moves the centroid to the origin and scales
/// the mean distance to `sqrt(2)`.
#[allow(clippy::cast_precision_loss)]
fn normalizing_transform(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| Point::new(cx, cy).distance_squared(*p).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn transform(t: &Matrix3<f64>, p: Point) -> Point {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point::new(v.x / v.z, v.y / v.z)
}

/// Direct linear transform over all given correspondences.
///
/// Solves `A h = 0` in the least-squares sense through the eigenvector of
/// `AᵀA` with the smallest eigenvalue, on Hartley-normalized coordinates.
#[must_use]
pub fn fit_dlt(src: &[Point], dst: &[Point]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < MIN_CORRESPONDENCES {
        return None;
    }
    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let s = transform(&t_src, *s);
        let d = transform(&t_dst, *d);
        let rows = [
            [-s.x, -s.y, -1.0, 0.0, 0.0, 0.0, d.x * s.x, d.x * s.y, d.x],
            [0.0, 0.0, 0.0, -s.x, -s.y, -1.0, d.y * s.x, d.y * s.y, d.y],
        ];
        for row in &rows {
            let r = SMatrix::<f64, 9, 1>::from_row_slice(row);
            ata += r * r.transpose();
        }
    }

    let eigen = ata.symmetric_eigen();
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(smallest);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    Homography::normalized(t_dst_inv * hn * t_src)
}

fn is_degenerate(points: &[Point]) -> bool {
    let cross = |a: Point, b: Point, c: Point| {
        ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
    };
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                if cross(points[i], points[j], points[k]) < COLLINEAR_EPSILON {
                    return true;
                }
            }
        }
    }
    false
}

fn inlier_mask(h: &Homography, src: &[Point], dst: &[Point], threshold: f64) -> Vec<bool> {
    let limit = threshold * threshold;
    src.iter()
        .zip(dst)
        .map(|(s, d)| h.apply(*s).is_some_and(|p| p.distance_squared(*d) <= limit))
        .collect()
}

/// Iterations needed to draw an all-inlier sample with the configured
/// confidence, given the current inlier ratio.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn required_iterations(inliers: usize, total: usize) -> usize {
    let ratio = inliers as f64 / total as f64;
    let p_good_sample = ratio.powi(4);
    if p_good_sample >= 1.0 {
        return 1;
    }
    if p_good_sample <= f64::EPSILON {
        return RANSAC_MAX_ITERATIONS;
    }
    let n = (1.0 - RANSAC_CONFIDENCE).ln() / (1.0 - p_good_sample).ln();
    (n.ceil() as usize).min(RANSAC_MAX_ITERATIONS)
}

/// Robustly estimate the homography mapping `src` onto `dst`.
///
/// Returns `None` when there are too few correspondences or no
/// non-degenerate sample yields a transform with at least four inliers.
#[must_use]
pub fn find_homography(src: &[Point], dst: &[Point], threshold: f64) -> Option<Estimate> {
    let n = src.len();
    if n != dst.len() || n < MIN_CORRESPONDENCES {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);
    let mut best: Option<Estimate> = None;
    let mut best_count = 0;
    let mut iterations = RANSAC_MAX_ITERATIONS;
    let mut i = 0;

    while i < iterations {
        i += 1;
        let sample = rand::seq::index::sample(&mut rng, n, MIN_CORRESPONDENCES);
        let s: Vec<Point> = sample.iter().map(|k| src[k]).collect();
        let d: Vec<Point> = sample.iter().map(|k| dst[k]).collect();
        if is_degenerate(&s) || is_degenerate(&d) {
            continue;
        }
        let Some(h) = fit_dlt(&s, &d) else {
            continue;
        };
        let inliers = inlier_mask(&h, src, dst, threshold);
        let count = inliers.iter().filter(|&&b| b).count();
        if count > best_count {
            best_count = count;
            best = Some(Estimate {
                homography: h,
                inliers,
            });
            iterations = iterations.min(required_iterations(count, n));
        }
        // Exactly four points admit a single sample; no point retrying it.
        if n == MIN_CORRESPONDENCES {
            break;
        }
    }

    let best = best.filter(|b| b.inlier_count() >= MIN_CORRESPONDENCES)?;
    Some(refine(best, src, dst, threshold))
}

/// Refit on the consensus set; keep the refit only if it does not lose inliers.
fn refine(best: Estimate, src: &[Point], dst: &[Point], threshold: f64) -> Estimate {
    let (s, d): (Vec<Point>, Vec<Point>) = src
        .iter()
        .zip(dst)
        .zip(&best.inliers)
        .filter(|(_, inlier)| **inlier)
        .map(|((s, d), _)| (*s, *d))
        .unzip();
    let Some(refit) = fit_dlt(&s, &d) else {
        return best;
    };
    let inliers = inlier_mask(&refit, src, dst, threshold);
    let refit = Estimate {
        homography: refit,
        inliers,
    };
    if refit.inlier_count() >= best.inlier_count() {
        refit
    } else {
        best
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn grid() -> Vec<Point> {
        let mut pts = Vec::new();
        for y in 0..5 {
            for x in 0..6 {
                pts.push(Point::new(f64::from(x) * 37.0 + 11.0, f64::from(y) * 29.0 + 5.0));
            }
        }
        pts
    }

    fn assert_close(a: &Homography, b: &Homography, tol: f64) {
        for (x, y) in a.matrix().iter().zip(b.matrix().iter()) {
            assert!((x - y).abs() < tol, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn identity_maps_points_to_themselves() {
        let p = Point::new(3.5, -2.0);
        assert_eq!(Homography::identity().apply(p), Some(p));
    }

    #[test]
    fn dlt_recovers_translation() {
        let src = grid();
        let dst: Vec<Point> = src.iter().map(|p| Point::new(p.x + 12.0, p.y - 7.0)).collect();
        let h = fit_dlt(&src, &dst).unwrap();
        let expected = Homography::from([[1.0, 0.0, 12.0], [0.0, 1.0, -7.0], [0.0, 0.0, 1.0]]);
        assert_close(&h, &expected, 1e-6);
    }

    #[test]
    fn dlt_recovers_perspective() {
        let truth = Homography::from([[1.02, 0.05, 4.0], [-0.03, 0.98, 9.0], [1e-4, -2e-4, 1.0]]);
        let src = grid();
        let dst: Vec<Point> = src.iter().map(|p| truth.apply(*p).unwrap()).collect();
        let h = fit_dlt(&src, &dst).unwrap();
        assert_close(&h, &truth, 1e-6);
    }

    #[test]
    fn dlt_rejects_too_few_points() {
        let src = vec![Point::new(0.0, 0.0); 3];
        assert!(fit_dlt(&src, &src).is_none());
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let line: Vec<Point> = (0..4)
            .map(|i| Point::new(f64::from(i), f64::from(i) * 2.0))
            .collect();
        assert!(is_degenerate(&line));
        assert!(find_homography(&line, &line, RANSAC_REPROJECTION_THRESHOLD).is_none());
    }

    #[test]
    fn ransac_ignores_outliers() {
        let src = grid();
        let mut dst: Vec<Point> = src.iter().map(|p| Point::new(p.x + 20.0, p.y + 3.0)).collect();
        // Corrupt a fifth of the correspondences.
        for (i, p) in dst.iter_mut().enumerate().filter(|(i, _)| i % 5 == 0) {
            p.x += 100.0 + f64::from(u32::try_from(i).unwrap()) * 13.0;
            p.y -= 60.0;
        }
        let estimate = find_homography(&src, &dst, RANSAC_REPROJECTION_THRESHOLD).unwrap();
        assert_eq!(estimate.inlier_count(), 24);
        for (i, inlier) in estimate.inliers.iter().enumerate() {
            assert_eq!(*inlier, i % 5 != 0);
        }
        let expected = Homography::from([[1.0, 0.0, 20.0], [0.0, 1.0, 3.0], [0.0, 0.0, 1.0]]);
        assert_close(&estimate.homography, &expected, 1e-6);
    }

    #[test]
    fn ransac_is_deterministic() {
        let src = grid();
        let dst: Vec<Point> = src.iter().map(|p| Point::new(p.x * 1.1, p.y * 0.9)).collect();
        let a = find_homography(&src, &dst, RANSAC_REPROJECTION_THRESHOLD).unwrap();
        let b = find_homography(&src, &dst, RANSAC_REPROJECTION_THRESHOLD).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn exactly_four_points_fit() {
        let src = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 80.0),
            Point::new(0.0, 80.0),
        ];
        let dst: Vec<Point> = src.iter().map(|p| Point::new(p.x + 5.0, p.y + 5.0)).collect();
        let estimate = find_homography(&src, &dst, RANSAC_REPROJECTION_THRESHOLD).unwrap();
        assert_eq!(estimate.inlier_count(), 4);
    }

    #[test]
    fn serializes_as_nested_rows() {
        let json = serde_json::to_value(Homography::identity()).unwrap();
        assert_eq!(json, serde_json::json!([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]));
    }

    #[test]
    fn pre_translate_shifts_inputs() {
        let h = Homography::from([[1.0, 0.0, 12.0], [0.0, 1.0, -7.0], [0.0, 0.0, 1.0]]);
        let p = h.pre_translate(-1.0, -1.0).apply(Point::new(1.0, 1.0)).unwrap();
        assert!((p.x - 12.0).abs() < 1e-12);
        assert!((p.y + 7.0).abs() < 1e-12);
    }

    #[test]
    fn identity_converts_to_projection() {
        assert!(Homography::identity().to_projection().is_some());
    }
}
