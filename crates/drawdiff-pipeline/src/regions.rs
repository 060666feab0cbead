//! Change regions: outermost blobs of the difference mask, measured and
//! ranked.
//!
//! Borders come from Suzuki-Abe border following
//! ([`imageproc::contours::find_contours`]); only outer borders with no
//! enclosing border are kept, so a ring-shaped change is one region.
//! Region area is the polygon area of the traced border.

use image::GrayImage;
use imageproc::contours::{BorderType, Contour, find_contours};

use crate::config::CompareConfig;
use crate::types::{ChangeRegion, Dimensions, NormalizedBox, PixelRect};

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Shoelace area of a closed border.
fn polygon_area(contour: &Contour<u32>) -> f64 {
    let pts = &contour.points;
    if pts.len() < 3 {
        return 0.0;
    }
    let twice: f64 = pts
        .iter()
        .zip(pts.iter().cycle().skip(1))
        .map(|(a, b)| {
            f64::from(a.x) * f64::from(b.y) - f64::from(b.x) * f64::from(a.y)
        })
        .sum();
    twice.abs() / 2.0
}

/// Smallest inclusive rectangle containing every border point.
fn bounding_rect(contour: &Contour<u32>) -> Option<PixelRect> {
    let xs = contour.points.iter().map(|p| p.x);
    let ys = contour.points.iter().map(|p| p.y);
    let (min_x, max_x) = (xs.clone().min()?, xs.max()?);
    let (min_y, max_y) = (ys.clone().min()?, ys.max()?);
    Some(PixelRect {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    })
}

/// Centre-based box in `[0, 1]` units of the image, 4 decimal places.
fn normalize(rect: PixelRect, dims: Dimensions) -> NormalizedBox {
    let (w, h) = (f64::from(dims.width), f64::from(dims.height));
    let rw = f64::from(rect.width);
    let rh = f64::from(rect.height);
    NormalizedBox {
        x: round_to((f64::from(rect.x) + rw / 2.0) / w, 4),
        y: round_to((f64::from(rect.y) + rh / 2.0) / h, 4),
        width: round_to(rw / w, 4),
        height: round_to(rh / h, 4),
    }
}

/// Extract ranked change regions from a binary mask.
///
/// Regions whose area is below `config.min_contour_area` are dropped.
/// The rest are ordered largest first and numbered from 1 in that order.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn extract_regions(
    mask: &GrayImage,
    dims: Dimensions,
    config: &CompareConfig,
) -> Vec<ChangeRegion> {
    let total = dims.pixel_count() as f64;
    if total == 0.0 {
        return Vec::new();
    }

    let contours: Vec<Contour<u32>> = find_contours(mask);
    let mut measured: Vec<(f64, PixelRect)> = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| {
            let area = polygon_area(c);
            (area.floor() >= config.min_contour_area)
                .then(|| bounding_rect(c).map(|rect| (area, rect)))
                .flatten()
        })
        .collect();

    tracing::debug!(
        borders = contours.len(),
        kept = measured.len(),
        "regions measured"
    );

    measured.sort_by(|a, b| b.0.total_cmp(&a.0));

    measured
        .into_iter()
        .zip(1u32..)
        .map(|((area, rect), region_id)| ChangeRegion {
            region_id,
            bounding_box: normalize(rect, dims),
            pixel_coords: rect,
            area_pixels: area.floor() as u64,
            area_percent: round_to(area / total * 100.0, 2),
        })
        .collect()
}
