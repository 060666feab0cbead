//! Annotated diff view: red wash over changed pixels, green boxes and
//! rank labels over each region.

use std::sync::LazyLock;

use ab_glyph::{FontRef, PxScale};
use image::{GrayImage, Rgb};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::types::{ChangeRegion, RgbImage};

const HIGHLIGHT: Rgb<u8> = Rgb([255, 0, 0]);
const BOX: Rgb<u8> = Rgb([0, 255, 0]);

/// Weight of the base image, in tenths, in the blend over changed pixels.
pub const BASE_WEIGHT_TENTHS: u16 = 7;

/// Label glyph height in pixels.
const LABEL_SCALE: f32 = 18.0;
/// Space between the label and the top of its frame.
const LABEL_GAP: i32 = 5;
/// Offset of the label below the frame's top edge when there is no room above.
const LABEL_INSET: i32 = 3;

static LABEL_FONT: LazyLock<Option<FontRef<'static>>> = LazyLock::new(|| {
    FontRef::try_from_slice(ttf_firacode::REGULAR)
        .inspect_err(|e| tracing::warn!(error = %e, "label font unavailable, regions unlabelled"))
        .ok()
});

/// `0.7 * base + 0.3 * over`, rounded half up.
fn blend(base: u8, over: u8) -> u8 {
    let mixed = (u16::from(base) * BASE_WEIGHT_TENTHS
        + u16::from(over) * (10 - BASE_WEIGHT_TENTHS)
        + 5)
        / 10;
    u8::try_from(mixed).unwrap_or(u8::MAX)
}

fn label_text(region_id: u32) -> String {
    format!("#{region_id}")
}

/// Draw `text` above the frame whose top-left corner is `(x, y)`, or just
/// inside it when the frame touches the top of the image.
fn draw_label(canvas: &mut RgbImage, text: &str, x: i32, y: i32) {
    let Some(font) = LABEL_FONT.as_ref() else {
        return;
    };
    let scale = PxScale::from(LABEL_SCALE);
    let (_, height) = text_size(scale, font, text);
    let height = i32::try_from(height).unwrap_or(i32::MAX);

    let above = y - LABEL_GAP - height;
    let label_y = if above >= 0 { above } else { y + LABEL_INSET };
    // A second pass one pixel over gives two-pixel strokes.
    draw_text_mut(canvas, BOX, x, label_y, scale, font, text);
    draw_text_mut(canvas, BOX, x + 1, label_y, scale, font, text);
}

fn draw_region(canvas: &mut RgbImage, region: &ChangeRegion) {
    let r = region.pixel_coords;
    let (Ok(x), Ok(y)) = (i32::try_from(r.x), i32::try_from(r.y)) else {
        return;
    };
    if r.width == 0 || r.height == 0 {
        return;
    }

    // Two nested one-pixel outlines make a two-pixel frame.
    draw_hollow_rect_mut(
        canvas,
        Rect::at(x - 1, y - 1).of_size(r.width + 2, r.height + 2),
        BOX,
    );
    draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(r.width, r.height), BOX);

    draw_label(canvas, &label_text(region.region_id), x, y);
}

/// Composite the diff view on a copy of `base`.
///
/// Pixels set in `mask` are blended 70/30 with red; all other pixels are
/// left as they are. Each region then gets a two-pixel green frame and a
/// `#<rank>` label above the frame (or just inside its top edge when the
/// frame touches the top of the image).
#[must_use = "returns the rendered visualization"]
pub fn render(base: &RgbImage, mask: &GrayImage, regions: &[ChangeRegion]) -> RgbImage {
    let mut canvas = base.clone();
    for (pixel, m) in canvas.pixels_mut().zip(mask.pixels()) {
        if m.0[0] != 0 {
            for (c, o) in pixel.0.iter_mut().zip(HIGHLIGHT.0) {
                *c = blend(*c, o);
            }
        }
    }
    for region in regions {
        draw_region(&mut canvas, region);
    }
    canvas
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::ops::Range;

    use super::*;
    use crate::types::{NormalizedBox, PixelRect};

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    fn region(id: u32, x: u32, y: u32, width: u32, height: u32) -> ChangeRegion {
        ChangeRegion {
            region_id: id,
            bounding_box: NormalizedBox {
                x: 0.0,
                y: 0.0,
                width: 0.0,
                height: 0.0,
            },
            pixel_coords: PixelRect {
                x,
                y,
                width,
                height,
            },
            area_pixels: u64::from(width * height),
            area_percent: 0.0,
        }
    }

    #[test]
    fn blend_weights() {
        assert_eq!(blend(255, 255), 255);
        assert_eq!(blend(255, 0), 179);
        assert_eq!(blend(0, 255), 77);
    }

    #[test]
    fn unmasked_pixels_are_untouched() {
        let base = RgbImage::from_pixel(20, 20, Rgb([10, 120, 200]));
        let mask = GrayImage::new(20, 20);
        assert_eq!(render(&base, &mask, &[]), base);
    }

    #[test]
    fn masked_pixels_turn_red() {
        let base = RgbImage::from_pixel(4, 4, WHITE);
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, image::Luma([255]));
        let out = render(&base, &mask, &[]);
        assert_eq!(*out.get_pixel(1, 1), Rgb([255, 179, 179]));
        assert_eq!(*out.get_pixel(0, 0), WHITE);
    }

    #[test]
    fn frame_is_two_pixels_wide() {
        let base = RgbImage::from_pixel(100, 100, WHITE);
        let mask = GrayImage::new(100, 100);
        let out = render(&base, &mask, &[region(1, 40, 40, 20, 20)]);
        assert_eq!(*out.get_pixel(39, 50), BOX);
        assert_eq!(*out.get_pixel(40, 50), BOX);
        assert_eq!(*out.get_pixel(41, 50), WHITE);
        assert_eq!(*out.get_pixel(38, 50), WHITE);
        assert_eq!(*out.get_pixel(50, 50), WHITE);
    }

    /// Columns in `cols` holding any non-white pixel within `rows`.
    fn ink_columns(img: &RgbImage, rows: Range<u32>, cols: Range<u32>) -> Vec<u32> {
        cols.filter(|&x| rows.clone().any(|y| *img.get_pixel(x, y) != WHITE)).collect()
    }

    #[test]
    fn labels_carry_a_hash_prefix() {
        assert_eq!(label_text(1), "#1");
        assert_eq!(label_text(12), "#12");
    }

    #[test]
    fn label_font_loads() {
        assert!(LABEL_FONT.is_some());
    }

    #[test]
    fn label_sits_above_the_box() {
        let base = RgbImage::from_pixel(100, 100, WHITE);
        let mask = GrayImage::new(100, 100);
        let out = render(&base, &mask, &[region(1, 40, 40, 20, 20)]);
        let gap_top = u32::try_from(40 - LABEL_GAP).unwrap();
        let ink = ink_columns(&out, 0..gap_top, 0..100);
        assert!(!ink.is_empty());
        assert!(ink.iter().all(|&x| x >= 40), "{ink:?}");
        // Nothing is drawn in the gap between label and frame.
        assert!(ink_columns(&out, gap_top..39, 0..100).is_empty());
    }

    #[test]
    fn label_moves_inside_at_top_edge() {
        let base = RgbImage::from_pixel(60, 60, WHITE);
        let mask = GrayImage::new(60, 60);
        let out = render(&base, &mask, &[region(8, 5, 0, 40, 30)]);
        // Interior of the frame: everything but the two-pixel border.
        assert!(!ink_columns(&out, 2..28, 7..43).is_empty());
    }

    #[test]
    fn longer_labels_are_wider() {
        let base = RgbImage::from_pixel(160, 120, WHITE);
        let mask = GrayImage::new(160, 120);
        let one = render(&base, &mask, &[region(1, 50, 60, 30, 30)]);
        let ten = render(&base, &mask, &[region(10, 50, 60, 30, 30)]);
        let band = 0..u32::try_from(60 - LABEL_GAP).unwrap();
        let right = |img: &RgbImage| ink_columns(img, band.clone(), 0..160).last().copied();
        assert!(right(&ten).unwrap() > right(&one).unwrap());
    }
}
