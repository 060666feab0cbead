//! Synthetic drawings shared by unit tests.

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// White page with black blocks and strokes, a stand-in for line art.
pub fn drawing(width: u32, height: u32) -> GrayImage {
    let mut img = GrayImage::from_pixel(width, height, image::Luma([255]));
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..40 {
        let w: u32 = rng.random_range(8..40);
        let h: u32 = rng.random_range(8..40);
        let x = rng.random_range(0..i32::try_from(width - w).unwrap_or(1));
        let y = rng.random_range(0..i32::try_from(height - h).unwrap_or(1));
        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), image::Luma([0]));
    }
    for _ in 0..15 {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f32, height as f32);
        let start = (rng.random_range(0.0..w), rng.random_range(0.0..h));
        let end = (rng.random_range(0.0..w), rng.random_range(0.0..h));
        draw_line_segment_mut(&mut img, start, end, image::Luma([0]));
    }
    img
}

/// [`drawing`] as an RGB image.
pub fn drawing_rgb(width: u32, height: u32) -> RgbImage {
    DynamicImage::ImageLuma8(drawing(width, height)).to_rgb8()
}

/// Shift an image by whole pixels, filling exposed area with white.
pub fn translate(image: &RgbImage, dx: i64, dy: i64) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let sx = i64::from(x) - dx;
        let sy = i64::from(y) - dy;
        match (u32::try_from(sx), u32::try_from(sy)) {
            (Ok(sx), Ok(sy)) if sx < width && sy < height => *image.get_pixel(sx, sy),
            _ => image::Rgb([255, 255, 255]),
        }
    })
}

/// PNG bytes of an RGB image.
pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    crate::codec::encode_png(&DynamicImage::ImageRgb8(image.clone())).unwrap_or_default()
}
