//! Synthetic frames shaped like counting-chamber captures
//!
//! A chamber under the microscope shows a regular grid of bright and dark
//! cells on a mid-grey background. These generators reproduce that layout so
//! segmentation and scoring can be tested without a camera.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;

pub const BACKGROUND: u8 = 128;
pub const BRIGHT_CELL: u8 = 230;
pub const DARK_CELL: u8 = 25;

/// `cells x cells` checkerboard inset by `margin` pixels on a grey background.
///
/// Cell size is `(dimension - 2 * margin) / cells`; leftover pixels on the far
/// side stay background.
pub fn checkerboard(width: u32, height: u32, cells: u32, margin: u32) -> GrayImage {
    let cells = cells.max(1);
    let cell_w = width.saturating_sub(2 * margin) / cells;
    let cell_h = height.saturating_sub(2 * margin) / cells;
    GrayImage::from_fn(width, height, |x, y| {
        Luma([cell_value(x, y, cells, margin, cell_w, cell_h)])
    })
}

/// Colour version of [`checkerboard`], tinted so that the channels differ.
pub fn rgb_checkerboard(width: u32, height: u32, cells: u32, margin: u32) -> RgbImage {
    let cells = cells.max(1);
    let cell_w = width.saturating_sub(2 * margin) / cells;
    let cell_h = height.saturating_sub(2 * margin) / cells;
    RgbImage::from_fn(width, height, |x, y| {
        match cell_value(x, y, cells, margin, cell_w, cell_h) {
            BRIGHT_CELL => Rgb([240, 226, 214]),
            DARK_CELL => Rgb([18, 30, 22]),
            _ => Rgb([BACKGROUND; 3]),
        }
    })
}

/// Featureless frame.
pub fn uniform(width: u32, height: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([value]))
}

/// [`checkerboard`] passed through a Gaussian blur, `sigma <= 0` means sharp.
pub fn blurred_checkerboard(
    width: u32,
    height: u32,
    cells: u32,
    margin: u32,
    sigma: f32,
) -> GrayImage {
    let sharp = checkerboard(width, height, cells, margin);
    if sigma > 0.0 {
        gaussian_blur_f32(&sharp, sigma)
    } else {
        sharp
    }
}

fn cell_value(x: u32, y: u32, cells: u32, margin: u32, cell_w: u32, cell_h: u32) -> u8 {
    if cell_w == 0 || cell_h == 0 {
        return BACKGROUND;
    }
    let inside_x = x >= margin && x < margin + cells * cell_w;
    let inside_y = y >= margin && y < margin + cells * cell_h;
    if !(inside_x && inside_y) {
        return BACKGROUND;
    }
    let column = (x - margin) / cell_w;
    let row = (y - margin) / cell_h;
    if (column + row) % 2 == 0 {
        BRIGHT_CELL
    } else {
        DARK_CELL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard_layout() {
        let img = checkerboard(100, 100, 5, 10);
        assert_eq!(img.get_pixel(0, 0).0[0], BACKGROUND);
        assert_eq!(img.get_pixel(10, 10).0[0], BRIGHT_CELL);
        assert_eq!(img.get_pixel(26, 10).0[0], DARK_CELL);
        assert_eq!(img.get_pixel(26, 26).0[0], BRIGHT_CELL);
        assert_eq!(img.get_pixel(90, 50).0[0], BACKGROUND);
    }

    #[test]
    fn test_blur_softens_edges() {
        let sharp = checkerboard(64, 64, 4, 0);
        let soft = blurred_checkerboard(64, 64, 4, 0, 3.0);
        assert_eq!(sharp.get_pixel(15, 8).0[0], BRIGHT_CELL);
        let edge = soft.get_pixel(15, 8).0[0];
        assert!(edge < BRIGHT_CELL && edge > DARK_CELL);
    }

    #[test]
    fn test_rgb_checkerboard_channels_differ() {
        let img = rgb_checkerboard(40, 40, 2, 0);
        let p = img.get_pixel(5, 5).0;
        assert_ne!(p[0], p[2]);
    }
}
