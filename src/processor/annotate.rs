//! Region outlines on the display copy of a frame.

use crate::geometry::Region;
use image::{GrayImage, Luma};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

pub const OUTLINE: Luma<u8> = Luma([255]);
pub const OUTLINE_THICKNESS: u32 = 2;

/// Outline every region, `OUTLINE_THICKNESS` pixels wide, growing inwards.
pub fn draw_regions(image: &mut GrayImage, regions: &[Region]) {
    for region in regions {
        for inset in 0..OUTLINE_THICKNESS {
            let width = region.width().saturating_sub(2 * inset);
            let height = region.height().saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at((region.x1() + inset) as i32, (region.y1() + inset) as i32)
                .of_size(width, height);
            draw_hollow_rect_mut(image, rect, OUTLINE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outline_is_two_pixels_wide() {
        let mut img = GrayImage::new(20, 20);
        draw_regions(&mut img, &[Region::new(4, 4, 16, 16).unwrap()]);
        assert_eq!(img.get_pixel(4, 10).0[0], 255);
        assert_eq!(img.get_pixel(5, 10).0[0], 255);
        assert_eq!(img.get_pixel(6, 10).0[0], 0);
        assert_eq!(img.get_pixel(15, 15).0[0], 255);
        assert_eq!(img.get_pixel(10, 10).0[0], 0);
        assert_eq!(img.get_pixel(3, 3).0[0], 0);
    }

    #[test]
    fn test_thin_region_does_not_panic() {
        let mut img = GrayImage::new(10, 10);
        draw_regions(&mut img, &[Region::new(2, 2, 3, 9).unwrap()]);
        assert_eq!(img.get_pixel(2, 5).0[0], 255);
    }
}
