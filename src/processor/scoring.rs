//! Focus quality strategies.

use crate::assert_invariant;
use crate::errors::RigError;
use crate::geometry::Region;
use crate::segment::ImageSegmenter;
use crate::types::{QualityScore, ScoringMode};
use image::GrayImage;

/// Binomial smoothing and second-difference taps of the 5x5 Laplacian.
const SMOOTH: [f64; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];
const SECOND: [f64; 5] = [1.0, 0.0, -2.0, 0.0, 1.0];

/// Score plus the rectangles that produced it, for annotation.
#[derive(Debug, Clone)]
pub struct Scored {
    pub quality: QualityScore,
    pub regions: Vec<Region>,
}

/// ROI used for a frame: the explicit one clipped to the frame, or a centred
/// square with side `min(width, height) / 4`.
pub fn resolve_roi(explicit: Option<Region>, width: u32, height: u32) -> Result<Region, RigError> {
    match explicit {
        Some(roi) => roi.clamp_to(width, height).ok_or_else(|| {
            RigError::degenerate_input(format!("ROI {roi} lies outside {width}x{height} frame"))
        }),
        None => Region::centered_square(width, height, width.min(height) / 4).map_err(|_| {
            RigError::degenerate_input(format!("frame {width}x{height} too small for an ROI"))
        }),
    }
}

pub fn score_frame(
    mode: ScoringMode,
    image: &GrayImage,
    roi: Option<Region>,
    segmenter: &ImageSegmenter,
) -> Result<Scored, RigError> {
    let (width, height) = image.dimensions();
    match mode {
        ScoringMode::PlainRoi => {
            let roi = resolve_roi(roi, width, height)?;
            Ok(Scored {
                quality: QualityScore::new(laplacian_variance(image, &roi), mode),
                regions: vec![roi],
            })
        }
        ScoringMode::GridAggregate => {
            let segmentation = segmenter.segment(image)?;
            Ok(Scored {
                quality: segmentation.quality,
                regions: segmentation.iter_cells().copied().collect(),
            })
        }
        ScoringMode::RoiIntersectGrid => {
            let roi = resolve_roi(roi, width, height)?;
            let segmentation = segmenter.segment(image)?;
            let contributing: Vec<Region> = segmentation
                .iter_cells()
                .filter(|cell| {
                    roi.intersection(cell)
                        .is_some_and(|overlap| overlap.area() == cell.area())
                })
                .copied()
                .collect();

            let mut total = 0.0;
            for cell in &contributing {
                assert_invariant!(
                    roi.contains(cell),
                    "only cells wholly inside the ROI contribute",
                    "score_frame"
                );
                total += laplacian_variance(image, cell);
            }
            let value = if contributing.is_empty() {
                0.0
            } else {
                total / contributing.len() as f64
            };
            log::trace!(
                "{} of {} cells inside ROI {roi}",
                contributing.len(),
                segmentation.cell_count()
            );
            Ok(Scored {
                quality: QualityScore::new(value, mode),
                regions: contributing,
            })
        }
    }
}

/// Variance of the 5x5 Laplacian response over `region`.
///
/// The region is treated as its own image: borders reflect about the edge
/// pixel (`gfedcb|abcdefgh|gfedcba`).
pub fn laplacian_variance(image: &GrayImage, region: &Region) -> f64 {
    let Some(region) = region.clamp_to(image.width(), image.height()) else {
        return 0.0;
    };
    let (w, h) = (region.width() as i64, region.height() as i64);
    let (ox, oy) = (region.x1(), region.y1());
    let at = |x: i64, y: i64| -> f64 {
        let x = reflect_101(x, w) as u32;
        let y = reflect_101(y, h) as u32;
        f64::from(image.get_pixel(ox + x, oy + y).0[0])
    };

    let mut kernel = [[0.0f64; 5]; 5];
    for (ky, row) in kernel.iter_mut().enumerate() {
        for (kx, tap) in row.iter_mut().enumerate() {
            *tap = SMOOTH[ky] * SECOND[kx] + SECOND[ky] * SMOOTH[kx];
        }
    }

    let count = (w * h) as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..h {
        for x in 0..w {
            let mut response = 0.0;
            for (ky, row) in kernel.iter().enumerate() {
                for (kx, tap) in row.iter().enumerate() {
                    if *tap != 0.0 {
                        response += tap * at(x + kx as i64 - 2, y + ky as i64 - 2);
                    }
                }
            }
            sum += response;
            sum_sq += response * response;
        }
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

fn reflect_101(mut index: i64, len: i64) -> i64 {
    if len == 1 {
        return 0;
    }
    loop {
        if index < 0 {
            index = -index;
        } else if index >= len {
            index = 2 * len - 2 - index;
        } else {
            return index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::{blurred_checkerboard, checkerboard, uniform};

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
    }

    #[test]
    fn test_flat_region_has_zero_variance() {
        let img = uniform(40, 40, 90);
        let roi = Region::full(40, 40).unwrap();
        assert_eq!(laplacian_variance(&img, &roi), 0.0);
    }

    #[test]
    fn test_sharp_beats_blurred() {
        let roi = Region::new(20, 20, 108, 108).unwrap();
        let sharp = laplacian_variance(&checkerboard(128, 128, 4, 8), &roi);
        let soft = laplacian_variance(&blurred_checkerboard(128, 128, 4, 8, 2.5), &roi);
        assert!(sharp > soft);
        assert!(soft > 0.0);
    }

    #[test]
    fn test_default_roi_is_centered_quarter() {
        let roi = resolve_roi(None, 640, 480).unwrap();
        assert_eq!(roi, Region::new(260, 180, 380, 300).unwrap());
    }

    #[test]
    fn test_explicit_roi_is_clipped() {
        let roi = resolve_roi(Some(Region::new(600, 400, 700, 500).unwrap()), 640, 480).unwrap();
        assert_eq!(roi, Region::new(600, 400, 640, 480).unwrap());
        assert!(matches!(
            resolve_roi(Some(Region::new(700, 0, 710, 10).unwrap()), 640, 480),
            Err(RigError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_tiny_frame_has_no_default_roi() {
        assert!(matches!(
            resolve_roi(None, 3, 100),
            Err(RigError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_plain_roi_mode() {
        let img = checkerboard(200, 200, 5, 10);
        let scored = score_frame(ScoringMode::PlainRoi, &img, None, &ImageSegmenter::default())
            .unwrap();
        assert_eq!(scored.quality.mode, ScoringMode::PlainRoi);
        assert_eq!(scored.regions, vec![resolve_roi(None, 200, 200).unwrap()]);
    }

    #[test]
    fn test_roi_grid_mode_without_cells_inside_scores_zero() {
        let img = checkerboard(800, 800, 5, 16);
        let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
        let tiny = Region::new(0, 0, 10, 10).unwrap();
        let scored = score_frame(ScoringMode::RoiIntersectGrid, &img, Some(tiny), &segmenter)
            .unwrap();
        assert_eq!(scored.quality.value, 0.0);
        assert!(scored.regions.is_empty());
    }

    #[test]
    fn test_roi_grid_mode_counts_whole_cells_only() {
        let img = checkerboard(800, 800, 5, 16);
        let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
        let segmentation = segmenter.segment(&img).unwrap();
        let roi = Region::new(0, 0, 800, 400).unwrap();
        let scored =
            score_frame(ScoringMode::RoiIntersectGrid, &img, Some(roi), &segmenter).unwrap();
        let expected: Vec<Region> = segmentation
            .iter_cells()
            .filter(|c| c.y2() <= 400)
            .copied()
            .collect();
        assert!(!expected.is_empty());
        assert_eq!(scored.regions, expected);
        let mean = expected
            .iter()
            .map(|c| laplacian_variance(&img, c))
            .sum::<f64>()
            / expected.len() as f64;
        assert!((scored.quality.value - mean).abs() < 1e-9);
    }
}
