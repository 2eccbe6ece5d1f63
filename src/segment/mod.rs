//! Grid segmentation of counting-chamber style images.
//!
//! The frame is reduced to two intensity projections (mean per column and
//! mean per row). Each projection is searched for grid cells with
//! [`find_1d_grid`]; the cross product of both segment lists yields the 2-D
//! cell grid. The same smoothed signals give a sharpness estimate: sharp grid
//! edges produce steep, varied slopes next to the grid lines.

pub mod signal;

pub use signal::{find_1d_grid, moving_average, odd_window, Grid1D, GridSegment, MIN_SEGMENT_WINDOWS};

use crate::config::{SegmenterSettings, DEFAULT_EDGE_TRIM, DEFAULT_SIZE_FRACTION};
use crate::errors::RigError;
use crate::geometry::Region;
use crate::types::{QualityScore, ScoringMode};
use image::GrayImage;
use serde::Serialize;
use signal::{unmasked_differences, variance};

/// Grid found in one frame.
#[derive(Debug, Clone, Serialize)]
pub struct Segmentation {
    /// Cell spans along x, from the per-column projection.
    pub x_segments: Vec<GridSegment>,
    /// Cell spans along y, from the per-row projection.
    pub y_segments: Vec<GridSegment>,
    /// `cells[row][column]`, one region per (y segment, x segment) pair.
    pub cells: Vec<Vec<Region>>,
    /// Sum of all cell areas in pixels.
    pub total_area: u64,
    pub quality: QualityScore,
}

impl Segmentation {
    pub fn cell_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = &Region> {
        self.cells.iter().flatten()
    }
}

#[derive(Debug, Clone)]
pub struct ImageSegmenter {
    size_fraction: f64,
    edge_trim: usize,
}

impl Default for ImageSegmenter {
    fn default() -> Self {
        Self {
            size_fraction: DEFAULT_SIZE_FRACTION,
            edge_trim: DEFAULT_EDGE_TRIM,
        }
    }
}

impl ImageSegmenter {
    pub fn new(size_fraction: f64, edge_trim: usize) -> Result<Self, RigError> {
        if !(size_fraction > 0.0 && size_fraction < 0.5) {
            return Err(RigError::invalid_argument(format!(
                "segmenter size fraction {size_fraction} outside (0, 0.5)"
            )));
        }
        Ok(Self {
            size_fraction,
            edge_trim,
        })
    }

    pub fn from_settings(settings: &SegmenterSettings) -> Result<Self, RigError> {
        Self::new(settings.size_fraction, settings.edge_trim)
    }

    pub fn size_fraction(&self) -> f64 {
        self.size_fraction
    }

    pub fn segment(&self, image: &GrayImage) -> Result<Segmentation, RigError> {
        let (width, height) = image.dimensions();
        if width < 3 || height < 3 {
            return Err(RigError::degenerate_input(format!(
                "frame {width}x{height} too small to segment"
            )));
        }

        let (column_profile, row_profile) = projections(image);
        let x_grid = find_1d_grid(
            &column_profile,
            odd_window(self.size_fraction, column_profile.len()),
        )?;
        let y_grid = find_1d_grid(&row_profile, odd_window(self.size_fraction, row_profile.len()))?;

        let mut cells = Vec::with_capacity(y_grid.segments.len());
        let mut total_area = 0u64;
        for y in &y_grid.segments {
            let mut row = Vec::with_capacity(x_grid.segments.len());
            for x in &x_grid.segments {
                let cell = Region::from_xywh(
                    x.start as u32,
                    y.start as u32,
                    x.length as u32,
                    y.length as u32,
                )?;
                total_area += cell.area();
                row.push(cell);
            }
            cells.push(row);
        }

        let quality = self.sharpness(&x_grid, &y_grid)?;
        log::debug!(
            "segmented {}x{} grid ({} px) quality {:.2}",
            x_grid.segments.len(),
            y_grid.segments.len(),
            total_area,
            quality
        );

        Ok(Segmentation {
            x_segments: x_grid.segments,
            y_segments: y_grid.segments,
            cells,
            total_area,
            quality: QualityScore::new(quality, ScoringMode::GridAggregate),
        })
    }

    /// Root-sum-of-squares of the slope variances outside the cells, 2 decimals.
    fn sharpness(&self, x_grid: &Grid1D, y_grid: &Grid1D) -> Result<f64, RigError> {
        let x_slopes = unmasked_differences(x_grid, self.edge_trim);
        let y_slopes = unmasked_differences(y_grid, self.edge_trim);
        match (variance(&x_slopes), variance(&y_slopes)) {
            (Some(vx), Some(vy)) => Ok(((vx + vy).sqrt() * 100.0).round() / 100.0),
            _ => Err(RigError::degenerate_input(format!(
                "too few edge samples after masking and trimming {} at each end ({} along x, {} along y)",
                self.edge_trim,
                x_slopes.len(),
                y_slopes.len()
            ))),
        }
    }
}

/// Mean intensity per column and per row, rounded to whole grey levels.
pub fn projections(image: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (width, height) = image.dimensions();
    let mut column_sums = vec![0u64; width as usize];
    let mut row_sums = vec![0u64; height as usize];
    for (x, y, pixel) in image.enumerate_pixels() {
        let v = u64::from(pixel.0[0]);
        column_sums[x as usize] += v;
        row_sums[y as usize] += v;
    }
    let columns = column_sums
        .iter()
        .map(|s| (*s as f64 / height as f64).round_ties_even())
        .collect();
    let rows = row_sums
        .iter()
        .map(|s| (*s as f64 / width as f64).round_ties_even())
        .collect();
    (columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_data::{checkerboard, uniform};

    #[test]
    fn test_rejects_bad_fraction() {
        assert!(ImageSegmenter::new(0.0, 50).is_err());
        assert!(ImageSegmenter::new(0.5, 50).is_err());
        assert!(ImageSegmenter::new(0.01, 50).is_ok());
    }

    #[test]
    fn test_projections() {
        let img = GrayImage::from_fn(4, 2, |x, y| image::Luma([(x * 10 + y * 2) as u8]));
        let (cols, rows) = projections(&img);
        assert_eq!(cols, vec![1.0, 11.0, 21.0, 31.0]);
        assert_eq!(rows, vec![15.0, 17.0]);
    }

    #[test]
    fn test_checkerboard_grid() {
        let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
        let result = segmenter.segment(&checkerboard(800, 800, 5, 16)).unwrap();
        assert_eq!(result.x_segments.len(), 5);
        assert_eq!(result.y_segments.len(), 5);
        assert_eq!(result.cell_count(), 25);
        assert!(result.quality.value > 0.0);
        assert_eq!(result.quality.mode, ScoringMode::GridAggregate);
        let summed: u64 = result.iter_cells().map(Region::area).sum();
        assert_eq!(summed, result.total_area);
    }

    #[test]
    fn test_featureless_frame_is_degenerate() {
        let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
        assert!(matches!(
            segmenter.segment(&uniform(400, 400, 128)),
            Err(RigError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_tiny_frame_is_degenerate() {
        let segmenter = ImageSegmenter::default();
        assert!(matches!(
            segmenter.segment(&uniform(2, 50, 10)),
            Err(RigError::DegenerateInput(_))
        ));
    }
}
