//! Contrast-limited adaptive histogram equalisation on an 8x8 tile grid.
//!
//! Each tile gets its own clipped-histogram lookup table; output pixels are
//! bilinearly interpolated between the tables of the four nearest tile
//! centres.

use crate::errors::RigError;
use image::GrayImage;

const BINS: usize = 256;
pub const TILE_GRID: u32 = 8;
pub const MAX_CLIP_LIMIT: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct Clahe {
    clip_limit: f64,
}

impl Clahe {
    /// Clip limit must be in `(0, 10]`.
    pub fn new(clip_limit: f64) -> Result<Self, RigError> {
        if !(clip_limit > 0.0 && clip_limit <= MAX_CLIP_LIMIT) {
            return Err(RigError::invalid_argument(format!(
                "CLAHE clip limit {clip_limit} outside (0, {MAX_CLIP_LIMIT}]"
            )));
        }
        Ok(Self { clip_limit })
    }

    pub fn clip_limit(&self) -> f64 {
        self.clip_limit
    }

    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image.clone();
        }
        let tiles_x = TILE_GRID.min(width);
        let tiles_y = TILE_GRID.min(height);

        let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
        for ty in 0..tiles_y {
            let (y0, y1) = tile_span(ty, tiles_y, height);
            for tx in 0..tiles_x {
                let (x0, x1) = tile_span(tx, tiles_x, width);
                luts.push(self.tile_lut(image, x0, x1, y0, y1));
            }
        }

        let inv_tw = tiles_x as f32 / width as f32;
        let inv_th = tiles_y as f32 / height as f32;
        let lut_at = |tx: i64, ty: i64| &luts[(ty as u32 * tiles_x + tx as u32) as usize];

        let mut out = GrayImage::new(width, height);
        for y in 0..height {
            let tyf = y as f32 * inv_th - 0.5;
            let ty1 = tyf.floor() as i64;
            let ya = tyf - ty1 as f32;
            let ty2 = (ty1 + 1).min(tiles_y as i64 - 1);
            let ty1 = ty1.max(0);
            for x in 0..width {
                let txf = x as f32 * inv_tw - 0.5;
                let tx1 = txf.floor() as i64;
                let xa = txf - tx1 as f32;
                let tx2 = (tx1 + 1).min(tiles_x as i64 - 1);
                let tx1 = tx1.max(0);

                let v = image.get_pixel(x, y).0[0] as usize;
                let top = lut_at(tx1, ty1)[v] as f32 * (1.0 - xa) + lut_at(tx2, ty1)[v] as f32 * xa;
                let bottom =
                    lut_at(tx1, ty2)[v] as f32 * (1.0 - xa) + lut_at(tx2, ty2)[v] as f32 * xa;
                let value = top * (1.0 - ya) + bottom * ya;
                out.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
            }
        }
        out
    }

    fn tile_lut(&self, image: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32) -> [u8; BINS] {
        let mut hist = [0u32; BINS];
        for y in y0..y1 {
            for x in x0..x1 {
                hist[image.get_pixel(x, y).0[0] as usize] += 1;
            }
        }
        let area = ((x1 - x0) * (y1 - y0)).max(1);

        let clip = ((self.clip_limit * area as f64 / BINS as f64) as u32).max(1);
        let mut clipped = 0u32;
        for bin in hist.iter_mut() {
            if *bin > clip {
                clipped += *bin - clip;
                *bin = clip;
            }
        }

        // Spread the clipped mass evenly, then the remainder one count at a time.
        let batch = clipped / BINS as u32;
        let mut residual = clipped - batch * BINS as u32;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (BINS as u32 / residual).max(1) as usize;
            for bin in hist.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *bin += 1;
                residual -= 1;
            }
        }

        let scale = 255.0 / area as f64;
        let mut lut = [0u8; BINS];
        let mut sum = 0u32;
        for (entry, count) in lut.iter_mut().zip(hist.iter()) {
            sum += count;
            *entry = (sum as f64 * scale).round().clamp(0.0, 255.0) as u8;
        }
        lut
    }
}

fn tile_span(index: u32, tiles: u32, extent: u32) -> (u32, u32) {
    let start = (index as u64 * extent as u64 / tiles as u64) as u32;
    let end = ((index as u64 + 1) * extent as u64 / tiles as u64) as u32;
    (start, end)
}
