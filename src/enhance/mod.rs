/// Per-frame conditioning
///
/// Fixed order: grayscale -> rotate -> crop -> CLAHE -> gamma.
/// 1. Colour frames are reduced to luma (BT.601 weights)
/// 2. Small rotations (0 < |angle| <= 5 degrees) about the frame centre,
///    with the crop window shrunk to hide the exposed corners
/// 3. Rectangular crop, skipped when the clamped window is degenerate
/// 4. Optional contrast-limited adaptive histogram equalisation
/// 5. Optional gamma lookup for 1 < gamma < 10
pub mod clahe;
pub mod gamma;

pub use clahe::Clahe;
pub use gamma::GammaTable;

use crate::config::EnhancerSettings;
use crate::errors::RigError;
use crate::geometry::Region;
use crate::types::{Frame, Pixels};
use image::{GrayImage, Luma, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

pub const MAX_ROTATION_DEG: f64 = 5.0;
pub const MAX_GAMMA: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct ImageEnhancer {
    crop: Option<Region>,
    rotation_deg: f64,
    clahe: Option<Clahe>,
    gamma: f64,
    gamma_table: Option<GammaTable>,
    blend: f64,
}

impl Default for ImageEnhancer {
    fn default() -> Self {
        Self {
            crop: None,
            rotation_deg: 0.0,
            clahe: None,
            gamma: 1.0,
            gamma_table: None,
            blend: 0.0,
        }
    }
}

impl ImageEnhancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an enhancer, running every setter so that settings are validated.
    pub fn from_settings(settings: &EnhancerSettings) -> Result<Self, RigError> {
        let mut enhancer = Self::default();
        if let Some(corners) = settings.crop {
            enhancer.set_crop(Region::from_corners(corners)?);
        }
        enhancer.set_rotation(settings.rotation_deg)?;
        enhancer.set_clahe_clip_limit(settings.clahe_clip_limit)?;
        enhancer.set_gamma(settings.gamma)?;
        enhancer.set_blend(settings.blend)?;
        Ok(enhancer)
    }

    /// Rotation in degrees, accepted in `[-5, 5]` and rounded to 0.1.
    pub fn set_rotation(&mut self, degrees: f64) -> Result<(), RigError> {
        if !(-MAX_ROTATION_DEG..=MAX_ROTATION_DEG).contains(&degrees) {
            return Err(RigError::invalid_argument(format!(
                "rotation angle {degrees} outside [-{MAX_ROTATION_DEG}, {MAX_ROTATION_DEG}]"
            )));
        }
        self.rotation_deg = (degrees * 10.0).round() / 10.0;
        Ok(())
    }

    /// Gamma in `[0, 10]`; only values in `(1, 10)` change the image.
    pub fn set_gamma(&mut self, gamma: f64) -> Result<(), RigError> {
        if !(0.0..=MAX_GAMMA).contains(&gamma) {
            return Err(RigError::invalid_argument(format!(
                "gamma {gamma} outside [0, {MAX_GAMMA}]"
            )));
        }
        self.gamma = gamma;
        self.gamma_table = (gamma > 1.0 && gamma < MAX_GAMMA).then(|| GammaTable::new(gamma));
        Ok(())
    }

    /// Clip limit <= 0 disables CLAHE, up to 10 enables it.
    pub fn set_clahe_clip_limit(&mut self, limit: f64) -> Result<(), RigError> {
        if limit.is_nan() {
            return Err(RigError::invalid_argument("CLAHE clip limit is NaN"));
        }
        self.clahe = if limit <= 0.0 {
            None
        } else {
            Some(Clahe::new(limit)?)
        };
        Ok(())
    }

    pub fn set_crop(&mut self, crop: Region) {
        self.crop = Some(crop);
    }

    /// Forget the crop window; the next frame sets it to its full extent.
    pub fn reset_crop(&mut self) {
        self.crop = None;
    }

    /// Temporal blend factor in `[0, 1)`. Stored for downstream use; conditioning ignores it.
    pub fn set_blend(&mut self, alpha: f64) -> Result<(), RigError> {
        if !(0.0..1.0).contains(&alpha) {
            return Err(RigError::invalid_argument(format!(
                "blend factor {alpha} outside [0, 1)"
            )));
        }
        self.blend = alpha;
        Ok(())
    }

    pub fn crop(&self) -> Option<Region> {
        self.crop
    }

    pub fn rotation(&self) -> f64 {
        self.rotation_deg
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn clahe_clip_limit(&self) -> f64 {
        self.clahe.as_ref().map_or(0.0, Clahe::clip_limit)
    }

    pub fn blend(&self) -> f64 {
        self.blend
    }

    /// Condition one frame. The output is always single channel.
    pub fn condition(&mut self, frame: Frame) -> Result<Frame, RigError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(RigError::degenerate_input("empty frame"));
        }

        let crop = *self
            .crop
            .get_or_insert(Region::full(frame.width(), frame.height())?);

        let mut gray = match frame.pixels() {
            Pixels::Gray(img) => img.clone(),
            Pixels::Rgb(img) => to_gray(img),
        };

        let rotating = self.rotation_deg != 0.0 && self.rotation_deg.abs() <= MAX_ROTATION_DEG;
        let (delta_x, delta_y) = if rotating {
            gray = rotate_about_center(
                &gray,
                -(self.rotation_deg.to_radians() as f32),
                Interpolation::Bilinear,
                Luma([0]),
            );
            rotation_margins(self.rotation_deg, gray.width(), gray.height())
        } else {
            (0, 0)
        };

        if let Some(window) = crop_window(crop, delta_x, delta_y, gray.width(), gray.height()) {
            if window != Region::full(gray.width(), gray.height())? {
                gray = image::imageops::crop_imm(
                    &gray,
                    window.x1(),
                    window.y1(),
                    window.width(),
                    window.height(),
                )
                .to_image();
            }
        } else {
            log::debug!("crop window {crop} degenerate after rotation, keeping full frame");
        }

        if let Some(clahe) = &self.clahe {
            gray = clahe.apply(&gray);
        }

        if let Some(table) = &self.gamma_table {
            table.apply(&mut gray);
        }

        Ok(frame.with_pixels(Pixels::Gray(gray)))
    }
}

/// Luma with BT.601 weights, rounded.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
        Luma([luma as u8])
    })
}

/// Pixels to trim on each side after rotating by `degrees`.
///
/// The horizontal margin scales with the height and the vertical one with
/// the width: `round(0.5 * asin(pi * |angle| / 180) * dimension)`.
pub fn rotation_margins(degrees: f64, width: u32, height: u32) -> (u32, u32) {
    let factor = (std::f64::consts::PI * degrees.abs() / 180.0).asin();
    let dx = (0.5 * factor * height as f64).round() as u32;
    let dy = (0.5 * factor * width as f64).round() as u32;
    (dx, dy)
}

fn crop_window(crop: Region, dx: u32, dy: u32, width: u32, height: u32) -> Option<Region> {
    let x1 = crop.x1().saturating_add(dx).min(width);
    let y1 = crop.y1().saturating_add(dy).min(height);
    let x2 = crop.x2().min(width).saturating_sub(dx);
    let y2 = crop.y2().min(height).saturating_sub(dy);
    Region::new(x1, y1, x2, y2).ok()
}
