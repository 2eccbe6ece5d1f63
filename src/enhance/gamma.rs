use image::GrayImage;

/// Precomputed 256-entry gamma lookup table.
#[derive(Debug, Clone)]
pub struct GammaTable {
    gamma: f64,
    table: [u8; 256],
}

impl GammaTable {
    /// `table[i] = ((i / 255) ^ (1 / gamma)) * 255`, truncated to u8.
    pub fn new(gamma: f64) -> Self {
        let inv_gamma = 1.0 / gamma;
        let mut table = [0u8; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let value = (i as f64 / 255.0).powf(inv_gamma) * 255.0;
            *entry = value.clamp(0.0, 255.0) as u8;
        }
        Self { gamma, table }
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn lookup(&self, value: u8) -> u8 {
        self.table[value as usize]
    }

    pub fn apply(&self, image: &mut GrayImage) {
        for pixel in image.pixels_mut() {
            pixel.0[0] = self.table[pixel.0[0] as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_are_fixed() {
        let table = GammaTable::new(2.2);
        assert_eq!(table.lookup(0), 0);
        assert_eq!(table.lookup(255), 255);
    }

    #[test]
    fn test_gamma_above_one_brightens_midtones() {
        let table = GammaTable::new(2.0);
        // sqrt(128/255) * 255 = 180.6
        assert_eq!(table.lookup(128), 180);
        for v in 1..255u8 {
            assert!(table.lookup(v) >= v);
        }
    }

    #[test]
    fn test_apply_in_place() {
        let mut img = GrayImage::from_pixel(3, 3, image::Luma([64]));
        let table = GammaTable::new(2.0);
        table.apply(&mut img);
        assert!(img.pixels().all(|p| p.0[0] == table.lookup(64)));
    }
}
