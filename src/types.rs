//! Data carried between pipeline stages.

use crate::errors::RigError;
use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Pixel buffer of a frame: single channel or packed RGB.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    Gray(GrayImage),
    Rgb(RgbImage),
}

/// One captured image.
///
/// Frames are moved from stage to stage; no stage keeps a reference to a
/// frame it has handed on.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    /// Monotonic capture instant, used to tell fresh quality samples from stale ones.
    pub captured_at: Instant,
    /// Wall-clock capture time.
    pub timestamp: DateTime<Utc>,
    pixels: Pixels,
}

impl Frame {
    pub fn new(sequence: u64, pixels: Pixels) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            timestamp: Utc::now(),
            pixels,
        }
    }

    pub fn from_gray(sequence: u64, image: GrayImage) -> Self {
        Self::new(sequence, Pixels::Gray(image))
    }

    pub fn from_rgb(sequence: u64, image: RgbImage) -> Self {
        Self::new(sequence, Pixels::Rgb(image))
    }

    /// Build a frame from a raw row-major buffer with 1 or 3 channels.
    pub fn from_raw(
        sequence: u64,
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<Self, RigError> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(RigError::invalid_argument(format!(
                "frame buffer holds {} bytes, expected {expected} for {width}x{height}x{channels}",
                data.len()
            )));
        }
        let pixels = match channels {
            1 => GrayImage::from_raw(width, height, data).map(Pixels::Gray),
            3 => RgbImage::from_raw(width, height, data).map(Pixels::Rgb),
            other => {
                return Err(RigError::invalid_argument(format!(
                    "unsupported channel count {other}, expected 1 or 3"
                )))
            }
        };
        pixels
            .map(|p| Self::new(sequence, p))
            .ok_or_else(|| RigError::invalid_argument("frame buffer does not match dimensions"))
    }

    pub fn width(&self) -> u32 {
        match &self.pixels {
            Pixels::Gray(img) => img.width(),
            Pixels::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.pixels {
            Pixels::Gray(img) => img.height(),
            Pixels::Rgb(img) => img.height(),
        }
    }

    pub fn channels(&self) -> u8 {
        match &self.pixels {
            Pixels::Gray(_) => 1,
            Pixels::Rgb(_) => 3,
        }
    }

    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Gray view of the frame, if it already is single channel.
    pub fn as_gray(&self) -> Option<&GrayImage> {
        match &self.pixels {
            Pixels::Gray(img) => Some(img),
            Pixels::Rgb(_) => None,
        }
    }

    /// Same capture metadata, new pixel buffer.
    pub fn with_pixels(self, pixels: Pixels) -> Self {
        Self { pixels, ..self }
    }
}

/// Which quality strategy scored a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoringMode {
    /// Laplacian variance inside the region of interest.
    PlainRoi,
    /// Segmenter sharpness over the detected grid.
    GridAggregate,
    /// Mean Laplacian variance of grid cells lying wholly inside the ROI.
    RoiIntersectGrid,
}

impl ScoringMode {
    pub fn index(&self) -> u8 {
        match self {
            Self::PlainRoi => 0,
            Self::GridAggregate => 1,
            Self::RoiIntersectGrid => 2,
        }
    }
}

impl TryFrom<u8> for ScoringMode {
    type Error = RigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::PlainRoi),
            1 => Ok(Self::GridAggregate),
            2 => Ok(Self::RoiIntersectGrid),
            other => Err(RigError::invalid_argument(format!(
                "scoring mode {other} unknown, expected 0, 1 or 2"
            ))),
        }
    }
}

/// Scalar sharpness estimate, larger is sharper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub value: f64,
    pub mode: ScoringMode,
}

impl QualityScore {
    pub fn new(value: f64, mode: ScoringMode) -> Self {
        Self { value, mode }
    }
}

/// Quality score together with the capture instant of the frame it was computed from.
#[derive(Debug, Clone, Copy)]
pub struct QualitySample {
    pub score: QualityScore,
    pub frame_sequence: u64,
    pub captured_at: Instant,
}

/// Output of one processing cycle: the annotated frame and its score.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: Frame,
    pub quality: QualityScore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Frame::from_raw(0, 4, 4, 1, vec![0; 16]).is_ok());
        assert!(Frame::from_raw(0, 4, 4, 3, vec![0; 16]).is_err());
        assert!(Frame::from_raw(0, 4, 4, 2, vec![0; 32]).is_err());
    }

    #[test]
    fn test_frame_dimensions() {
        let frame = Frame::from_raw(7, 8, 6, 3, vec![0; 8 * 6 * 3]).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (8, 6, 3));
        assert_eq!(frame.sequence, 7);
        assert!(frame.as_gray().is_none());
    }

    #[test]
    fn test_with_pixels_keeps_metadata() {
        let frame = Frame::from_gray(3, GrayImage::new(4, 4));
        let at = frame.captured_at;
        let replaced = frame.with_pixels(Pixels::Gray(GrayImage::new(2, 2)));
        assert_eq!(replaced.sequence, 3);
        assert_eq!(replaced.captured_at, at);
        assert_eq!(replaced.width(), 2);
    }

    #[test]
    fn test_scoring_mode_from_index() {
        assert_eq!(ScoringMode::try_from(1).unwrap(), ScoringMode::GridAggregate);
        assert_eq!(ScoringMode::RoiIntersectGrid.index(), 2);
        assert!(matches!(
            ScoringMode::try_from(3),
            Err(RigError::InvalidArgument(_))
        ));
    }
}
