//! Axis-aligned region algebra.
//!
//! A [`Region`] is an immutable value `(x1, y1, x2, y2)` with `x2 > x1` and
//! `y2 > y1`; the half-open pixel span is `[x1, x2) x [y1, y2)`.

use crate::errors::RigError;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl Region {
    /// Create a region from its corners, rejecting empty or inverted spans.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, RigError> {
        if x2 <= x1 || y2 <= y1 {
            return Err(RigError::invalid_argument(format!(
                "region ({x1},{y1},{x2},{y2}) must satisfy x2 > x1 and y2 > y1"
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Create a region from `(left, top, width, height)`.
    pub fn from_xywh(left: u32, top: u32, width: u32, height: u32) -> Result<Self, RigError> {
        let x2 = left
            .checked_add(width)
            .ok_or_else(|| RigError::invalid_argument("region width overflows"))?;
        let y2 = top
            .checked_add(height)
            .ok_or_else(|| RigError::invalid_argument("region height overflows"))?;
        Self::new(left, top, x2, y2)
    }

    /// The whole `width x height` frame.
    pub fn full(width: u32, height: u32) -> Result<Self, RigError> {
        Self::new(0, 0, width, height)
    }

    /// Square of the given side centred in a `width x height` frame.
    pub fn centered_square(width: u32, height: u32, side: u32) -> Result<Self, RigError> {
        let side = side.min(width).min(height);
        let x1 = (width - side) / 2;
        let y1 = (height - side) / 2;
        Self::from_xywh(x1, y1, side, side)
    }

    /// Parse the `[x1, y1, x2, y2]` form used in configuration files.
    pub fn from_corners(corners: [u32; 4]) -> Result<Self, RigError> {
        Self::new(corners[0], corners[1], corners[2], corners[3])
    }

    pub fn corners(&self) -> [u32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Overlap of two regions, `None` when they share no pixel.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Region { x1, y1, x2, y2 })
    }

    /// Smallest region enclosing both.
    pub fn union(&self, other: &Region) -> Region {
        Region {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// True when `other` lies wholly inside `self`.
    pub fn contains(&self, other: &Region) -> bool {
        self.intersection(other)
            .is_some_and(|overlap| overlap.area() == other.area())
    }

    /// Clip to a `width x height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        Region::full(width, height)
            .ok()
            .and_then(|frame| frame.intersection(self))
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})-({},{})", self.x1, self.y1, self.x2, self.y2)
    }
}
