//! One-dimensional grid-line detection.

use crate::assert_invariant;
use crate::errors::RigError;
use serde::Serialize;

/// Segments shorter than this many smoothing windows are suppressed.
pub const MIN_SEGMENT_WINDOWS: usize = 10;

/// Run of low edge energy along one axis: the interior of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridSegment {
    pub start: usize,
    pub length: usize,
}

impl GridSegment {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

/// Result of [`find_1d_grid`] for one projection.
#[derive(Debug, Clone)]
pub struct Grid1D {
    /// Smoothing window actually used (odd, at least 3).
    pub window: usize,
    pub segments: Vec<GridSegment>,
    /// True where the smoothed signal lies inside a kept segment.
    pub mask: Vec<bool>,
    /// High-passed, smoothed and zero-centred signal.
    pub smoothed: Vec<f64>,
}

/// Odd smoothing window for a signal: `max(odd(fraction * length), 3)`.
pub fn odd_window(size_fraction: f64, length: usize) -> usize {
    let mut n = (size_fraction * length as f64) as usize;
    if n % 2 == 0 {
        n += 1;
    }
    n.max(3)
}

/// Centred moving average with zero padding; output has the input's length.
pub fn moving_average(data: &[f64], window: usize) -> Result<Vec<f64>, RigError> {
    if window < 3 || window % 2 == 0 {
        return Err(RigError::invalid_argument(format!(
            "moving average window {window} must be odd and greater than 1"
        )));
    }
    let half = window / 2;
    let padded_len = data.len() + 2 * half;
    let at = |i: usize| -> f64 {
        if i < half || i >= half + data.len() {
            0.0
        } else {
            data[i - half]
        }
    };

    let mut out = Vec::with_capacity(data.len());
    let mut sum: f64 = (0..window.min(padded_len)).map(at).sum();
    out.push(sum / window as f64);
    for i in window..padded_len {
        sum += at(i) - at(i - window);
        out.push(sum / window as f64);
    }
    out.truncate(data.len());
    Ok(out)
}

/// Find grid cells along one intensity projection.
///
/// The signal is high-passed against a `3 * window` moving average, smoothed
/// with `window`, and centred on zero. Negative stretches are cell interiors;
/// stretches shorter than `MIN_SEGMENT_WINDOWS * window` are dropped from the
/// mask. A stretch still open at the end of the signal is not reported.
pub fn find_1d_grid(profile: &[f64], window: usize) -> Result<Grid1D, RigError> {
    if window <= 1 {
        return Err(RigError::invalid_argument(format!(
            "grid window {window} must be greater than 1"
        )));
    }
    let window = if window % 2 == 0 { window + 1 } else { window };
    if profile.is_empty() {
        return Err(RigError::degenerate_input("empty intensity profile"));
    }

    let trend = moving_average(profile, 3 * window)?;
    let mut high_pass: Vec<f64> = profile
        .iter()
        .zip(trend.iter())
        .map(|(v, t)| (v - t).abs())
        .collect();
    let edge = window.min(high_pass.len());
    high_pass[..edge].fill(0.0);
    let len = high_pass.len();
    high_pass[len - edge..].fill(0.0);

    let mut smoothed = moving_average(&high_pass, window)?;
    let mean = smoothed.iter().sum::<f64>() / smoothed.len() as f64;
    for v in smoothed.iter_mut() {
        *v -= mean;
    }

    let mut mask: Vec<bool> = smoothed.iter().map(|v| *v < 0.0).collect();
    let min_length = MIN_SEGMENT_WINDOWS * window;
    let mut segments: Vec<GridSegment> = Vec::new();
    let mut run = 0usize;
    let mut previous = false;
    for index in 0..mask.len() {
        let inside = mask[index];
        if inside {
            run += 1;
        } else if previous {
            let start = index - run;
            if run < min_length {
                mask[start..index].fill(false);
            } else {
                segments.push(GridSegment { start, length: run });
            }
            run = 0;
        }
        previous = inside;
    }

    for pair in segments.windows(2) {
        assert_invariant!(
            pair[0].end() <= pair[1].start,
            "grid segments overlap or are out of order",
            "find_1d_grid"
        );
    }
    for segment in &segments {
        assert_invariant!(
            segment.length >= min_length,
            "grid segment shorter than minimum length",
            "find_1d_grid"
        );
    }

    Ok(Grid1D {
        window,
        segments,
        mask,
        smoothed,
    })
}

/// First differences of the smoothed signal outside the mask, with `trim`
/// samples dropped at both ends.
pub fn unmasked_differences(grid: &Grid1D, trim: usize) -> Vec<f64> {
    let kept: Vec<f64> = grid
        .smoothed
        .iter()
        .zip(grid.mask.iter())
        .filter(|(_, masked)| !**masked)
        .map(|(v, _)| *v)
        .collect();
    let diffs: Vec<f64> = kept.windows(2).map(|w| w[1] - w[0]).collect();
    if diffs.len() <= 2 * trim {
        return Vec::new();
    }
    diffs[trim..diffs.len() - trim].to_vec()
}

/// Population variance, `None` for an empty slice.
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n)
}
