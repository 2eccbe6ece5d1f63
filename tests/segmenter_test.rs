//! Tests for grid segmentation of counting-chamber frames

use focusrig::errors::RigError;
use focusrig::invariant_ppt::{contract_test, reset};
use focusrig::processor::score_frame;
use focusrig::segment::{find_1d_grid, ImageSegmenter, MIN_SEGMENT_WINDOWS};
use focusrig::testing::{blurred_checkerboard, checkerboard, uniform};
use focusrig::types::ScoringMode;
use proptest::prelude::*;

fn assert_near_equal(lengths: &[usize]) {
    let min = *lengths.iter().min().unwrap();
    let max = *lengths.iter().max().unwrap();
    assert!(max - min <= 3, "segment lengths differ too much: {lengths:?}");
}

#[test]
fn test_checkerboard_yields_five_by_five_grid() {
    let segmenter = ImageSegmenter::new(0.005, 50).unwrap();
    let result = segmenter.segment(&checkerboard(1280, 960, 5, 40)).unwrap();

    assert_eq!(result.x_segments.len(), 5);
    assert_eq!(result.y_segments.len(), 5);
    assert_eq!(result.cell_count(), 25);
    assert_near_equal(&result.x_segments.iter().map(|s| s.length).collect::<Vec<_>>());
    assert_near_equal(&result.y_segments.iter().map(|s| s.length).collect::<Vec<_>>());
    assert!(result.quality.value > 0.0);
}

#[test]
fn test_segments_lie_inside_checkerboard_cells() {
    // 800 px, margin 16: cells are 153 px wide starting at 16
    let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
    let result = segmenter.segment(&checkerboard(800, 800, 5, 16)).unwrap();
    for (i, segment) in result.x_segments.iter().enumerate() {
        let cell_start = 16 + 153 * i;
        assert!(segment.start >= cell_start, "{segment:?} starts before cell {i}");
        assert!(segment.end() <= cell_start + 153, "{segment:?} ends after cell {i}");
    }
}

#[test]
fn test_uniform_frame_is_degenerate() {
    let segmenter = ImageSegmenter::new(0.005, 50).unwrap();
    let result = segmenter.segment(&uniform(640, 480, 128));
    assert!(matches!(result, Err(RigError::DegenerateInput(_))));
}

#[test]
fn test_uniform_gray_scores_zero_where_grid_is_sharp() {
    let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
    let gray = uniform(800, 800, 128);
    let grid = checkerboard(800, 800, 5, 16);

    // No edges at all: the plain ROI score is exactly zero.
    let flat = score_frame(ScoringMode::PlainRoi, &gray, None, &segmenter).unwrap();
    assert_eq!(flat.quality.value, 0.0);
    let sharp = score_frame(ScoringMode::PlainRoi, &grid, None, &segmenter).unwrap();
    assert!(sharp.quality.value > flat.quality.value);

    // The grid-based modes have nothing to segment.
    for mode in [ScoringMode::GridAggregate, ScoringMode::RoiIntersectGrid] {
        assert!(matches!(
            score_frame(mode, &gray, None, &segmenter),
            Err(RigError::DegenerateInput(_))
        ));
    }
}

#[test]
fn test_tiny_frame_is_degenerate() {
    let segmenter = ImageSegmenter::new(0.005, 50).unwrap();
    assert!(matches!(
        segmenter.segment(&uniform(2, 2, 0)),
        Err(RigError::DegenerateInput(_))
    ));
}

#[test]
fn test_sharp_grid_scores_above_blurred_grid() {
    let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
    let sharp = segmenter.segment(&checkerboard(800, 800, 5, 16)).unwrap();
    let blurred = segmenter
        .segment(&blurred_checkerboard(800, 800, 5, 16, 6.0))
        .unwrap();
    assert!(
        sharp.quality.value > blurred.quality.value,
        "sharp {} vs blurred {}",
        sharp.quality.value,
        blurred.quality.value
    );
}

#[test]
fn test_grid_invariants_are_exercised() {
    reset();
    let segmenter = ImageSegmenter::new(0.01, 50).unwrap();
    segmenter.segment(&checkerboard(800, 800, 5, 16)).unwrap();
    contract_test(
        "grid segmentation",
        &[
            "grid segments overlap or are out of order",
            "grid segment shorter than minimum length",
        ],
    );
}

#[test]
fn test_find_1d_grid_rejects_small_window() {
    assert!(matches!(
        find_1d_grid(&[1.0; 100], 1),
        Err(RigError::InvalidArgument(_))
    ));
    assert!(matches!(
        find_1d_grid(&[], 5),
        Err(RigError::DegenerateInput(_))
    ));
}

proptest! {
    /// INVARIANT: segments are ordered, disjoint, long enough and inside the signal
    #[test]
    fn find_1d_grid_segments_are_well_formed(
        profile in prop::collection::vec(0.0f64..255.0, 50..600),
        window in 2usize..15,
    ) {
        let grid = find_1d_grid(&profile, window).unwrap();
        prop_assert_eq!(grid.window % 2, 1);
        prop_assert_eq!(grid.mask.len(), profile.len());
        prop_assert_eq!(grid.smoothed.len(), profile.len());
        for pair in grid.segments.windows(2) {
            prop_assert!(pair[0].end() <= pair[1].start);
        }
        for segment in &grid.segments {
            prop_assert!(segment.length >= MIN_SEGMENT_WINDOWS * grid.window);
            prop_assert!(segment.end() <= profile.len());
            prop_assert!(grid.mask[segment.start..segment.end()].iter().all(|m| *m));
        }
    }
}
