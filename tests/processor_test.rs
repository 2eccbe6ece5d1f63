//! Tests for the single-flight frame orchestrator

use focusrig::config::ProcessorSettings;
use focusrig::enhance::ImageEnhancer;
use focusrig::geometry::Region;
use focusrig::messages::MessageSink;
use focusrig::processor::{laplacian_variance, FrameOrchestrator, Submission};
use focusrig::segment::ImageSegmenter;
use focusrig::testing::{blurred_checkerboard, checkerboard, uniform};
use focusrig::types::{Frame, ScoringMode};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn orchestrator(mode: u8, sink: MessageSink) -> FrameOrchestrator {
    let settings = ProcessorSettings {
        scoring_mode: mode,
        ..ProcessorSettings::default()
    };
    FrameOrchestrator::spawn(
        ImageEnhancer::new(),
        ImageSegmenter::new(0.01, 50).unwrap(),
        &settings,
        sink,
    )
    .unwrap()
}

#[test]
fn test_frames_at_twice_the_cycle_rate_drop_every_other_one() {
    let (sink, messages) = MessageSink::channel(64);
    let orch = orchestrator(0, sink);
    let quality = orch.subscribe_quality().unwrap();
    let image = checkerboard(320, 240, 5, 8);

    // Two frames per cycle: the worker is held in its quality delivery until
    // the sample is taken, so the second frame always meets a busy pipeline.
    let mut outcomes = Vec::new();
    for pair in 0..10u64 {
        outcomes.push(orch.submit(Frame::from_gray(2 * pair, image.clone())).unwrap());
        outcomes.push(orch.submit(Frame::from_gray(2 * pair + 1, image.clone())).unwrap());
        let sample = quality.recv_timeout(WAIT).unwrap();
        assert_eq!(sample.frame_sequence, 2 * pair);
        assert!(orch.wait_idle(WAIT));
    }

    for (i, outcome) in outcomes.iter().enumerate() {
        let expected = if i % 2 == 0 {
            Submission::Accepted
        } else {
            Submission::Dropped
        };
        assert_eq!(*outcome, expected, "frame {i}");
    }
    let stats = orch.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.accepted, 10);
    assert_eq!(stats.dropped, 10);
    assert_eq!(stats.processed, 10);
    assert_eq!(
        messages
            .try_iter()
            .filter(|m| m.text == "busy, frame dropped")
            .count(),
        10
    );
}

#[test]
fn test_sharp_frame_scores_above_blurred_frame() {
    let orch = orchestrator(0, MessageSink::log_only());
    let quality = orch.subscribe_quality().unwrap();

    orch.submit(Frame::from_gray(0, checkerboard(320, 240, 5, 8)))
        .unwrap();
    let sharp = quality.recv_timeout(WAIT).unwrap();
    assert!(orch.wait_idle(WAIT));

    orch.submit(Frame::from_gray(1, blurred_checkerboard(320, 240, 5, 8, 3.0)))
        .unwrap();
    let blurred = quality.recv_timeout(WAIT).unwrap();

    assert_eq!(sharp.score.mode, ScoringMode::PlainRoi);
    assert!(sharp.score.value > blurred.score.value);
}

#[test]
fn test_roi_within_grid_scores_only_enclosed_cells() {
    let orch = orchestrator(0, MessageSink::log_only());
    orch.set_scoring_mode(2).unwrap();
    let top_half = Region::new(0, 0, 800, 400).unwrap();
    orch.set_roi(Some(top_half)).unwrap();
    assert_eq!(orch.scoring_mode().unwrap(), ScoringMode::RoiIntersectGrid);

    let display = orch.subscribe_display().unwrap();
    let image = checkerboard(800, 800, 5, 16);
    orch.submit(Frame::from_gray(3, image.clone())).unwrap();
    let processed = display.recv_timeout(WAIT).unwrap();
    assert_eq!(processed.quality.mode, ScoringMode::RoiIntersectGrid);

    let enclosed: Vec<Region> = ImageSegmenter::new(0.01, 50)
        .unwrap()
        .segment(&image)
        .unwrap()
        .iter_cells()
        .copied()
        .filter(|cell| top_half.contains(cell))
        .collect();
    assert_eq!(enclosed.len(), 10);
    let expected =
        enclosed.iter().map(|c| laplacian_variance(&image, c)).sum::<f64>() / enclosed.len() as f64;
    assert!((processed.quality.value - expected).abs() < 1e-9);

    // Outlines are drawn on the display copy only.
    let annotated = processed.frame.as_gray().unwrap();
    let corner = enclosed[0];
    assert_eq!(annotated.get_pixel(corner.x1(), corner.y1()).0[0], 255);
}

#[test]
fn test_roi_outside_every_cell_scores_zero() {
    let orch = orchestrator(2, MessageSink::log_only());
    // Thin strip along the top margin, no cell fits inside.
    orch.set_roi(Some(Region::new(0, 0, 800, 10).unwrap())).unwrap();
    let quality = orch.subscribe_quality().unwrap();
    orch.submit(Frame::from_gray(0, checkerboard(800, 800, 5, 16)))
        .unwrap();
    let sample = quality.recv_timeout(WAIT).unwrap();
    assert_eq!(sample.score.value, 0.0);
}

#[test]
fn test_slow_display_subscriber_keeps_only_capacity_frames() {
    let orch = orchestrator(0, MessageSink::log_only());
    let display = orch.subscribe_display().unwrap();
    for sequence in 0..5 {
        assert_eq!(
            orch.submit(Frame::from_gray(sequence, checkerboard(160, 120, 5, 8)))
                .unwrap(),
            Submission::Accepted
        );
        assert!(orch.wait_idle(WAIT));
    }
    assert_eq!(orch.stats().processed, 5);
    let kept: Vec<u64> = display.try_iter().map(|p| p.frame.sequence).collect();
    assert_eq!(kept, vec![0, 1]);
}

#[test]
fn test_dropped_quality_subscriber_is_forgotten() {
    let orch = orchestrator(0, MessageSink::log_only());
    let quality = orch.subscribe_quality().unwrap();
    drop(quality);
    orch.submit(Frame::from_gray(0, checkerboard(160, 120, 5, 8)))
        .unwrap();
    assert!(orch.wait_idle(WAIT));
    assert_eq!(orch.stats().processed, 1);
}

#[test]
fn test_failed_cycles_do_not_count_towards_speed() {
    let orch = orchestrator(1, MessageSink::log_only());

    for sequence in 0..3 {
        orch.submit(Frame::from_gray(sequence, uniform(400, 400, 128)))
            .unwrap();
        assert!(orch.wait_idle(WAIT));
    }
    assert_eq!(orch.stats().failed, 3);
    assert_eq!(orch.fps(), 0.0);

    orch.submit(Frame::from_gray(3, checkerboard(800, 800, 5, 16)))
        .unwrap();
    assert!(orch.wait_idle(WAIT));
    assert_eq!(orch.stats().processed, 1);
    assert!(orch.fps() > 0.0);
}

#[test]
fn test_shutdown_reports_processing_speed() {
    let (sink, messages) = MessageSink::channel(16);
    let orch = orchestrator(0, sink);
    orch.submit(Frame::from_gray(0, checkerboard(160, 120, 5, 8)))
        .unwrap();
    assert!(orch.wait_idle(WAIT));
    orch.shutdown();
    assert!(messages
        .try_iter()
        .any(|m| m.text.starts_with("approx. processing speed:")));
}
