//! Single-flight frame pipeline
//!
//! [`FrameOrchestrator`] accepts at most one frame at a time. A frame that
//! arrives while a cycle is in flight is dropped, which is the only overload
//! policy: nothing is queued. Each accepted frame is conditioned, scored with
//! the selected strategy, annotated and then fanned out:
//! - display subscribers receive the annotated frame if they have room
//! - quality subscribers receive the score synchronously, bounded by a timeout
//!
//! The orchestrator only becomes idle again after the fan-out, so a quality
//! consumer always sees the score of the frame that was in flight.

pub mod annotate;
pub mod scoring;

pub use annotate::draw_regions;
pub use scoring::{laplacian_variance, resolve_roi, score_frame, Scored};

use crate::config::{ProcessorSettings, RigConfig};
use crate::enhance::ImageEnhancer;
use crate::errors::RigError;
use crate::geometry::Region;
use crate::hardware::FrameSource;
use crate::messages::MessageSink;
use crate::segment::ImageSegmenter;
use crate::timing::FpsCounter;
use crate::types::{Frame, Pixels, ProcessedFrame, QualitySample, ScoringMode};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SOURCE: &str = "processor";

/// Outcome of [`FrameOrchestrator::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// A cycle was in flight; the frame was discarded.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub submitted: u64,
    pub accepted: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
}

/// Everything a cycle reads, snapshotted once per frame.
#[derive(Debug, Clone)]
struct Pipeline {
    enhancer: ImageEnhancer,
    segmenter: ImageSegmenter,
    mode: ScoringMode,
    roi: Option<Region>,
}

enum Job {
    Process(Frame),
    Shutdown,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    busy: AtomicBool,
    pipeline: Mutex<Pipeline>,
    display: Mutex<Vec<Sender<ProcessedFrame>>>,
    quality: Mutex<Vec<Sender<QualitySample>>>,
    display_capacity: usize,
    delivery_timeout: Duration,
    messages: MessageSink,
    fps: Mutex<FpsCounter>,
    counters: Counters,
}

struct Inner {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the pipeline worker.
#[derive(Clone)]
pub struct FrameOrchestrator {
    inner: Arc<Inner>,
}

impl FrameOrchestrator {
    pub fn spawn(
        enhancer: ImageEnhancer,
        segmenter: ImageSegmenter,
        settings: &ProcessorSettings,
        messages: MessageSink,
    ) -> Result<Self, RigError> {
        let mode = ScoringMode::try_from(settings.scoring_mode)?;
        let roi = settings.roi.map(Region::from_corners).transpose()?;
        if settings.display_capacity == 0 {
            return Err(RigError::invalid_argument(
                "display capacity must be at least 1",
            ));
        }

        let shared = Arc::new(Shared {
            busy: AtomicBool::new(false),
            pipeline: Mutex::new(Pipeline {
                enhancer,
                segmenter,
                mode,
                roi,
            }),
            display: Mutex::new(Vec::new()),
            quality: Mutex::new(Vec::new()),
            display_capacity: settings.display_capacity,
            delivery_timeout: Duration::from_millis(settings.quality_delivery_timeout_ms),
            messages,
            fps: Mutex::new(FpsCounter::start()),
            counters: Counters::default(),
        });

        let (jobs, job_rx) = crossbeam_channel::bounded(1);
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("focusrig-processor".to_string())
            .spawn(move || worker_loop(worker_shared, job_rx))
            .map_err(|e| RigError::device(format!("spawn failed: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                jobs,
                closed: AtomicBool::new(false),
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Build the whole pipeline from a configuration file's sections.
    pub fn from_config(config: &RigConfig, messages: MessageSink) -> Result<Self, RigError> {
        Self::spawn(
            ImageEnhancer::from_settings(&config.enhancer)?,
            ImageSegmenter::from_settings(&config.segmenter)?,
            &config.processor,
            messages,
        )
    }

    /// Hand a frame to the worker unless a cycle is already in flight.
    pub fn submit(&self, frame: Frame) -> Result<Submission, RigError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RigError::closed("orchestrator shut down"));
        }
        let shared = &self.inner.shared;
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            shared.messages.info(SOURCE, "busy, frame dropped");
            return Ok(Submission::Dropped);
        }

        match self.inner.jobs.try_send(Job::Process(frame)) {
            Ok(()) => {
                shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(Submission::Accepted)
            }
            Err(TrySendError::Full(_)) => {
                shared.busy.store(false, Ordering::Release);
                shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(Submission::Dropped)
            }
            Err(TrySendError::Disconnected(_)) => {
                shared.busy.store(false, Ordering::Release);
                Err(RigError::closed("processor worker exited"))
            }
        }
    }

    /// Feed every frame of `source` into this orchestrator.
    pub fn attach(&self, source: &mut dyn FrameSource) -> Result<(), RigError> {
        let handle = self.clone();
        source.on_frame(Box::new(move |frame| {
            if let Err(e) = handle.submit(frame) {
                log::debug!("frame not submitted: {e}");
            }
        }))
    }

    /// Receiver of annotated frames. Frames are dropped while it holds
    /// `display_capacity` unread ones.
    pub fn subscribe_display(&self) -> Result<Receiver<ProcessedFrame>, RigError> {
        let (tx, rx) = crossbeam_channel::bounded(self.inner.shared.display_capacity);
        self.inner.shared.display.lock()?.push(tx);
        Ok(rx)
    }

    /// Receiver of quality samples, delivered as a rendezvous: the worker
    /// waits for the receiver to take each sample, up to the delivery timeout.
    pub fn subscribe_quality(&self) -> Result<Receiver<QualitySample>, RigError> {
        let (tx, rx) = crossbeam_channel::bounded(0);
        self.inner.shared.quality.lock()?.push(tx);
        Ok(rx)
    }

    pub fn is_busy(&self) -> bool {
        self.inner.shared.busy.load(Ordering::Acquire)
    }

    /// Poll until no cycle is in flight. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.inner.shared.counters;
        OrchestratorStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Completed cycles per second since the orchestrator was spawned.
    pub fn fps(&self) -> f64 {
        self.inner
            .shared
            .fps
            .lock()
            .map(|fps| fps.fps())
            .unwrap_or(0.0)
    }

    pub fn set_rotation(&self, degrees: f64) -> Result<(), RigError> {
        self.with_pipeline(|p| p.enhancer.set_rotation(degrees))
    }

    pub fn set_gamma(&self, gamma: f64) -> Result<(), RigError> {
        self.with_pipeline(|p| p.enhancer.set_gamma(gamma))
    }

    pub fn set_clahe_clip_limit(&self, limit: f64) -> Result<(), RigError> {
        self.with_pipeline(|p| p.enhancer.set_clahe_clip_limit(limit))
    }

    pub fn set_blend(&self, alpha: f64) -> Result<(), RigError> {
        self.with_pipeline(|p| p.enhancer.set_blend(alpha))
    }

    pub fn set_crop(&self, crop: Region) -> Result<(), RigError> {
        self.with_pipeline(|p| {
            p.enhancer.set_crop(crop);
            Ok(())
        })
    }

    pub fn reset_crop(&self) -> Result<(), RigError> {
        self.with_pipeline(|p| {
            p.enhancer.reset_crop();
            Ok(())
        })
    }

    /// Select the scoring strategy by index: 0, 1 or 2.
    pub fn set_scoring_mode(&self, mode: u8) -> Result<(), RigError> {
        let mode = ScoringMode::try_from(mode)?;
        self.with_pipeline(|p| {
            p.mode = mode;
            Ok(())
        })
    }

    pub fn scoring_mode(&self) -> Result<ScoringMode, RigError> {
        Ok(self.inner.shared.pipeline.lock()?.mode)
    }

    /// Fixed ROI for modes 0 and 2; `None` restores the centred default.
    pub fn set_roi(&self, roi: Option<Region>) -> Result<(), RigError> {
        self.with_pipeline(|p| {
            p.roi = roi;
            Ok(())
        })
    }

    pub fn set_segmenter(&self, segmenter: ImageSegmenter) -> Result<(), RigError> {
        self.with_pipeline(|p| {
            p.segmenter = segmenter;
            Ok(())
        })
    }

    /// Let the in-flight cycle finish, stop the worker and report the rate.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn with_pipeline(
        &self,
        f: impl FnOnce(&mut Pipeline) -> Result<(), RigError>,
    ) -> Result<(), RigError> {
        let mut pipeline = self.inner.shared.pipeline.lock()?;
        f(&mut pipeline)
    }
}

impl Inner {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.jobs.send(Job::Shutdown);
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("processor worker panicked");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, jobs: Receiver<Job>) {
    log::debug!("processor worker started");
    for job in jobs.iter() {
        let frame = match job {
            Job::Process(frame) => frame,
            Job::Shutdown => break,
        };
        let sequence = frame.sequence;

        match run_cycle(&shared, frame) {
            Ok(processed) => {
                emit(&shared, processed);
                shared.counters.processed.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut fps) = shared.fps.lock() {
                    fps.update();
                }
            }
            Err(e) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                let text = format!("frame {sequence} not processed: {e}");
                match e {
                    RigError::DegenerateInput(_) => shared.messages.warn(SOURCE, text),
                    _ => shared.messages.error(SOURCE, text),
                }
            }
        }
        shared.busy.store(false, Ordering::Release);
    }

    let fps = match shared.fps.lock() {
        Ok(mut counter) => {
            counter.stop();
            counter.fps()
        }
        Err(_) => 0.0,
    };
    shared
        .messages
        .info(SOURCE, format!("approx. processing speed: {fps:.1} fps"));
}

fn run_cycle(shared: &Shared, frame: Frame) -> Result<ProcessedFrame, RigError> {
    let mut pipeline = shared.pipeline.lock()?.clone();
    let first_crop = pipeline.enhancer.crop().is_none();

    let result = process(&mut pipeline, frame);

    if first_crop {
        if let Some(crop) = pipeline.enhancer.crop() {
            let mut current = shared.pipeline.lock()?;
            if current.enhancer.crop().is_none() {
                current.enhancer.set_crop(crop);
            }
        }
    }
    result
}

fn process(pipeline: &mut Pipeline, frame: Frame) -> Result<ProcessedFrame, RigError> {
    let conditioned = pipeline.enhancer.condition(frame)?;
    let gray = conditioned
        .as_gray()
        .ok_or_else(|| RigError::degenerate_input("conditioned frame is not single channel"))?;

    let scored = score_frame(pipeline.mode, gray, pipeline.roi, &pipeline.segmenter)?;
    let mut annotated = gray.clone();
    draw_regions(&mut annotated, &scored.regions);

    Ok(ProcessedFrame {
        frame: conditioned.with_pixels(Pixels::Gray(annotated)),
        quality: scored.quality,
    })
}

fn emit(shared: &Shared, processed: ProcessedFrame) {
    let sample = QualitySample {
        score: processed.quality,
        frame_sequence: processed.frame.sequence,
        captured_at: processed.frame.captured_at,
    };

    if let Ok(mut subscribers) = shared.quality.lock() {
        subscribers.retain(|tx| match tx.send_timeout(sample, shared.delivery_timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                shared.messages.warn(
                    SOURCE,
                    format!(
                        "quality of frame {} not taken within {:?}",
                        sample.frame_sequence, shared.delivery_timeout
                    ),
                );
                true
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        });
    }

    if let Ok(mut subscribers) = shared.display.lock() {
        subscribers.retain(|tx| match tx.try_send(processed.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
