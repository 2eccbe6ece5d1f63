//! Processing-rate bookkeeping.

use std::time::{Duration, Instant};

/// Counts completed cycles since `start` and reports the average rate.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    started: Instant,
    stopped: Option<Instant>,
    frames: u64,
}

impl FpsCounter {
    /// Start counting now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            stopped: None,
            frames: 0,
        }
    }

    /// Record one completed cycle.
    #[inline]
    pub fn update(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Freeze the elapsed time; later updates still count frames.
    pub fn stop(&mut self) {
        self.stopped.get_or_insert_with(Instant::now);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> Duration {
        self.stopped.unwrap_or_else(Instant::now) - self.started
    }

    /// Average cycles per second, 0 before any time has passed.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.frames as f64 / secs
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::start()
    }
}
