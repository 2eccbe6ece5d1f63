//! Grid-search autofocus driven by the quality stream
//!
//! The controller owns the focus actuator and a worker thread. A session
//! walks [`GridSearch`] rounds: command a position, let the optics settle,
//! average `k` fresh quality samples, and after the last position of the
//! round move the centre to the best one. Every wait (settling, each sample)
//! also listens for commands, so `stop()` takes effect at the next wait.
//!
//! Samples are consumed even while no session runs, so a synchronous
//! producer is never held up by an idle controller.

pub mod grid_search;

pub use grid_search::{stable_argmax, GridSearch, RoundOutcome, RoundPlan};

use crate::config::AutoFocusSettings;
use crate::errors::RigError;
use crate::hardware::FocusActuator;
use crate::messages::MessageSink;
use crate::types::QualitySample;
use crossbeam_channel::{never, select, Receiver, RecvError, Sender};
use grid_search::round2;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SOURCE: &str = "autofocus";

/// Validated search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoFocusConfig {
    pub grid_half_width: usize,
    pub initial_step: f64,
    pub samples_per_point: usize,
    pub rounds: usize,
    pub settle: Duration,
    pub sample_timeout: Duration,
    pub position_min: f64,
    pub position_max: f64,
}

impl AutoFocusConfig {
    pub fn from_settings(settings: &AutoFocusSettings) -> Result<Self, RigError> {
        let config = Self {
            grid_half_width: settings.grid_half_width as usize,
            initial_step: settings.initial_step,
            samples_per_point: settings.samples_per_point as usize,
            rounds: settings.rounds as usize,
            settle: Duration::from_millis(settings.settle_ms),
            sample_timeout: Duration::from_millis(settings.sample_timeout_ms),
            position_min: settings.position_min,
            position_max: settings.position_max,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RigError> {
        if self.samples_per_point == 0 {
            return Err(RigError::invalid_argument(
                "samples per point must be at least 1",
            ));
        }
        if self.sample_timeout.is_zero() {
            return Err(RigError::invalid_argument("sample timeout must be positive"));
        }
        self.search(0.0).map(|_| ())
    }

    fn search(&self, center: f64) -> Result<GridSearch, RigError> {
        GridSearch::new(
            center,
            self.grid_half_width,
            self.initial_step,
            self.rounds,
            (self.position_min, self.position_max),
        )
    }
}

impl Default for AutoFocusConfig {
    fn default() -> Self {
        let d = AutoFocusSettings::default();
        Self {
            grid_half_width: d.grid_half_width as usize,
            initial_step: d.initial_step,
            samples_per_point: d.samples_per_point as usize,
            rounds: d.rounds as usize,
            settle: Duration::from_millis(d.settle_ms),
            sample_timeout: Duration::from_millis(d.sample_timeout_ms),
            position_min: d.position_min,
            position_max: d.position_max,
        }
    }
}

/// Progress notifications published by the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutoFocusEvent {
    Started {
        center: f64,
    },
    RoundCompleted {
        round: usize,
        step: f64,
        center: f64,
        best_quality: f64,
    },
    /// All rounds done, actuator parked at `position`.
    Focused { position: f64 },
    /// Session failed; actuator returned to the last known-good `position`.
    Aborted {
        #[serde(serialize_with = "serialize_error")]
        error: RigError,
        position: f64,
    },
    /// Session cancelled; actuator left at its last commanded value.
    Stopped { position: Option<f64> },
}

fn serialize_error<S: serde::Serializer>(error: &RigError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&error.to_string())
}

enum Command {
    Start(f64),
    Stop,
    Shutdown,
}

/// What woke a waiting worker.
enum Wake {
    Command(Result<Command, RecvError>),
    Sample(Result<QualitySample, RecvError>),
    Elapsed,
}

/// Why a wait-point returned early.
enum Interrupt {
    Stop,
    Shutdown,
    Failed(RigError),
}

impl From<RigError> for Interrupt {
    fn from(e: RigError) -> Self {
        Self::Failed(e)
    }
}

pub struct AutoFocusController {
    commands: Sender<Command>,
    events: Receiver<AutoFocusEvent>,
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AutoFocusController {
    pub fn spawn<A>(
        config: AutoFocusConfig,
        actuator: A,
        samples: Receiver<QualitySample>,
        messages: MessageSink,
    ) -> Result<Self, RigError>
    where
        A: FocusActuator + 'static,
    {
        config.validate()?;
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, events) = crossbeam_channel::unbounded();
        let active = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            config,
            actuator,
            commands: command_rx,
            samples,
            events: event_tx,
            active: active.clone(),
            messages,
            last_commanded: None,
        };
        let handle = std::thread::Builder::new()
            .name("focusrig-autofocus".to_string())
            .spawn(move || worker.run())
            .map_err(|e| RigError::device(format!("spawn failed: {e}")))?;

        Ok(Self {
            commands,
            events,
            active,
            worker: Some(handle),
        })
    }

    /// Begin a session around `center`. Rejected with `Busy` while one runs.
    pub fn start(&self, center: f64) -> Result<(), RigError> {
        if !center.is_finite() {
            return Err(RigError::invalid_argument("start centre is not finite"));
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RigError::busy("autofocus session already running"));
        }
        self.commands.send(Command::Start(center)).map_err(|_| {
            self.active.store(false, Ordering::Release);
            RigError::closed("autofocus worker exited")
        })
    }

    /// Cancel the running session at its next wait-point. No-op when idle.
    pub fn stop(&self) -> Result<(), RigError> {
        if !self.is_active() {
            return Ok(());
        }
        self.commands
            .send(Command::Stop)
            .map_err(|_| RigError::closed("autofocus worker exited"))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn events(&self) -> Receiver<AutoFocusEvent> {
        self.events.clone()
    }

    /// Stop any session and join the worker.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("autofocus worker panicked");
            }
        }
    }
}

impl Drop for AutoFocusController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<A> {
    config: AutoFocusConfig,
    actuator: A,
    commands: Receiver<Command>,
    samples: Receiver<QualitySample>,
    events: Sender<AutoFocusEvent>,
    active: Arc<AtomicBool>,
    messages: MessageSink,
    last_commanded: Option<f64>,
}

impl<A: FocusActuator> Worker<A> {
    fn run(mut self) {
        log::debug!("autofocus worker started");
        loop {
            let wake = select! {
                recv(self.commands) -> command => Wake::Command(command),
                recv(self.samples) -> sample => Wake::Sample(sample),
            };
            match wake {
                Wake::Command(Ok(Command::Start(center))) => {
                    // Every exit path clears `active` in `finish`.
                    if self.run_session(center) {
                        break;
                    }
                }
                Wake::Command(Ok(Command::Stop)) | Wake::Sample(Ok(_)) | Wake::Elapsed => {}
                Wake::Command(Ok(Command::Shutdown)) | Wake::Command(Err(_)) => break,
                Wake::Sample(Err(_)) => {
                    log::debug!("quality stream closed");
                    self.samples = never();
                }
            }
        }
        log::debug!("autofocus worker exiting");
    }

    /// Run one session to its end. Returns true when shutdown was requested.
    fn run_session(&mut self, center: f64) -> bool {
        let mut search = match self.config.search(center) {
            Ok(search) => search,
            Err(e) => {
                self.messages.error(SOURCE, format!("cannot start: {e}"));
                self.finish(AutoFocusEvent::Aborted {
                    error: e,
                    position: center,
                });
                return false;
            }
        };
        self.messages
            .info(SOURCE, format!("starting at {:.2}", search.center()));
        self.publish(AutoFocusEvent::Started {
            center: search.center(),
        });

        match self.scan(&mut search) {
            Ok(position) => {
                self.messages.info(SOURCE, format!("focused at {position:.2}"));
                self.finish(AutoFocusEvent::Focused { position });
                false
            }
            Err(Interrupt::Stop) => {
                self.messages.info(SOURCE, "stopped");
                self.finish(AutoFocusEvent::Stopped {
                    position: self.last_commanded,
                });
                false
            }
            Err(Interrupt::Shutdown) => {
                self.finish(AutoFocusEvent::Stopped {
                    position: self.last_commanded,
                });
                true
            }
            Err(Interrupt::Failed(error)) => {
                let fallback = search.center();
                if let Err(e) = self.command(fallback) {
                    log::warn!("could not return actuator to {fallback:.2}: {e}");
                }
                self.messages.error(
                    SOURCE,
                    format!("aborted ({error}), returned to {fallback:.2}"),
                );
                self.finish(AutoFocusEvent::Aborted {
                    error,
                    position: fallback,
                });
                false
            }
        }
    }

    fn scan(&mut self, search: &mut GridSearch) -> Result<f64, Interrupt> {
        while let Some(plan) = search.plan() {
            let mut averages = vec![0.0; plan.positions.len()];
            for &index in &plan.order {
                self.command(plan.positions[index])?;
                let settled_at = self.settle()?;
                let mut sum = 0.0;
                for _ in 0..self.config.samples_per_point {
                    sum += self.next_sample(settled_at)?;
                }
                averages[index] = sum / self.config.samples_per_point as f64;
            }

            let outcome = search.complete_round(&averages)?;
            log::debug!(
                "round {} step {:.3}: best {:.3} at {:.2}",
                outcome.round,
                plan.step,
                outcome.best_quality,
                outcome.center
            );
            self.publish(AutoFocusEvent::RoundCompleted {
                round: outcome.round,
                step: plan.step,
                center: outcome.center,
                best_quality: outcome.best_quality,
            });
        }

        let focused = round2(search.center());
        self.command(focused)?;
        Ok(focused)
    }

    fn command(&mut self, position: f64) -> Result<(), RigError> {
        self.actuator.set_position(position)?;
        self.last_commanded = Some(position);
        Ok(())
    }

    /// Wait out the settle delay, discarding samples. Returns the instant
    /// after which samples count as fresh.
    fn settle(&mut self) -> Result<Instant, Interrupt> {
        let deadline = Instant::now() + self.config.settle;
        loop {
            match self.wait(deadline) {
                Wake::Command(command) => self.on_command(command)?,
                Wake::Sample(Ok(_)) => {}
                Wake::Sample(Err(_)) => {
                    return Err(RigError::closed("quality stream closed").into());
                }
                Wake::Elapsed => return Ok(Instant::now()),
            }
        }
    }

    /// Next sample from a frame captured after `fresh_after`.
    fn next_sample(&mut self, fresh_after: Instant) -> Result<f64, Interrupt> {
        let deadline = Instant::now() + self.config.sample_timeout;
        loop {
            let sample = match self.wait(deadline) {
                Wake::Command(command) => {
                    self.on_command(command)?;
                    continue;
                }
                Wake::Sample(Ok(sample)) => sample,
                Wake::Sample(Err(_)) => {
                    return Err(RigError::closed("quality stream closed").into());
                }
                Wake::Elapsed => {
                    return Err(RigError::timeout(format!(
                        "no quality sample within {:?}",
                        self.config.sample_timeout
                    ))
                    .into());
                }
            };

            if sample.captured_at < fresh_after {
                log::trace!("stale sample from frame {}", sample.frame_sequence);
                continue;
            }
            let value = sample.score.value;
            if !(value.is_finite() && value > 0.0) {
                return Err(RigError::unreliable_signal(format!(
                    "quality {value} from frame {}",
                    sample.frame_sequence
                ))
                .into());
            }
            return Ok(value);
        }
    }

    /// Block until a command, a sample or `deadline`.
    fn wait(&self, deadline: Instant) -> Wake {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Wake::Elapsed;
        }
        select! {
            recv(self.commands) -> command => Wake::Command(command),
            recv(self.samples) -> sample => Wake::Sample(sample),
            default(remaining) => Wake::Elapsed,
        }
    }

    fn on_command(
        &self,
        command: Result<Command, RecvError>,
    ) -> Result<(), Interrupt> {
        match command {
            Ok(Command::Stop) => Err(Interrupt::Stop),
            Ok(Command::Shutdown) | Err(_) => Err(Interrupt::Shutdown),
            Ok(Command::Start(_)) => {
                self.messages.warn(SOURCE, "busy, start ignored");
                Ok(())
            }
        }
    }

    fn publish(&self, event: AutoFocusEvent) {
        let _ = self.events.send(event);
    }

    /// Publish the last event of a session; `start()` is accepted again
    /// as soon as it is observable.
    fn finish(&self, event: AutoFocusEvent) {
        self.active.store(false, Ordering::Release);
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let config = AutoFocusConfig::from_settings(&AutoFocusSettings::default()).unwrap();
        assert_eq!(config, AutoFocusConfig::default());
        assert_eq!(config.settle, Duration::from_millis(200));
    }

    #[test]
    fn test_config_rejects_zero_samples() {
        let settings = AutoFocusSettings {
            samples_per_point: 0,
            ..AutoFocusSettings::default()
        };
        assert!(matches!(
            AutoFocusConfig::from_settings(&settings),
            Err(RigError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&AutoFocusEvent::Focused { position: 1.5 }).unwrap();
        assert_eq!(json, r#"{"event":"focused","position":1.5}"#);
        let json = serde_json::to_string(&AutoFocusEvent::Aborted {
            error: RigError::timeout("late"),
            position: 0.0,
        })
        .unwrap();
        assert!(json.contains("timeout: late"));
    }
}
