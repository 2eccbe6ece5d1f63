//! Board temperature watchdog.
//!
//! Raises an alarm above `alarm_celsius`, clears it again only below 95 % of
//! that threshold, and reports a failure on every reading above
//! `failure_celsius`.

use super::read_off_runtime;
use crate::config::MonitorSettings;
use crate::errors::RigError;
use crate::hardware::TemperatureSensor;
use crate::messages::MessageSink;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

const SOURCE: &str = "systemp";
pub const ALARM_CLEAR_RATIO: f64 = 0.95;
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThermalEvent {
    AlarmOn,
    AlarmOff,
    Failure,
}

#[derive(Debug, Clone)]
pub struct ThermalMonitor {
    interval: Duration,
    alarm_celsius: f64,
    failure_celsius: f64,
    alarmed: bool,
}

impl ThermalMonitor {
    pub fn new(interval: Duration, alarm_celsius: f64, failure_celsius: f64) -> Result<Self, RigError> {
        if interval.is_zero() {
            return Err(RigError::invalid_argument("monitor interval must be positive"));
        }
        if !(alarm_celsius.is_finite() && failure_celsius.is_finite() && alarm_celsius < failure_celsius)
        {
            return Err(RigError::invalid_argument(format!(
                "alarm threshold {alarm_celsius} must be below failure threshold {failure_celsius}"
            )));
        }
        Ok(Self {
            interval,
            alarm_celsius,
            failure_celsius,
            alarmed: false,
        })
    }

    pub fn from_settings(settings: &MonitorSettings) -> Result<Self, RigError> {
        Self::new(
            Duration::from_millis(settings.interval_ms),
            settings.alarm_celsius,
            settings.failure_celsius,
        )
    }

    pub fn is_alarmed(&self) -> bool {
        self.alarmed
    }

    pub fn reset_alarm(&mut self) {
        self.alarmed = false;
    }

    /// Classify one reading.
    pub fn assess(&mut self, celsius: f64) -> Option<ThermalEvent> {
        if celsius > self.failure_celsius {
            Some(ThermalEvent::Failure)
        } else if celsius > self.alarm_celsius && !self.alarmed {
            self.alarmed = true;
            Some(ThermalEvent::AlarmOn)
        } else if celsius < ALARM_CLEAR_RATIO * self.alarm_celsius && self.alarmed {
            self.alarmed = false;
            Some(ThermalEvent::AlarmOff)
        } else {
            None
        }
    }

    /// Read the sensor once and report the reading and any transition.
    pub fn check<S: TemperatureSensor>(
        &mut self,
        sensor: &mut S,
        messages: &MessageSink,
    ) -> Result<Option<ThermalEvent>, RigError> {
        let celsius = sensor.read()?;
        Ok(self.report(celsius, messages))
    }

    /// Report one reading and any transition it causes.
    fn report(&mut self, celsius: f64, messages: &MessageSink) -> Option<ThermalEvent> {
        let celsius = (celsius * 10.0).round() / 10.0;
        messages.info(SOURCE, format!("T_CPU={celsius:.1} C"));
        let event = self.assess(celsius);
        match event {
            Some(ThermalEvent::Failure) => messages.error(SOURCE, "temperature gets too high"),
            Some(ThermalEvent::AlarmOn) => messages.warn(SOURCE, "temperature alarm on"),
            Some(ThermalEvent::AlarmOff) => messages.info(SOURCE, "temperature alarm off"),
            None => {}
        }
        event
    }

    /// Check every interval until `shutdown` turns true or its sender is
    /// dropped. The sensor is read on the blocking pool.
    pub async fn run<S: TemperatureSensor + 'static>(
        mut self,
        sensor: S,
        messages: MessageSink,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let sensor = Arc::new(Mutex::new(sensor));
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match read_off_runtime(&sensor).await {
                        Ok(celsius) => {
                            self.report(celsius, &messages);
                        }
                        Err(e) => messages.error(SOURCE, format!("reading failed: {e}")),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("thermal monitor stopped");
    }
}

/// Linux thermal zone exposing millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct SysfsThermalZone {
    path: PathBuf,
}

impl SysfsThermalZone {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for SysfsThermalZone {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ZONE)
    }
}

impl TemperatureSensor for SysfsThermalZone {
    fn read(&mut self) -> Result<f64, RigError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| RigError::device(format!("reading {:?}: {e}", self.path)))?;
        let millidegrees: f64 = raw
            .trim()
            .parse()
            .map_err(|e| RigError::device(format!("parsing {:?}: {e}", raw.trim())))?;
        Ok(millidegrees / 1000.0)
    }
}
