//! Discrete PID law for the chamber heater.

use crate::assert_invariant;
use crate::config::HeaterSettings;
use crate::errors::RigError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

pub const SETPOINT_RANGE: RangeInclusive<f64> = 0.0..=60.0;
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
pub const MAX_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
pub const DUTY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Result<Self, RigError> {
        for (name, gain) in [("kp", kp), ("ki", ki), ("kd", kd)] {
            if !(gain.is_finite() && gain >= 0.0) {
                return Err(RigError::invalid_argument(format!(
                    "gain {name}={gain} must be finite and non-negative"
                )));
            }
        }
        Ok(Self { kp, ki, kd })
    }
}

/// PID state: gains, setpoint and the error history of the current setpoint.
#[derive(Debug, Clone)]
pub struct TemperatureController {
    gains: PidGains,
    sample_interval: Duration,
    setpoint: Option<f64>,
    previous_error: Option<f64>,
    integral: f64,
}

impl TemperatureController {
    pub fn new(gains: PidGains, sample_interval: Duration) -> Result<Self, RigError> {
        if !(MIN_SAMPLE_INTERVAL..=MAX_SAMPLE_INTERVAL).contains(&sample_interval) {
            return Err(RigError::invalid_argument(format!(
                "sample interval {sample_interval:?} outside [{MIN_SAMPLE_INTERVAL:?}, {MAX_SAMPLE_INTERVAL:?}]"
            )));
        }
        Ok(Self {
            gains,
            sample_interval,
            setpoint: None,
            previous_error: None,
            integral: 0.0,
        })
    }

    pub fn from_settings(settings: &HeaterSettings) -> Result<Self, RigError> {
        let gains = PidGains::new(settings.kp, settings.ki, settings.kd)?;
        let mut controller =
            Self::new(gains, Duration::from_millis(settings.sample_interval_ms))?;
        controller.set_setpoint(settings.setpoint)?;
        Ok(controller)
    }

    /// New target in degrees Celsius; `None` disables control. Any accepted
    /// change clears the integral and the previous error.
    pub fn set_setpoint(&mut self, setpoint: Option<f64>) -> Result<(), RigError> {
        if let Some(value) = setpoint {
            if !SETPOINT_RANGE.contains(&value) {
                return Err(RigError::invalid_argument(format!(
                    "setpoint {value} outside [{}, {}] degrees",
                    SETPOINT_RANGE.start(),
                    SETPOINT_RANGE.end()
                )));
            }
        }
        self.setpoint = setpoint;
        self.previous_error = None;
        self.integral = 0.0;
        Ok(())
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// One control step. Returns the heater duty in percent, or `None` when
    /// control is disabled or the measurement is not a number.
    pub fn tick(&mut self, measured: f64) -> Option<f64> {
        let setpoint = self.setpoint?;
        if !measured.is_finite() {
            log::debug!("skipping tick on non-finite measurement {measured}");
            return None;
        }
        let dt = self.sample_interval.as_secs_f64();
        let error = setpoint - measured;
        let derivative = self
            .previous_error
            .map_or(0.0, |previous| (error - previous) / dt);
        self.integral += error * dt;
        self.previous_error = Some(error);

        let raw = self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        let duty = raw.clamp(*DUTY_RANGE.start(), *DUTY_RANGE.end());
        assert_invariant!(
            DUTY_RANGE.contains(&duty),
            "heater duty stays within 0..=100 percent",
            "TemperatureController::tick"
        );
        log::trace!("pid error {error:.2} integral {:.2} duty {duty:.1}", self.integral);
        Some(duty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(kp: f64, ki: f64, kd: f64) -> TemperatureController {
        TemperatureController::new(PidGains::new(kp, ki, kd).unwrap(), Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = controller(1.0, 0.0, 0.0);
        pid.set_setpoint(Some(40.0)).unwrap();
        let outputs: Vec<f64> = [20.0, 30.0, 35.0, 39.0, 40.0]
            .iter()
            .filter_map(|t| pid.tick(*t))
            .collect();
        assert_eq!(outputs, vec![20.0, 10.0, 5.0, 1.0, 0.0]);
    }

    #[test]
    fn test_disabled_without_setpoint() {
        let mut pid = controller(5.0, 1.0, 1.0);
        assert_eq!(pid.tick(10.0), None);
        pid.set_setpoint(Some(30.0)).unwrap();
        assert!(pid.tick(10.0).is_some());
        pid.set_setpoint(None).unwrap();
        assert_eq!(pid.tick(10.0), None);
    }

    #[test]
    fn test_no_derivative_on_first_tick() {
        let mut pid = controller(0.0, 0.0, 10.0);
        pid.set_setpoint(Some(30.0)).unwrap();
        assert_eq!(pid.tick(20.0), Some(0.0));
        // error 10 -> 12, derivative 2 per second
        assert_eq!(pid.tick(18.0), Some(20.0));
    }

    #[test]
    fn test_setpoint_change_resets_state() {
        let mut pid = controller(0.0, 1.0, 0.0);
        pid.set_setpoint(Some(30.0)).unwrap();
        pid.tick(20.0);
        pid.tick(20.0);
        assert_eq!(pid.integral(), 20.0);
        pid.set_setpoint(Some(25.0)).unwrap();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.tick(20.0), Some(5.0));
    }

    #[test]
    fn test_from_settings() {
        let settings = HeaterSettings {
            kp: 2.0,
            ki: 0.5,
            kd: 0.0,
            sample_interval_ms: 500,
            setpoint: Some(37.0),
        };
        let pid = TemperatureController::from_settings(&settings).unwrap();
        assert_eq!(pid.setpoint(), Some(37.0));
        assert_eq!(pid.gains(), PidGains::new(2.0, 0.5, 0.0).unwrap());
        assert_eq!(pid.sample_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_output_clamped() {
        let mut pid = controller(10.0, 0.0, 0.0);
        pid.set_setpoint(Some(50.0)).unwrap();
        assert_eq!(pid.tick(0.0), Some(100.0));
        assert_eq!(pid.tick(59.0), Some(0.0));
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(PidGains::new(-1.0, 0.0, 0.0).is_err());
        assert!(PidGains::new(1.0, f64::NAN, 0.0).is_err());
        let gains = PidGains::new(1.0, 0.0, 0.0).unwrap();
        assert!(TemperatureController::new(gains, Duration::from_millis(1)).is_err());
        assert!(TemperatureController::new(gains, Duration::from_secs(61)).is_err());
        let mut pid = controller(1.0, 0.0, 0.0);
        assert!(matches!(
            pid.set_setpoint(Some(75.0)),
            Err(RigError::InvalidArgument(_))
        ));
        assert!(pid.set_setpoint(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_nan_measurement_skipped() {
        let mut pid = controller(1.0, 1.0, 0.0);
        pid.set_setpoint(Some(30.0)).unwrap();
        assert_eq!(pid.tick(f64::NAN), None);
        assert_eq!(pid.integral(), 0.0);
    }
}
