//! Collaborator interfaces for the devices around the core.
//!
//! Each controller receives the device it drives as an owned handle at
//! construction; nothing in the crate reaches devices through globals.

use crate::errors::RigError;
use crate::types::Frame;

/// Callback invoked once per captured frame.
pub type FrameCallback = Box<dyn FnMut(Frame) + Send + 'static>;

/// Anything that pushes frames into the pipeline.
pub trait FrameSource {
    /// Start delivering frames to `callback`.
    fn on_frame(&mut self, callback: FrameCallback) -> Result<(), RigError>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self);
}

/// Focus element driven by a signed percentage of full drive.
pub trait FocusActuator: Send {
    fn set_position(&mut self, value: f64) -> Result<(), RigError>;
}

/// Temperature probe in degrees Celsius.
pub trait TemperatureSensor: Send {
    fn read(&mut self) -> Result<f64, RigError>;
}

/// Resistive heater taking a duty cycle in percent.
pub trait HeaterActuator: Send {
    fn set_duty(&mut self, percent: f64) -> Result<(), RigError>;
}

impl<T: FocusActuator + ?Sized> FocusActuator for Box<T> {
    fn set_position(&mut self, value: f64) -> Result<(), RigError> {
        (**self).set_position(value)
    }
}

impl<T: TemperatureSensor + ?Sized> TemperatureSensor for Box<T> {
    fn read(&mut self) -> Result<f64, RigError> {
        (**self).read()
    }
}

impl<T: HeaterActuator + ?Sized> HeaterActuator for Box<T> {
    fn set_duty(&mut self, percent: f64) -> Result<(), RigError> {
        (**self).set_duty(percent)
    }
}
