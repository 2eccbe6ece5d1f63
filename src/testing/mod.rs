//! Testing utilities for the rig
//!
//! Synthetic chamber frames and simulated devices, so every loop can run
//! offline without a camera, voice coil or heater attached.

pub mod simulated;
pub mod synthetic_data;

pub use simulated::{
    RecordingHeater, ScriptedSensor, SimulatedFocusCamera, SimulatedThermalPlant,
    SimulatedVoiceCoil,
};
pub use synthetic_data::{blurred_checkerboard, checkerboard, rgb_checkerboard, uniform};
