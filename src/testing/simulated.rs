//! Simulated devices for offline runs of the control loops
//!
//! The voice coil and the camera share the coil position: frames get blurrier
//! the further the coil sits from the in-focus position. The thermal plant is
//! a first-order model heated by the duty cycle and cooled towards ambient.

use crate::errors::RigError;
use crate::hardware::{FocusActuator, FrameCallback, FrameSource, HeaterActuator, TemperatureSensor};
use crate::testing::synthetic_data::checkerboard;
use crate::types::Frame;
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct CoilState {
    position: f64,
    commands: Vec<f64>,
}

/// Voice coil that remembers every command. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedVoiceCoil {
    state: Arc<Mutex<CoilState>>,
}

impl SimulatedVoiceCoil {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> f64 {
        self.state.lock().map(|s| s.position).unwrap_or(f64::NAN)
    }

    pub fn commands(&self) -> Vec<f64> {
        self.state
            .lock()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }
}

impl FocusActuator for SimulatedVoiceCoil {
    fn set_position(&mut self, value: f64) -> Result<(), RigError> {
        let mut state = self.state.lock()?;
        state.position = value;
        state.commands.push(value);
        Ok(())
    }
}

/// Camera looking at a grid through optics focused at `focus_position`.
pub struct SimulatedFocusCamera {
    coil: SimulatedVoiceCoil,
    focus_position: f64,
    blur_per_unit: f32,
    interval: Duration,
    target: GrayImage,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedFocusCamera {
    pub fn new(coil: SimulatedVoiceCoil, focus_position: f64, width: u32, height: u32) -> Self {
        Self {
            coil,
            focus_position,
            blur_per_unit: 0.6,
            interval: Duration::from_millis(20),
            target: checkerboard(width, height, 5, width.min(height) / 20),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Frame seen with the coil at `position`.
    pub fn render(&self, position: f64) -> GrayImage {
        render_defocused(&self.target, self.blur_per_unit, position - self.focus_position)
    }
}

fn render_defocused(target: &GrayImage, blur_per_unit: f32, offset: f64) -> GrayImage {
    let sigma = 0.3 + blur_per_unit * offset.abs() as f32;
    gaussian_blur_f32(target, sigma)
}

impl FrameSource for SimulatedFocusCamera {
    fn on_frame(&mut self, mut callback: FrameCallback) -> Result<(), RigError> {
        if self.thread.is_some() {
            return Err(RigError::busy("simulated camera already streaming"));
        }
        self.stop_flag.store(false, Ordering::Relaxed);

        let stop_flag = self.stop_flag.clone();
        let coil = self.coil.clone();
        let target = self.target.clone();
        let focus = self.focus_position;
        let blur = self.blur_per_unit;
        let interval = self.interval;
        let handle = std::thread::Builder::new()
            .name("focusrig-sim-camera".to_string())
            .spawn(move || {
                let mut sequence = 0u64;
                while !stop_flag.load(Ordering::Relaxed) {
                    // Exposure starts before the coil position is sampled.
                    let captured_at = Instant::now();
                    let image = render_defocused(&target, blur, coil.position() - focus);
                    let mut frame = Frame::from_gray(sequence, image);
                    frame.captured_at = captured_at;
                    callback(frame);
                    sequence += 1;
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| RigError::device(format!("spawn failed: {e}")))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimulatedFocusCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug)]
struct PlantState {
    temperature: f64,
    ambient: f64,
    duty: f64,
    heating_per_tick: f64,
    loss_per_tick: f64,
}

/// First-order thermal model. Each sensor read advances the plant one tick.
#[derive(Debug, Clone)]
pub struct SimulatedThermalPlant {
    state: Arc<Mutex<PlantState>>,
}

impl SimulatedThermalPlant {
    /// `heating_per_tick` degrees at 100 % duty, `loss_per_tick` fraction of
    /// the excess over ambient lost each tick.
    pub fn new(ambient: f64, heating_per_tick: f64, loss_per_tick: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlantState {
                temperature: ambient,
                ambient,
                duty: 0.0,
                heating_per_tick,
                loss_per_tick,
            })),
        }
    }

    pub fn sensor(&self) -> PlantSensor {
        PlantSensor {
            plant: self.clone(),
        }
    }

    pub fn heater(&self) -> PlantHeater {
        PlantHeater {
            plant: self.clone(),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.state.lock().map(|s| s.temperature).unwrap_or(f64::NAN)
    }

    pub fn duty(&self) -> f64 {
        self.state.lock().map(|s| s.duty).unwrap_or(f64::NAN)
    }
}

pub struct PlantSensor {
    plant: SimulatedThermalPlant,
}

impl TemperatureSensor for PlantSensor {
    fn read(&mut self) -> Result<f64, RigError> {
        let mut s = self.plant.state.lock()?;
        let gain = s.heating_per_tick * s.duty / 100.0;
        let loss = s.loss_per_tick * (s.temperature - s.ambient);
        s.temperature += gain - loss;
        Ok(s.temperature)
    }
}

pub struct PlantHeater {
    plant: SimulatedThermalPlant,
}

impl HeaterActuator for PlantHeater {
    fn set_duty(&mut self, percent: f64) -> Result<(), RigError> {
        self.plant.state.lock()?.duty = percent;
        Ok(())
    }
}

/// Sensor replaying a fixed list of readings, then failing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSensor {
    readings: VecDeque<f64>,
}

impl ScriptedSensor {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
        }
    }
}

impl TemperatureSensor for ScriptedSensor {
    fn read(&mut self) -> Result<f64, RigError> {
        self.readings
            .pop_front()
            .ok_or_else(|| RigError::device("scripted sensor exhausted"))
    }
}

/// Heater that records every duty it is given. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingHeater {
    duties: Arc<Mutex<Vec<f64>>>,
}

impl RecordingHeater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duties(&self) -> Vec<f64> {
        self.duties.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl HeaterActuator for RecordingHeater {
    fn set_duty(&mut self, percent: f64) -> Result<(), RigError> {
        self.duties.lock()?.push(percent);
        Ok(())
    }
}
