//! Configuration management for the rig
//!
//! Provides loading, saving and validation of every tunable the core
//! recognises: frame conditioning, segmentation, scoring, autofocus, heater
//! control and the system temperature monitor.

use crate::autofocus::AutoFocusConfig;
use crate::enhance::ImageEnhancer;
use crate::errors::RigError;
use crate::geometry::Region;
use crate::segment::ImageSegmenter;
use crate::thermal::{ThermalMonitor, TemperatureController};
use crate::types::ScoringMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SIZE_FRACTION: f64 = 0.005;
pub const DEFAULT_EDGE_TRIM: usize = 50;

/// Prefix for environment overrides, e.g. `FOCUSRIG__AUTOFOCUS__ROUNDS=3`.
pub const ENV_PREFIX: &str = "FOCUSRIG";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub enhancer: EnhancerSettings,
    pub segmenter: SegmenterSettings,
    pub processor: ProcessorSettings,
    pub autofocus: AutoFocusSettings,
    pub heater: HeaterSettings,
    pub monitor: MonitorSettings,
}

/// Frame conditioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerSettings {
    /// Crop window `[x1, y1, x2, y2]`; full frame when absent
    pub crop: Option<[u32; 4]>,
    /// Rotation in degrees, -5..=5
    pub rotation_deg: f64,
    /// CLAHE clip limit, <= 0 disables, up to 10
    pub clahe_clip_limit: f64,
    /// Gamma, 0..=10, applied when in (1, 10)
    pub gamma: f64,
    /// Temporal blend factor, 0..1
    pub blend: f64,
}

/// Grid segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    /// Smoothing window as a fraction of the projection length
    pub size_fraction: f64,
    /// Slope samples discarded at each end before the sharpness estimate
    pub edge_trim: usize,
}

/// Frame orchestration and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// 0 = plain ROI, 1 = grid aggregate, 2 = ROI intersect grid
    pub scoring_mode: u8,
    /// Explicit ROI `[x1, y1, x2, y2]`; centred default when absent
    pub roi: Option<[u32; 4]>,
    /// Unread processed frames kept per display subscriber
    pub display_capacity: usize,
    /// Upper bound on a blocking quality delivery in milliseconds
    pub quality_delivery_timeout_ms: u64,
}

/// Grid-search autofocus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFocusSettings {
    /// Grid points on each side of the centre (N)
    pub grid_half_width: u32,
    /// Grid spacing of the first round (dP)
    pub initial_step: f64,
    /// Quality samples averaged per grid point (k)
    pub samples_per_point: u32,
    /// Number of rounds (R)
    pub rounds: u32,
    /// Settle delay after each actuator command in milliseconds
    pub settle_ms: u64,
    /// Maximum wait for one quality sample in milliseconds
    pub sample_timeout_ms: u64,
    /// Lowest actuator position
    pub position_min: f64,
    /// Highest actuator position
    pub position_max: f64,
}

/// Heater PID loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaterSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Control period in milliseconds
    pub sample_interval_ms: u64,
    /// Target temperature in degrees Celsius; control disabled when absent
    pub setpoint: Option<f64>,
}

/// System temperature monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_ms: u64,
    pub alarm_celsius: f64,
    pub failure_celsius: f64,
}

impl Default for EnhancerSettings {
    fn default() -> Self {
        Self {
            crop: None,
            rotation_deg: 0.0,
            clahe_clip_limit: 0.0,
            gamma: 1.0,
            blend: 0.0,
        }
    }
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            size_fraction: DEFAULT_SIZE_FRACTION,
            edge_trim: DEFAULT_EDGE_TRIM,
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            scoring_mode: 0,
            roi: None,
            display_capacity: 2,
            quality_delivery_timeout_ms: 2000,
        }
    }
}

impl Default for AutoFocusSettings {
    fn default() -> Self {
        Self {
            grid_half_width: 3,
            initial_step: 2.0,
            samples_per_point: 3,
            rounds: 5,
            settle_ms: 200,
            sample_timeout_ms: 2000,
            position_min: -100.0,
            position_max: 100.0,
        }
    }
}

impl Default for HeaterSettings {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.1,
            kd: 0.0,
            sample_interval_ms: 2000,
            setpoint: None,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            alarm_celsius: 55.0,
            failure_celsius: 75.0,
        }
    }
}

impl RigConfig {
    /// Load configuration from a TOML file, defaults when the file is missing
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| RigError::config(format!("Failed to read config file: {}", e)))?;

        let config: RigConfig = toml::from_str(&contents)
            .map_err(|e| RigError::config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Defaults, then an optional TOML file, then `FOCUSRIG__SECTION__KEY` variables
    pub fn load_layered<P: AsRef<Path>>(path: Option<P>) -> Result<Self, RigError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| RigError::config(format!("Failed to seed defaults: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_ref()).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder
            .build()
            .map_err(|e| RigError::config(format!("Failed to merge configuration: {}", e)))?;
        let config: RigConfig = merged
            .try_deserialize()
            .map_err(|e| RigError::config(format!("Failed to deserialize configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RigError::config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| RigError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| RigError::config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("focusrig.toml")
    }

    /// Apply every range check the component setters apply
    pub fn validate(&self) -> Result<(), RigError> {
        ImageEnhancer::from_settings(&self.enhancer)?;
        ImageSegmenter::from_settings(&self.segmenter)?;

        ScoringMode::try_from(self.processor.scoring_mode)?;
        if let Some(roi) = self.processor.roi {
            Region::from_corners(roi)?;
        }
        if self.processor.display_capacity == 0 {
            return Err(RigError::invalid_argument(
                "display capacity must be at least 1",
            ));
        }

        AutoFocusConfig::from_settings(&self.autofocus)?;
        TemperatureController::from_settings(&self.heater)?;
        ThermalMonitor::from_settings(&self.monitor)?;
        Ok(())
    }
}
