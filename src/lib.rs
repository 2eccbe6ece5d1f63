//! focusrig: control core of an automated imaging rig
//!
//! A camera feeds frames into a single-flight conditioning and scoring
//! pipeline that produces a scalar focus-quality signal. Two independent
//! closed loops consume sensor signals: a grid-search autofocus driving a
//! voice coil, and a PID loop driving a heater.
//!
//! # Features
//! - Frame conditioning: grayscale, small-angle rotation, crop, CLAHE, gamma
//! - Grid segmentation of counting-chamber images from intensity projections
//! - Three focus-quality strategies (plain ROI, grid aggregate, ROI within grid)
//! - Multi-round, noise-averaging autofocus with cancellation and timeouts
//! - Heater PID with output clamping, plus a board temperature watchdog
//!
//! # Usage
//! ```rust,ignore
//! use focusrig::{AutoFocusController, FrameOrchestrator, MessageSink, RigConfig};
//!
//! let config = RigConfig::load_layered(Some("focusrig.toml"))?;
//! let orchestrator = FrameOrchestrator::from_config(&config, MessageSink::log_only())?;
//! let autofocus = AutoFocusController::spawn(
//!     AutoFocusConfig::from_settings(&config.autofocus)?,
//!     voice_coil,
//!     orchestrator.subscribe_quality()?,
//!     MessageSink::log_only(),
//! )?;
//! orchestrator.attach(&mut camera)?;
//! autofocus.start(0.0)?;
//! ```
pub mod autofocus;
pub mod config;
pub mod enhance;
pub mod errors;
pub mod geometry;
pub mod hardware;
pub mod invariant_ppt;
pub mod messages;
pub mod processor;
pub mod segment;
pub mod thermal;
pub mod timing;
pub mod types;

// Testing utilities - synthetic frames and simulated devices for offline runs
pub mod testing;

// Re-exports for convenience
pub use autofocus::{AutoFocusConfig, AutoFocusController, AutoFocusEvent};
pub use config::RigConfig;
pub use enhance::ImageEnhancer;
pub use errors::RigError;
pub use geometry::Region;
pub use hardware::{FocusActuator, FrameSource, HeaterActuator, TemperatureSensor};
pub use messages::{MessageSink, Severity, StatusMessage};
pub use processor::{FrameOrchestrator, OrchestratorStats, Submission};
pub use segment::{ImageSegmenter, Segmentation};
pub use thermal::{HeaterRegulator, TemperatureController, ThermalMonitor};
pub use types::{Frame, ProcessedFrame, QualityScore, QualitySample, ScoringMode};

/// Initialize logging for the rig
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "focusrig=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_package_constants() {
        assert_eq!(NAME, "focusrig");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }
}
