//! Heater control and board temperature supervision.
//!
//! [`TemperatureController`] is the pure PID law; [`HeaterRegulator`] runs it
//! on a fixed interval against a sensor and a heater. [`ThermalMonitor`]
//! watches the board temperature independently of both.

use crate::errors::RigError;
use crate::hardware::TemperatureSensor;
use std::sync::{Arc, Mutex};

pub mod monitor;
pub mod pid;
pub mod regulator;

pub use monitor::{SysfsThermalZone, ThermalEvent, ThermalMonitor};
pub use pid::{PidGains, TemperatureController};
pub use regulator::{HeaterReading, HeaterRegulator};

/// Read `sensor` on the blocking pool. Sensor reads may hit the filesystem
/// or a bus and must not stall the runtime's worker threads.
pub(crate) async fn read_off_runtime<S>(sensor: &Arc<Mutex<S>>) -> Result<f64, RigError>
where
    S: TemperatureSensor + 'static,
{
    let sensor = Arc::clone(sensor);
    tokio::task::spawn_blocking(move || {
        let mut guard = sensor.lock()?;
        guard.read()
    })
    .await
    .map_err(|e| RigError::device(format!("sensor read task failed: {e}")))?
}
