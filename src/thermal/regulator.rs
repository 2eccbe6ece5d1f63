//! Fixed-interval heater loop on the tokio runtime.

use super::pid::TemperatureController;
use super::read_off_runtime;
use crate::errors::RigError;
use crate::hardware::{HeaterActuator, TemperatureSensor};
use crate::messages::MessageSink;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SOURCE: &str = "heater";

/// Last measurement and the duty it produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeaterReading {
    pub temperature: f64,
    /// `None` when control was disabled for this tick.
    pub duty: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

enum RegulatorCommand {
    SetSetpoint(Option<f64>, oneshot::Sender<Result<(), RigError>>),
    Stop,
}

/// Handle to the running heater loop. The loop owns sensor, heater and
/// controller state; the handle only sends commands and reads results.
pub struct HeaterRegulator {
    commands: mpsc::Sender<RegulatorCommand>,
    readings: watch::Receiver<Option<HeaterReading>>,
    task: Option<JoinHandle<()>>,
}

impl HeaterRegulator {
    /// Start the loop. Must be called from within a tokio runtime.
    pub fn spawn<S, H>(
        controller: TemperatureController,
        sensor: S,
        heater: H,
        messages: MessageSink,
    ) -> Self
    where
        S: TemperatureSensor + 'static,
        H: HeaterActuator + 'static,
    {
        let (commands, command_rx) = mpsc::channel(8);
        let (reading_tx, readings) = watch::channel(None);
        let task = tokio::spawn(regulate(
            controller, sensor, heater, command_rx, reading_tx, messages,
        ));
        Self {
            commands,
            readings,
            task: Some(task),
        }
    }

    /// Change the target; validated by the loop before it takes effect.
    pub async fn set_setpoint(&self, setpoint: Option<f64>) -> Result<(), RigError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(RegulatorCommand::SetSetpoint(setpoint, reply))
            .await
            .map_err(|_| RigError::closed("heater loop exited"))?;
        response
            .await
            .map_err(|_| RigError::closed("heater loop exited"))?
    }

    pub fn readings(&self) -> watch::Receiver<Option<HeaterReading>> {
        self.readings.clone()
    }

    pub fn latest(&self) -> Option<HeaterReading> {
        *self.readings.borrow()
    }

    /// Stop the loop and wait until the heater has been switched off.
    pub async fn stop(mut self) -> Result<(), RigError> {
        let _ = self.commands.send(RegulatorCommand::Stop).await;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| RigError::device(format!("heater loop failed: {e}")))?;
        }
        Ok(())
    }
}

async fn regulate<S, H>(
    mut controller: TemperatureController,
    sensor: S,
    mut heater: H,
    mut commands: mpsc::Receiver<RegulatorCommand>,
    readings: watch::Sender<Option<HeaterReading>>,
    messages: MessageSink,
) where
    S: TemperatureSensor + 'static,
    H: HeaterActuator,
{
    let sensor = Arc::new(Mutex::new(sensor));
    let mut ticker = tokio::time::interval(controller.sample_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    messages.info(
        SOURCE,
        format!("regulating every {:?}", controller.sample_interval()),
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let temperature = match read_off_runtime(&sensor).await {
                    Ok(t) => t,
                    Err(e) => {
                        messages.warn(SOURCE, format!("tick skipped, sensor read failed: {e}"));
                        continue;
                    }
                };
                let duty = controller.tick(temperature);
                if let Some(duty) = duty {
                    if let Err(e) = heater.set_duty(duty) {
                        messages.error(SOURCE, format!("setting duty {duty:.1} failed: {e}"));
                    }
                }
                readings.send_replace(Some(HeaterReading {
                    temperature,
                    duty,
                    timestamp: Utc::now(),
                }));
            }
            command = commands.recv() => match command {
                Some(RegulatorCommand::SetSetpoint(setpoint, reply)) => {
                    let result = controller.set_setpoint(setpoint);
                    match (&result, setpoint) {
                        (Ok(()), Some(value)) => messages.info(SOURCE, format!("setpoint {value:.1} C")),
                        (Ok(()), None) => {
                            messages.info(SOURCE, "control disabled");
                            if let Err(e) = heater.set_duty(0.0) {
                                messages.error(SOURCE, format!("switching heater off failed: {e}"));
                            }
                        }
                        (Err(e), _) => messages.warn(SOURCE, format!("setpoint rejected: {e}")),
                    }
                    let _ = reply.send(result);
                }
                Some(RegulatorCommand::Stop) | None => break,
            },
        }
    }

    messages.info(SOURCE, "stopping, heater off");
    if let Err(e) = heater.set_duty(0.0) {
        messages.error(SOURCE, format!("switching heater off failed: {e}"));
    }
}
