//! Device adapters.
//!
//! The session reads temperatures through [`TemperatureSource`] and drives the
//! heater through `rf_controls::ControlSink`. [`SimulatedRoaster`] implements
//! both on top of a first-order thermal model so a session can run without
//! hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rf_controls::{ControlError, ControlResult, ControlSink};
use rf_core::Reading;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Produces one temperature reading per tick.
pub trait TemperatureSource: Send {
    /// Read the probe at `elapsed_s` seconds into the session.
    fn read(&mut self, elapsed_s: f64) -> Reading;
}

impl<F> TemperatureSource for F
where
    F: FnMut(f64) -> Reading + Send,
{
    fn read(&mut self, elapsed_s: f64) -> Reading {
        self(elapsed_s)
    }
}

/// Parameters of the simulated drum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoasterModelConfig {
    pub initial_temp: f64,
    pub ambient_temp: f64,
    /// Heat capacity of drum and beans (J/degree).
    pub thermal_capacity: f64,
    /// Heater power at 100 % duty (W).
    pub heater_power: f64,
    /// Loss to ambient (W/degree).
    pub heat_loss_coeff: f64,
    /// Integration step (s).
    pub step_s: f64,
    /// Every n-th reading comes back invalid, to exercise dropouts.
    pub dropout_every: Option<u32>,
}

impl Default for RoasterModelConfig {
    fn default() -> Self {
        Self {
            initial_temp: 20.0,
            ambient_temp: 20.0,
            thermal_capacity: 2000.0,
            heater_power: 1500.0,
            heat_loss_coeff: 5.0,
            step_s: 0.1,
            dropout_every: None,
        }
    }
}

impl RoasterModelConfig {
    pub fn validate(&self) -> AppResult<()> {
        let positive = [
            ("thermal_capacity", self.thermal_capacity),
            ("heater_power", self.heater_power),
            ("heat_loss_coeff", self.heat_loss_coeff),
            ("step_s", self.step_s),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(AppError::Validation(format!(
                    "simulator.{} must be positive",
                    name
                )));
            }
        }
        if !(self.initial_temp.is_finite() && self.ambient_temp.is_finite()) {
            return Err(AppError::Validation(
                "simulator temperatures must be finite".to_string(),
            ));
        }
        if self.dropout_every == Some(0) {
            return Err(AppError::Validation(
                "simulator.dropout_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Temperature the drum settles at for a constant duty.
    pub fn steady_state(&self, duty: f64) -> f64 {
        self.ambient_temp + self.heater_power * (duty / 100.0) / self.heat_loss_coeff
    }
}

#[derive(Debug)]
struct RoasterModel {
    config: RoasterModelConfig,
    temperature: f64,
    duty: f64,
    last_time: Option<f64>,
    reads: u64,
}

impl RoasterModel {
    fn advance_to(&mut self, time_s: f64) {
        let Some(last) = self.last_time else {
            self.last_time = Some(time_s);
            return;
        };
        let mut remaining = time_s - last;
        while remaining > 0.0 {
            let dt = remaining.min(self.config.step_s);
            let heat_in = self.config.heater_power * (self.duty / 100.0);
            let heat_out = self.config.heat_loss_coeff * (self.temperature - self.config.ambient_temp);
            self.temperature += (heat_in - heat_out) * dt / self.config.thermal_capacity;
            remaining -= dt;
        }
        self.last_time = Some(time_s.max(last));
    }
}

/// First-order roaster simulation shared by a probe and a heater handle.
#[derive(Debug, Clone)]
pub struct SimulatedRoaster {
    model: Arc<Mutex<RoasterModel>>,
}

impl SimulatedRoaster {
    pub fn new(config: RoasterModelConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            model: Arc::new(Mutex::new(RoasterModel {
                config,
                temperature: config.initial_temp,
                duty: 0.0,
                last_time: None,
                reads: 0,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RoasterModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn probe(&self) -> RoasterProbe {
        RoasterProbe {
            roaster: self.clone(),
        }
    }

    pub fn heater(&self) -> RoasterHeater {
        RoasterHeater {
            roaster: self.clone(),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.lock().temperature
    }

    pub fn duty(&self) -> f64 {
        self.lock().duty
    }
}

/// Temperature side of a [`SimulatedRoaster`].
#[derive(Debug, Clone)]
pub struct RoasterProbe {
    roaster: SimulatedRoaster,
}

impl TemperatureSource for RoasterProbe {
    fn read(&mut self, elapsed_s: f64) -> Reading {
        let mut model = self.roaster.lock();
        model.advance_to(elapsed_s);
        model.reads += 1;
        if let Some(every) = model.config.dropout_every {
            if model.reads % u64::from(every) == 0 {
                return Reading::Invalid;
            }
        }
        Reading::from_raw(model.temperature)
    }
}

/// Heater side of a [`SimulatedRoaster`]. Duty is in percent.
#[derive(Debug, Clone)]
pub struct RoasterHeater {
    roaster: SimulatedRoaster,
}

impl ControlSink for RoasterHeater {
    fn apply(&mut self, duty: f64) -> ControlResult<()> {
        if !duty.is_finite() {
            return Err(ControlError::Actuator {
                message: format!("non-finite duty {duty}"),
            });
        }
        self.roaster.lock().duty = duty.clamp(0.0, 100.0);
        Ok(())
    }
}
