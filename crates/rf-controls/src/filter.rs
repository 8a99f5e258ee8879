//! First-order low-pass filter.
//!
//! A single-pole Butterworth section obtained through the bilinear
//! transform. Used to smooth the PID derivative and output terms and,
//! optionally, temperatures before a rate-of-rise computation.
//!
//! Difference equation: `y[n] = b * (x[n] + x[n-1]) + a * y[n-1]` with unity
//! DC gain. The first sample after construction or reset seeds the state,
//! so the output starts at the input instead of ramping up from zero.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ControlError, ControlResult};

/// Largest usable cutoff as a fraction of Nyquist.
const MAX_NORMALIZED_CUTOFF: f64 = 0.99;

/// Filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Rate at which `process` is called, in Hz.
    pub sampling_rate_hz: f64,
    /// Cutoff frequency in Hz.
    pub cutoff_hz: f64,
}

impl FilterConfig {
    pub fn new(sampling_rate_hz: f64, cutoff_hz: f64) -> ControlResult<Self> {
        let config = Self {
            sampling_rate_hz,
            cutoff_hz,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ControlResult<()> {
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(ControlError::InvalidArg {
                what: "filter sampling rate must be positive",
            });
        }
        if !(self.cutoff_hz.is_finite() && self.cutoff_hz > 0.0) {
            return Err(ControlError::InvalidArg {
                what: "filter cutoff must be positive",
            });
        }
        Ok(())
    }

    /// Cutoff as a fraction of the Nyquist frequency, limited to (0, 0.99].
    pub fn normalized_cutoff(&self) -> f64 {
        let nyquist = self.sampling_rate_hz / 2.0;
        (self.cutoff_hz / nyquist).min(MAX_NORMALIZED_CUTOFF)
    }
}

/// Stateful first-order low-pass filter.
///
/// Not synchronized; the owner serializes access.
#[derive(Debug, Clone, PartialEq)]
pub struct LowPassFilter {
    config: FilterConfig,
    b: f64,
    a: f64,
    prev_input: Option<f64>,
    prev_output: f64,
}

impl LowPassFilter {
    pub fn new(config: FilterConfig) -> ControlResult<Self> {
        config.validate()?;
        let (b, a) = coefficients(&config);
        Ok(Self {
            config,
            b,
            a,
            prev_input: None,
            prev_output: 0.0,
        })
    }

    pub fn config(&self) -> FilterConfig {
        self.config
    }

    /// Feed one sample and return the filtered value.
    pub fn process(&mut self, x: f64) -> f64 {
        let y = match self.prev_input {
            None => x,
            Some(prev_x) => self.b * (x + prev_x) + self.a * self.prev_output,
        };
        self.prev_input = Some(x);
        self.prev_output = y;
        y
    }

    /// Last filtered value, if any sample has been processed.
    pub fn last_output(&self) -> Option<f64> {
        self.prev_input.map(|_| self.prev_output)
    }

    /// Forget all history; the next sample seeds the filter again.
    pub fn reset(&mut self) {
        self.prev_input = None;
        self.prev_output = 0.0;
    }

    /// Recompute coefficients for a new call rate. The state is cleared so
    /// old history filtered at the previous rate cannot cause a jump.
    pub fn set_sampling_rate(&mut self, sampling_rate_hz: f64) -> ControlResult<()> {
        let config = FilterConfig::new(sampling_rate_hz, self.config.cutoff_hz)?;
        let (b, a) = coefficients(&config);
        self.config = config;
        self.b = b;
        self.a = a;
        self.reset();
        Ok(())
    }
}

fn coefficients(config: &FilterConfig) -> (f64, f64) {
    if config.cutoff_hz >= config.sampling_rate_hz / 2.0 {
        warn!(
            cutoff_hz = config.cutoff_hz,
            sampling_rate_hz = config.sampling_rate_hz,
            "filter cutoff at or above Nyquist, limiting"
        );
    }
    let k = (PI * config.normalized_cutoff() / 2.0).tan();
    let b = k / (1.0 + k);
    let a = (1.0 - k) / (1.0 + k);
    (b, a)
}
