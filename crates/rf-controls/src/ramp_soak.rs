//! Ramp/soak setpoint programs.
//!
//! A program is an ordered list of segments. Each segment ramps linearly
//! from the previous target (or the starting temperature for the first
//! segment) to its own target over `ramp_seconds`, then holds that target
//! for `soak_seconds`. After the last segment the final target is held.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// One ramp followed by one soak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampSoakSegment {
    pub ramp_seconds: u32,
    pub soak_seconds: u32,
    pub target_temp: f64,
}

impl RampSoakSegment {
    pub fn new(ramp_seconds: u32, soak_seconds: u32, target_temp: f64) -> Self {
        Self {
            ramp_seconds,
            soak_seconds,
            target_temp,
        }
    }

    pub fn duration_s(&self) -> f64 {
        f64::from(self.ramp_seconds) + f64::from(self.soak_seconds)
    }
}

/// Ordered ramp/soak program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RampSoakProgram {
    segments: Vec<RampSoakSegment>,
}

impl RampSoakProgram {
    pub fn new(segments: Vec<RampSoakSegment>) -> ControlResult<Self> {
        let program = Self { segments };
        program.validate()?;
        Ok(program)
    }

    pub fn validate(&self) -> ControlResult<()> {
        if self.segments.iter().any(|s| !s.target_temp.is_finite()) {
            return Err(ControlError::InvalidArg {
                what: "ramp/soak target must be finite",
            });
        }
        Ok(())
    }

    pub fn segments(&self) -> &[RampSoakSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_duration_s(&self) -> f64 {
        self.segments.iter().map(RampSoakSegment::duration_s).sum()
    }

    pub fn is_finished(&self, elapsed_s: f64) -> bool {
        elapsed_s >= self.total_duration_s()
    }

    /// Setpoint `elapsed_s` seconds into the program, starting from
    /// `start_temp`. `None` for an empty program or an unusable time.
    pub fn setpoint_at(&self, elapsed_s: f64, start_temp: f64) -> Option<f64> {
        if self.segments.is_empty() || !elapsed_s.is_finite() || elapsed_s < 0.0 {
            return None;
        }
        let mut from = start_temp;
        let mut t = elapsed_s;
        for segment in &self.segments {
            let ramp = f64::from(segment.ramp_seconds);
            if t < ramp {
                return Some(from + (segment.target_temp - from) * t / ramp);
            }
            t -= ramp;
            let soak = f64::from(segment.soak_seconds);
            if t < soak {
                return Some(segment.target_temp);
            }
            t -= soak;
            from = segment.target_temp;
        }
        Some(from)
    }
}
