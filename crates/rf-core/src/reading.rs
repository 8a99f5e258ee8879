//! Measurement values as delivered by a device adapter.
//!
//! A reading has three states that must not be collapsed into one: nothing
//! has been read yet, the device reported an unusable value, or a valid
//! temperature is available. Treating either of the first two as `0.0` would
//! feed a fake cold sample into the controller.

use crate::numeric::{INVALID_TEMPERATURE, Real, is_valid_temperature};

/// Tri-state measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Reading {
    /// No reading has been taken yet.
    #[default]
    Missing,
    /// The device answered with a sentinel or non-finite value.
    Invalid,
    /// A usable temperature.
    Valid(Real),
}

impl Reading {
    /// Classify a raw device value (sentinel `-1` and non-finite are invalid).
    pub fn from_raw(value: Real) -> Self {
        if is_valid_temperature(value) {
            Self::Valid(value)
        } else {
            Self::Invalid
        }
    }

    /// Classify an optional raw value; `None` means no reading yet.
    pub fn from_option(value: Option<Real>) -> Self {
        value.map_or(Self::Missing, Self::from_raw)
    }

    pub fn value(self) -> Option<Real> {
        match self {
            Self::Valid(v) => Some(v),
            Self::Missing | Self::Invalid => None,
        }
    }

    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Value stored in parallel series arrays, where gaps use the sentinel.
    pub fn to_series_value(self) -> Real {
        self.value().unwrap_or(INVALID_TEMPERATURE)
    }
}

impl From<Real> for Reading {
    fn from(value: Real) -> Self {
        Self::from_raw(value)
    }
}

/// One measurement on the roast time axis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Seconds since the start of sampling.
    pub time_s: Real,
    pub temperature: Reading,
}

impl Sample {
    pub fn new(time_s: Real, temperature: impl Into<Reading>) -> Self {
        Self {
            time_s,
            temperature: temperature.into(),
        }
    }
}
