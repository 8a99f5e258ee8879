//! Sampling interval configuration.
//!
//! The whole pipeline runs at one fixed interval: the scheduler ticks at it,
//! and the controller's smoothing filters are tuned for it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interval used when none is configured.
pub const DEFAULT_INTERVAL_MS: u64 = 2000;
/// Shortest interval the scheduler accepts.
pub const MIN_INTERVAL_MS: u64 = 100;

/// Sample configuration for the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Sample period in milliseconds, never below [`MIN_INTERVAL_MS`].
    pub interval_ms: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl SampleConfig {
    /// Create a sample configuration; intervals below the floor are raised to it.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(MIN_INTERVAL_MS),
        }
    }

    /// Same configuration with the floor applied (for deserialized values).
    pub fn normalized(self) -> Self {
        Self::new(self.interval_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(MIN_INTERVAL_MS))
    }

    /// Sample period in seconds.
    pub fn dt(&self) -> f64 {
        self.interval().as_secs_f64()
    }

    /// Sample frequency in Hz.
    pub fn frequency(&self) -> f64 {
        1.0 / self.dt()
    }
}
