//! Error types for analytics configuration.

use rf_controls::ControlError;
use thiserror::Error;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Configuration errors. Bad samples never produce an error; they yield a
/// neutral value instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Alarm {index} has invalid guard {guard} (alarm count {len})")]
    InvalidGuard {
        index: usize,
        guard: usize,
        len: usize,
    },

    #[error("Smoothing filter: {0}")]
    Filter(#[from] ControlError),
}
