//! Error types for control operations.

use thiserror::Error;

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in control operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Invalid argument provided to a control function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// Configuration values that are individually valid but inconsistent.
    #[error("Inconsistent configuration: {what}")]
    Inconsistent { what: String },

    /// The actuator refused or failed to apply an output.
    #[error("Actuator error: {message}")]
    Actuator { message: String },
}
