//! Error types for the rf-app service layer.

use std::path::PathBuf;

/// Application error type that wraps errors from the backend crates and
/// gives frontends one error to report.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Failed to read profile file: {path}")]
    ProfileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse profile file {path}: {message}")]
    ProfileParse { path: PathBuf, message: String },

    #[error("Failed to write profile file: {path}")]
    ProfileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Control error: {0}")]
    Control(String),

    #[error("Analytics error: {0}")]
    Analytics(String),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for rf-app operations.
pub type AppResult<T> = Result<T, AppError>;

// Conversions from backend error types
impl From<rf_controls::ControlError> for AppError {
    fn from(err: rf_controls::ControlError) -> Self {
        AppError::Control(err.to_string())
    }
}

impl From<rf_analytics::AnalyticsError> for AppError {
    fn from(err: rf_analytics::AnalyticsError) -> Self {
        AppError::Analytics(err.to_string())
    }
}

impl From<rf_core::CoreError> for AppError {
    fn from(err: rf_core::CoreError) -> Self {
        AppError::Event(err.to_string())
    }
}
