//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while configuring or initializing logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The supplied [`crate::LogConfig`] could not be turned into a filter.
    #[error("logging configuration error: {0}")]
    ConfigError(String),

    /// `tracing`'s global subscriber was already set.
    #[error("logging already initialized: {0}")]
    InitError(String),

    /// Setting up a file appender failed.
    #[error("logging io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
