//! Errors raised while installing the log subscriber.

use std::path::PathBuf;

use thiserror::Error;

/// Why [`crate::setup_logging`] could not install a subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The base level or an extra directive does not parse as a filter.
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// The offending level or directive.
        filter: String,
        /// Parser message.
        message: String,
    },

    /// Another global subscriber is already installed in this process.
    #[error("a global log subscriber is already installed: {0}")]
    AlreadyInstalled(String),

    /// The directory for file logging could not be created.
    #[error("cannot create log directory {}: {source}", path.display())]
    LogDirectory {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
