//! Logging setup for processes embedding the costa runtime.
//!
//! The `costa` library only emits `tracing` events. Binaries and services
//! that embed it call [`setup_logging`] once at startup:
//!
//! ```rust,no_run
//! use costa_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("costa::subprocess=warn");
//! setup_logging(&config).expect("logging");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
