//! Logging and request-correlation context for the beacon agent-control
//! daemon.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - Request context for correlation across operations
//! - Integration with the `tracing` ecosystem
//!
//! # Example
//!
//! ```rust,no_run
//! use beacon_telemetry::{LogConfig, LogFormat, setup_logging, RequestContext};
//!
//! # fn main() -> Result<(), beacon_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("beacon_transport=trace");
//!
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("daemon").with_operation("bootstrap");
//! let _guard = ctx.enter();
//! tracing::info!("bootstrapping");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{setup_default_logging, setup_logging, LogConfig, LogFormat, LogTarget};
