//! Logging configuration and initialization.

use std::path::PathBuf;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{TelemetryError, TelemetryResult};

/// Output formatting for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human-friendly.
    Pretty,
    /// Single-line, human-friendly.
    #[default]
    Compact,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Standard error.
    Stderr,
    /// A daily-rolling file under `directory`, named `{file_name_prefix}.YYYY-MM-DD`.
    File {
        /// Directory the rolling file appender writes into.
        directory: PathBuf,
        /// Prefix for the rolled file names.
        file_name_prefix: String,
    },
}

impl Default for LogTarget {
    fn default() -> Self {
        Self::Stderr
    }
}

/// Builder for the process-wide logging setup.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    directives: Vec<String>,
    format: LogFormat,
    target: LogTarget,
}

impl LogConfig {
    /// Start a config at the given default level (e.g. `"info"`, `"debug"`).
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            directives: Vec::new(),
            format: LogFormat::default(),
            target: LogTarget::default(),
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Layer an extra `EnvFilter` directive (e.g. `"beacon_transport=trace"`)
    /// on top of the default level.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Set where log lines are written.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    fn env_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut spec = self.level.clone();
        for directive in &self.directives {
            spec.push(',');
            spec.push_str(directive);
        }
        EnvFilter::try_new(spec).map_err(|err| TelemetryError::ConfigError(err.to_string()))
    }
}

/// Install `config` as the process-wide `tracing` subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::ConfigError`] if the level/directives don't
/// parse, or [`TelemetryError::InitError`] if a global subscriber is
/// already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.env_filter()?;

    let writer = match &config.target {
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogTarget::File { directory, file_name_prefix } => {
            let appender = tracing_appender::rolling::daily(directory, file_name_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // The daemon runs for the process lifetime; leaking the guard
            // keeps the background flush thread alive without forcing every
            // caller to thread a `WorkerGuard` through.
            std::mem::forget(guard);
            BoxMakeWriter::new(non_blocking)
        },
    };

    let layer: Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().with_writer(writer).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().with_writer(writer).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|err| TelemetryError::InitError(err.to_string()))
}

/// Convenience: `setup_logging` with `info`-level, compact, stderr output.
///
/// # Errors
///
/// Same as [`setup_logging`].
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_combines_level_and_directives() {
        let config = LogConfig::new("info").with_directive("beacon_transport=trace");
        let filter = config.env_filter().unwrap();
        assert_eq!(filter.to_string(), "info,beacon_transport=trace");
    }

    #[test]
    fn builder_is_chainable() {
        let config = LogConfig::new("debug").with_format(LogFormat::Json).with_target(LogTarget::File {
            directory: PathBuf::from("/tmp"),
            file_name_prefix: "beacon".to_string(),
        });
        assert_eq!(config.format, LogFormat::Json);
    }
}
