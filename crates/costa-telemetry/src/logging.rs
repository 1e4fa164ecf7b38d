//! Subscriber construction from a [`LogConfig`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::{TelemetryError, TelemetryResult};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-oriented output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error. Keeps stdout free for command output.
    #[default]
    Stderr,
    /// Daily-rotated files in the given directory.
    File(PathBuf),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base filter, e.g. `info` or `costa=debug`.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Output destination.
    pub target: LogTarget,
    /// File name prefix for [`LogTarget::File`].
    pub file_prefix: String,
    /// Include timestamps.
    pub timestamps: bool,
    /// Include source file and line.
    pub file_info: bool,
    /// Emit ANSI colors. Ignored for file targets.
    pub ansi: bool,
    /// Extra filter directives added on top of `level`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            file_prefix: "costa".to_string(),
            timestamps: true,
            file_info: false,
            ansi: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Defaults with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Set the format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Write daily-rotated files into `dir`.
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target = LogTarget::File(dir.into());
        self
    }

    /// Toggle timestamps.
    #[must_use]
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Toggle source locations.
    #[must_use]
    pub fn with_file_info(mut self, enabled: bool) -> Self {
        self.file_info = enabled;
        self
    }

    /// Toggle ANSI colors.
    #[must_use]
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Add a filter directive such as `costa::subprocess=warn`.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }
}

/// Build the env filter from the level and directives.
pub(crate) fn build_filter(config: &LogConfig) -> TelemetryResult<EnvFilter> {
    let invalid = |filter: &str, message: String| TelemetryError::InvalidFilter {
        filter: filter.to_string(),
        message,
    };

    let mut filter =
        EnvFilter::try_new(&config.level).map_err(|e| invalid(&config.level, e.to_string()))?;

    for directive in &config.directives {
        let parsed = directive
            .parse::<Directive>()
            .map_err(|e| invalid(directive, e.to_string()))?;
        filter = filter.add_directive(parsed);
    }

    Ok(filter)
}

fn build_writer(config: &LogConfig) -> TelemetryResult<BoxMakeWriter> {
    Ok(match &config.target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogTarget::File(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| TelemetryError::LogDirectory {
                path: dir.clone(),
                source,
            })?;
            BoxMakeWriter::new(tracing_appender::rolling::daily(dir, &config.file_prefix))
        },
    })
}

fn build_layer<S>(
    config: &LogConfig,
    writer: BoxMakeWriter,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let ansi = config.ansi && !matches!(config.target, LogTarget::File(_));
    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns `InvalidFilter` for bad filters, `LogDirectory` if the log
/// directory cannot be created, and `AlreadyInstalled` if a subscriber is
/// already set.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = build_filter(config)?;
    let writer = build_writer(config)?;
    let layer = build_layer(config, writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}

/// Install the default subscriber: compact lines on stderr at `info`.
///
/// # Errors
///
/// Returns `AlreadyInstalled` if a subscriber is already set.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}
