//! Tracing subscriber setup.
//!
//! Logs go to stderr and, when a directory is configured, to a daily
//! rolling file written by a background thread. `RUST_LOG` overrides the
//! configured level.

use std::path::PathBuf;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log file name prefix; files are named `asset-cache.YYYY-MM-DD.log`.
pub const LOG_FILE_PREFIX: &str = "asset-cache";

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `asset_cache=debug,warn`.
    pub level: String,

    /// Also write daily log files into this directory.
    pub directory: Option<PathBuf>,

    /// Colorize stderr output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Set the filter directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the log file directory.
    pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.directory = directory;
        self
    }

    /// Enable or disable colors on stderr.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Errors installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to open log directory: {0}")]
    File(#[from] InitError),

    #[error("a global logger is already installed")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Keeps the background log writer alive; drop it last.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber.
///
/// Call before starting a multi-threaded runtime so the local UTC offset
/// can be determined; otherwise timestamps fall back to UTC.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let timer = OffsetTime::local_rfc_3339()
        .unwrap_or_else(|_| OffsetTime::new(UtcOffset::UTC, Rfc3339));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(timer.clone())
        .with_ansi(config.ansi);

    let (file_layer, file_guard) = match &config.directory {
        Some(directory) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .build(directory)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(timer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LoggingGuard { _file: file_guard })
}

fn level_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|source| LoggingError::Filter {
        filter: level.to_string(),
        source,
    })
}
