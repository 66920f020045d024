//! # Logging Utilities
//!
//! Logging setup for the debugbox binaries using `tracing`.
//!
//! Console output goes to stderr: stdout belongs to controller commands,
//! which print replies there. An optional file sink rolls daily.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `debug`, `debugbox_core=trace`)
//! - `DEBUGBOX_LOG_FORMAT`: `pretty` (default) or `json`
//! - `DEBUGBOX_LOG_FILE`: also write logs to this file (rotated daily)
//!
//! ## Example
//!
//! ```rust,no_run
//! use debugbox_utils::{init_logging, LogConfig};
//!
//! let _guard = init_logging(&LogConfig::from_env()).expect("Failed to initialize logging");
//! tracing::info!("debugger started");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Where and how to log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig
{
    pub format: LogFormat,
    /// Explicit level. Overrides `RUST_LOG` when set.
    pub level: Option<LogLevel>,
    /// Optional log file, rotated daily.
    pub file: Option<PathBuf>,
}

impl LogConfig
{
    /// Read `DEBUGBOX_LOG_FORMAT` and `DEBUGBOX_LOG_FILE`
    ///
    /// An unknown format falls back to pretty output.
    #[must_use]
    pub fn from_env() -> Self
    {
        Self {
            format: env::var("DEBUGBOX_LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            level: None,
            file: env::var_os("DEBUGBOX_LOG_FILE").map(PathBuf::from),
        }
    }

    /// Filter used for every sink
    ///
    /// Priority: explicit level, then `RUST_LOG`, then `info`.
    #[must_use]
    pub fn filter(&self) -> EnvFilter
    {
        if let Some(level) = self.level {
            return EnvFilter::new(Level::from(level).to_string());
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    }
}

/// Install the global subscriber
///
/// Returns the guard of the file writer when a file sink is configured. Keep
/// it alive for as long as logs should be flushed to the file.
///
/// ## Errors
///
/// Returns [`LoggingError::InitializationFailed`] if a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError>
{
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    match config.format {
        LogFormat::Pretty => layers.push(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(config.filter())
                .boxed(),
        ),
        LogFormat::Json => layers.push(
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_current_span(true)
                .with_writer(io::stderr)
                .with_filter(config.filter())
                .boxed(),
        ),
    }

    let mut guard = None;
    if let Some(path) = &config.file {
        let appender = tracing_appender::rolling::daily(directory_of(path), path.file_name().unwrap_or_default());
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        match config.format {
            LogFormat::Pretty => layers.push(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false) // No ANSI in files
                    .with_filter(config.filter())
                    .boxed(),
            ),
            LogFormat::Json => layers.push(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_filter(config.filter())
                    .boxed(),
            ),
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn directory_of(path: &Path) -> &Path
{
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// A subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert!(matches!(LogFormat::from_str("xml"), Err(LoggingError::InvalidFormat(_))));
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("Trace").unwrap(), LogLevel::Trace);
        assert!(matches!(LogLevel::from_str("loud"), Err(LoggingError::InvalidLevel(_))));
    }

    #[test]
    fn test_log_level_to_tracing_level()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
    }

    #[test]
    fn test_directory_of_bare_file_name()
    {
        assert_eq!(directory_of(Path::new("debugbox.log")), Path::new("."));
        assert_eq!(directory_of(Path::new("/var/log/debugbox.log")), Path::new("/var/log"));
    }

    #[test]
    fn test_explicit_level_wins()
    {
        let config = LogConfig {
            level: Some(LogLevel::Trace),
            ..LogConfig::default()
        };
        assert_eq!(config.filter().to_string().to_lowercase(), "trace");
    }
}
