//! Telemetry and tracing utilities
//!
//! cardkit logs through `tracing`; this module installs a subscriber for
//! applications that do not bring their own.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardkit::telemetry::{init_subscriber, OutputFormat, SubscriberConfig};
//!
//! let config = SubscriberConfig::builder()
//!     .log_level(tracing::Level::DEBUG)
//!     .output_format(OutputFormat::Json)
//!     .build();
//! let _guard = init_subscriber(config)?;
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::error::{CardError, Result};

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format
    Json,
    /// Compact JSON format
    JsonCompact,
}

impl std::str::FromStr for OutputFormat {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            _ => Err(CardError::TelemetryInit(format!(
                "Invalid log format: {s}. Valid options: text, json, json-compact"
            ))),
        }
    }
}

/// Configuration for tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Log level
    pub log_level: tracing::Level,
    /// Output format
    pub output_format: OutputFormat,
    /// Enable console output
    pub enable_console: bool,
    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            enable_console: true,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    /// Create a new builder for SubscriberConfig
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    /// Create a debug configuration
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Default::default()
        }
    }

    /// Create a production configuration: warnings and up, JSON, file only
    pub fn production(log_file: PathBuf) -> Self {
        Self {
            log_level: tracing::Level::WARN,
            output_format: OutputFormat::Json,
            enable_console: false,
            log_file: Some(log_file),
        }
    }

    /// Build a configuration from `CARDKIT_LOG_LEVEL`, `CARDKIT_LOG_FORMAT`
    /// and `CARDKIT_LOG_FILE`, looked up through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(level) = lookup("CARDKIT_LOG_LEVEL") {
            builder = builder.log_level_str(&level)?;
        }
        if let Some(format) = lookup("CARDKIT_LOG_FORMAT") {
            builder = builder.output_format(format.parse()?);
        }
        if let Some(path) = lookup("CARDKIT_LOG_FILE") {
            builder = builder.log_file(PathBuf::from(path));
        }
        Ok(builder.build())
    }
}

/// Builder for SubscriberConfig
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    enable_console: Option<bool>,
    log_file: Option<PathBuf>,
}

impl SubscriberConfigBuilder {
    /// Set the log level
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string
    pub fn log_level_str(mut self, level: &str) -> Result<Self> {
        let parsed = match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => {
                return Err(CardError::TelemetryInit(format!(
                    "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
                )));
            }
        };
        self.log_level = Some(parsed);
        Ok(self)
    }

    /// Set the output format
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    /// Enable or disable console output
    pub fn enable_console(mut self, enable: bool) -> Self {
        self.enable_console = Some(enable);
        self
    }

    /// Set the log file path
    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    /// Build the configuration
    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            enable_console: self.enable_console.unwrap_or(true),
            log_file: self.log_file,
        }
    }
}

fn level_name(level: tracing::Level) -> &'static str {
    match level {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path.file_name().ok_or_else(|| {
        CardError::TelemetryInit(format!("Log file path has no file name: {}", path.display()))
    })?;
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize tracing subscriber with the given configuration
///
/// ## Returns
///
/// - `Ok(Option<WorkerGuard>)` if initialization succeeds. The guard is `Some`
///   when file logging is enabled and must be kept alive for as long as logs
///   should be flushed to the file.
/// - `Err(CardError::TelemetryInit)` if initialization fails
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>> {
    let filter = format!("cardkit={}", level_name(config.log_level));

    let (writer, guard) = match (&config.log_file, config.enable_console) {
        (Some(path), console) => {
            let (file, guard) = file_writer(path)?;
            let writer = if console {
                BoxMakeWriter::new(std::io::stdout.and(file))
            } else {
                BoxMakeWriter::new(file)
            };
            (writer, Some(guard))
        }
        (None, true) => (BoxMakeWriter::new(std::io::stdout), None),
        (None, false) => (BoxMakeWriter::new(std::io::sink), None),
    };

    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .json()
            .try_init(),
        OutputFormat::JsonCompact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .json()
            .flatten_event(true)
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_ansi(config.log_file.is_none())
            .try_init(),
    };

    // Another subscriber may already be installed (tests, host application).
    match init_result {
        Ok(()) => Ok(guard),
        Err(e) => {
            let message = e.to_string();
            if message.contains("has already been set") || message.contains("already initialized") {
                Ok(guard)
            } else {
                Err(CardError::TelemetryInit(format!(
                    "Failed to initialize tracing: {e}"
                )))
            }
        }
    }
}

/// Initialize tracing subscriber with default configuration
pub fn init_default() -> Result<Option<WorkerGuard>> {
    init_subscriber(SubscriberConfig::default())
}

/// Initialize tracing subscriber from `CARDKIT_LOG_LEVEL`, `CARDKIT_LOG_FORMAT`
/// and `CARDKIT_LOG_FILE`.
pub fn init_from_env() -> Result<Option<WorkerGuard>> {
    init_subscriber(SubscriberConfig::from_lookup(|key| std::env::var(key).ok())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_parses_levels_and_formats() {
        let config = SubscriberConfig::builder()
            .log_level_str("DEBUG")
            .unwrap()
            .output_format("json-compact".parse().unwrap())
            .build();
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.output_format, OutputFormat::JsonCompact);
        assert!(config.enable_console);

        assert!(SubscriberConfig::builder().log_level_str("loud").is_err());
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn config_from_lookup() {
        let config = SubscriberConfig::from_lookup(|key| match key {
            "CARDKIT_LOG_LEVEL" => Some("warn".into()),
            "CARDKIT_LOG_FILE" => Some("/tmp/cardkit.log".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.log_level, tracing::Level::WARN);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/cardkit.log")));
        assert_eq!(config.output_format, OutputFormat::Text);
    }

    #[test]
    fn init_tolerates_an_existing_subscriber() {
        let _first = init_default();
        assert!(init_default().is_ok());
    }
}
