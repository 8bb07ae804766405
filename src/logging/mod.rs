//! Logging for the error pipeline.
//!
//! Two concerns live here:
//! - Process diagnostics: `init_logging` installs a `tracing` subscriber that
//!   writes to stderr, honours `RUST_LOG` and includes timestamps.
//! - Structured error records: `StructuredLogger` sanitizes context and emits
//!   `LogRecord`s to a pluggable `LogSink`.

mod sanitize;
mod sink;
mod structured;

pub use sanitize::{Sanitizer, DEFAULT_REDACTION_MARKER, DEFAULT_SENSITIVE_KEYS};
pub use sink::{JsonLinesSink, LogSink, MemorySink, SinkError, SinkResult, TracingSink};
pub use structured::{LogRecord, LoggerConfig, RecordLevel, StructuredLogger};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

/// Log level for process diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warning level
    Warn,
    /// Error level - least verbose
    Error,
    /// Disable logging entirely
    Off,
}

impl LogLevel {
    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// Convert verbosity count to log level.
    /// 0 = Warn, 1 = Info, 2 = Debug, 3+ = Trace
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Configuration for process diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: LogLevel,
    /// Whether to include timestamps
    pub with_timestamps: bool,
    /// Whether to include the target (module path)
    pub with_target: bool,
    /// Whether to include file/line information
    pub with_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamps: true,
            with_target: true,
            with_file: false,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    /// Applies `--quiet` and `-v` flags on top of a loaded configuration.
    ///
    /// `--quiet` wins over any verbosity. Without flags the level is kept.
    pub fn with_cli_overrides(self, quiet: bool, verbosity: u8) -> Self {
        if quiet {
            self.with_level(LogLevel::Error)
        } else if verbosity > 0 {
            self.with_level(LogLevel::from(verbosity))
        } else {
            self
        }
    }
}

/// Installs the global diagnostics subscriber.
///
/// Logs go to stderr so stdout stays free for JSON output. `RUST_LOG` takes
/// precedence over the configured level. Returns false if a subscriber was
/// already installed.
///
/// ```no_run
/// use faultroute::logging::{init_logging, LoggingConfig, LogLevel};
///
/// init_logging(LoggingConfig::new().with_level(LogLevel::Debug));
/// ```
pub fn init_logging(config: LoggingConfig) -> bool {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.directive())
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.with_target)
        .with_file(config.with_file)
        .with_line_number(config.with_file);

    let result = if config.with_timestamps {
        subscriber.try_init()
    } else {
        subscriber.without_time().try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_verbosity() {
        assert_eq!(LogLevel::from(0), LogLevel::Warn);
        assert_eq!(LogLevel::from(1), LogLevel::Info);
        assert_eq!(LogLevel::from(2), LogLevel::Debug);
        assert_eq!(LogLevel::from(10), LogLevel::Trace);
    }

    #[test]
    fn test_cli_overrides() {
        let loaded = LoggingConfig::new().with_level(LogLevel::Debug);

        assert_eq!(loaded.clone().with_cli_overrides(false, 0).level, LogLevel::Debug);
        assert_eq!(loaded.clone().with_cli_overrides(false, 1).level, LogLevel::Info);
        assert_eq!(loaded.clone().with_cli_overrides(false, 3).level, LogLevel::Trace);
        assert_eq!(loaded.clone().with_cli_overrides(true, 2).level, LogLevel::Error);
        assert!(loaded.with_cli_overrides(true, 0).with_timestamps);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Debug)
            .with_timestamps(false)
            .with_target(false)
            .with_file(true);

        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.with_timestamps);
        assert!(!config.with_target);
        assert!(config.with_file);
    }

    #[test]
    fn test_log_level_deserializes_lowercase() {
        let config: LoggingConfig = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.with_timestamps);
    }
}
